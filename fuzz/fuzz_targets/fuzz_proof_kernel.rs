#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Deserializing and checking an arbitrary bundle must never panic.
        if let Ok(bundle) =
            serde_json::from_str::<serval_proof_kernel::CertificateBundle>(s)
        {
            let _ = serval_proof_kernel::compute_bundle_sha256(&bundle);
            let _ = serval_proof_kernel::check_bundle(&bundle, true);
        }
    }
});
