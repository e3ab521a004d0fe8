#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(program) = serval_dsl::parse(s, "fuzz.ser") {
            // Small state budget: unbounded loops must end in an error, not a hang.
            if let Ok(ns) = serval_ir::lowering::lower_program(&program, 2_000) {
                let _ = ns.into_validated();
            }
        }
    }
});
