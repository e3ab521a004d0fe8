use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serval_ir::ns::NetworkSystem;
use serval_ir::petri::PetriNet;
use serval_ir::region::SerialOptions;
use serval_ir::semilinear::{LinearSet, SemilinearSet};
use serval_proof_kernel::{
    write_bundle, CertificateBundle, DisjunctProof, GlobalInvariant, ProducerOptions,
    CERTIFICATE_SCHEMA_VERSION, PROOF_KIND,
};

const DOMAIN_TAG: &str = "serval-certificate-v1\n";

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn recomputed_hash(bundle: &CertificateBundle) -> String {
    let mut unstamped = bundle.clone();
    unstamped.bundle_sha256 = None;
    let mut bytes = DOMAIN_TAG.as_bytes().to_vec();
    bytes.extend(serde_json::to_vec(&unstamped).unwrap());
    sha256_hex(&bytes)
}

fn proof_bundle() -> CertificateBundle {
    let mut system = NetworkSystem::new("G0");
    system.add_request("ping", "P");
    system.add_request("get", "Q");
    system.add_response("P", "pong");
    system.add_response("Q", "value");
    let net = PetriNet::from_network_system(&system);
    CertificateBundle {
        schema_version: CERTIFICATE_SCHEMA_VERSION,
        kind: PROOF_KIND.into(),
        producer: ProducerOptions {
            tool: "integration".into(),
            bidirectional_pruning: true,
            serial: SerialOptions::default(),
        },
        system,
        disjuncts: vec![DisjunctProof {
            id: 0,
            region: None,
            kept_transitions: vec![],
            invariant: vec![GlobalInvariant {
                global: net.initial_global(),
                set: SemilinearSet::from_components(vec![LinearSet::singleton(
                    Default::default(),
                )]),
            }],
        }],
        trace: None,
        bundle_sha256: None,
    }
}

fn certcheck(dir: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_serval-certcheck"))
        .arg(dir)
        .args(extra)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute serval-certcheck")
}

fn load(dir: &Path) -> CertificateBundle {
    serde_json::from_str(&fs::read_to_string(dir.join("certificate.json")).unwrap()).unwrap()
}

fn store(dir: &Path, bundle: &CertificateBundle) {
    fs::write(
        dir.join("certificate.json"),
        serde_json::to_string_pretty(bundle).unwrap(),
    )
    .unwrap();
}

#[test]
fn stamped_hash_matches_an_independent_recomputation() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &proof_bundle()).unwrap();
    let stored = load(dir.path());
    assert_eq!(stored.bundle_sha256, Some(recomputed_hash(&stored)));
}

#[test]
fn valid_bundle_passes() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &proof_bundle()).unwrap();
    let output = certcheck(dir.path(), &[]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Proof certificate is VALID"
    );
}

#[test]
fn json_flag_prints_the_report() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &proof_bundle()).unwrap();
    let output = certcheck(dir.path(), &["--json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["overall"], "pass");
    assert_eq!(report["cert_kind"], PROOF_KIND);
    assert_eq!(report["producer"], "integration");
    assert_eq!(report["issues"].as_array().map(Vec::len), Some(0));
}

#[test]
fn edited_bundle_with_stale_hash_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &proof_bundle()).unwrap();
    let mut bundle = load(dir.path());
    bundle.producer.tool = "someone else".into();
    store(dir.path(), &bundle);

    let output = certcheck(dir.path(), &[]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Proof certificate is INVALID"), "{stdout}");
    assert!(stdout.contains("hash mismatch"), "{stdout}");
}

#[test]
fn rehashed_bundle_with_a_wrong_invariant_is_still_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), &proof_bundle()).unwrap();
    let mut bundle = load(dir.path());
    // An empty invariant does not contain the initial marking.
    bundle.disjuncts[0].invariant.clear();
    bundle.bundle_sha256 = Some(recomputed_hash(&bundle));
    store(dir.path(), &bundle);

    let output = certcheck(dir.path(), &["--json"]);
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["overall"], "fail");
    assert_eq!(report["proof"]["initial_state_ok"], false);
    assert!(!report["issues"]
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i.as_str().unwrap_or("").contains("hash")));
}

#[test]
fn missing_bundle_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let output = certcheck(&dir.path().join("absent"), &[]);
    assert!(!output.status.success());
}
