#![doc = include_str!("../README.md")]

//! Minimal trusted checker for serval certificate bundles.
//!
//! Nothing produced by the engine is taken on faith except the recorded
//! network system and producer options. The Petri net, the serial set and
//! the disjuncts are recomputed here, and every claim in the bundle is
//! checked against the recomputation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use serval_ir::ns::NetworkSystem;
use serval_ir::petri::{PetriNet, PlaceId, TransitionId};
use serval_ir::presburger::Conjunct;
use serval_ir::region::{SerialAnalysis, SerialOptions};
use serval_ir::semilinear::SemilinearSet;

pub mod closure;
pub mod proof;
pub mod trace;

pub use trace::{completed_pairs, events_of, render_events, TraceEvent};

/// Current certificate schema version; the checker accepts exactly this one.
pub const CERTIFICATE_SCHEMA_VERSION: u32 = 1;

pub const PROOF_KIND: &str = "serializability_proof";
pub const TRACE_KIND: &str = "counterexample_trace";

const CERTIFICATE_HASH_DOMAIN_TAG: &str = "serval-certificate-v1\n";

/// Options of the producing run that influence the recomputed disjuncts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProducerOptions {
    /// Producer name and version, informational only.
    pub tool: String,
    pub bidirectional_pruning: bool,
    pub serial: SerialOptions,
}

/// Per-global part of an invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GlobalInvariant {
    pub global: PlaceId,
    pub set: SemilinearSet,
}

/// Proof payload for one disjunct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DisjunctProof {
    pub id: usize,
    /// The disjunct's region as the producer computed it.
    pub region: Option<Conjunct>,
    /// Transitions of the reduced net the invariant is closed under.
    pub kept_transitions: Vec<TransitionId>,
    pub invariant: Vec<GlobalInvariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct CompletedPair {
    pub request: String,
    pub response: String,
    pub count: u64,
}

/// Counterexample payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TraceCertificate {
    /// Disjunct the final marking witnesses.
    pub disjunct: usize,
    /// Firing sequence on the unreduced net.
    pub transitions: Vec<TransitionId>,
    pub events: Vec<TraceEvent>,
    pub completed: Vec<CompletedPair>,
}

/// Contents of `certificate.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CertificateBundle {
    pub schema_version: u32,
    /// [`PROOF_KIND`] or [`TRACE_KIND`].
    pub kind: String,
    pub producer: ProducerOptions,
    pub system: NetworkSystem,
    #[serde(default)]
    pub disjuncts: Vec<DisjunctProof>,
    #[serde(default)]
    pub trace: Option<TraceCertificate>,
    /// Integrity hash of everything else in the bundle.
    #[serde(default)]
    pub bundle_sha256: Option<String>,
}

/// One problem found while checking a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleCheckIssue {
    /// Stable machine-readable issue code.
    pub code: &'static str,
    pub message: String,
}

impl BundleCheckIssue {
    pub(crate) fn new(code: &'static str, message: impl Into<String>) -> Self {
        BundleCheckIssue {
            code,
            message: message.into(),
        }
    }
}

/// The three proof obligations, recorded separately so a failure names
/// which one broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProofChecks {
    pub initial_state_ok: bool,
    pub inductive_ok: bool,
    pub implies_serializable_ok: bool,
}

impl ProofChecks {
    pub fn all_ok(&self) -> bool {
        self.initial_state_ok && self.inductive_ok && self.implies_serializable_ok
    }
}

/// Outcome of checking one bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleReport {
    pub kind: String,
    pub issues: Vec<BundleCheckIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofChecks>,
}

impl BundleReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty() && self.proof.map_or(true, |p| p.all_ok())
    }

    /// One-line verdict, e.g. `Proof certificate is VALID`.
    pub fn summary(&self) -> String {
        let reasons = || {
            self.issues
                .iter()
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };
        match (self.kind.as_str(), self.is_ok()) {
            (PROOF_KIND, true) => "Proof certificate is VALID".into(),
            (PROOF_KIND, false) => format!("Proof certificate is INVALID: {}", reasons()),
            (TRACE_KIND, true) => "Trace is valid".into(),
            (TRACE_KIND, false) => format!("Trace is INVALID: {}", reasons()),
            (_, _) => format!("Certificate is INVALID: {}", reasons()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProofKernelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid certificate JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything recomputed from the recorded system.
pub(crate) struct Recomputed {
    pub net: PetriNet,
    pub analysis: SerialAnalysis,
}

pub fn metadata_path(bundle_dir: &Path) -> PathBuf {
    bundle_dir.join("certificate.json")
}

pub fn load_bundle(bundle_dir: &Path) -> Result<CertificateBundle, ProofKernelError> {
    let text = fs::read_to_string(metadata_path(bundle_dir))?;
    Ok(serde_json::from_str(&text)?)
}

/// Stamp the bundle hash and write `certificate.json` into `bundle_dir`.
pub fn write_bundle(
    bundle_dir: &Path,
    bundle: &CertificateBundle,
) -> Result<PathBuf, ProofKernelError> {
    fs::create_dir_all(bundle_dir)?;
    let mut stamped = bundle.clone();
    stamped.bundle_sha256 = Some(compute_bundle_sha256(bundle)?);
    let path = metadata_path(bundle_dir);
    fs::write(&path, serde_json::to_string_pretty(&stamped)?)?;
    Ok(path)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hash of the bundle with its own hash field cleared, under a domain tag.
pub fn compute_bundle_sha256(bundle: &CertificateBundle) -> Result<String, ProofKernelError> {
    let mut unstamped = bundle.clone();
    unstamped.bundle_sha256 = None;
    let mut hasher = Sha256::new();
    hasher.update(CERTIFICATE_HASH_DOMAIN_TAG.as_bytes());
    hasher.update(serde_json::to_vec(&unstamped)?);
    Ok(hex(&hasher.finalize()))
}

/// Check a bundle already in memory. `require_hash` is off for bundles
/// the engine has just built and not yet stamped.
pub fn check_bundle(bundle: &CertificateBundle, require_hash: bool) -> BundleReport {
    let mut issues = Vec::new();

    if bundle.schema_version != CERTIFICATE_SCHEMA_VERSION {
        issues.push(BundleCheckIssue::new(
            "schema_version",
            format!(
                "Unsupported certificate schema version {} (expected exactly {})",
                bundle.schema_version, CERTIFICATE_SCHEMA_VERSION
            ),
        ));
    }
    match (&bundle.bundle_sha256, compute_bundle_sha256(bundle)) {
        (Some(recorded), Ok(actual)) if *recorded != actual => issues.push(BundleCheckIssue::new(
            "bundle_hash_mismatch",
            format!("Bundle hash mismatch (recorded {recorded}, computed {actual})"),
        )),
        (None, _) if require_hash => issues.push(BundleCheckIssue::new(
            "missing_bundle_hash",
            "Bundle has no bundle_sha256",
        )),
        (_, Err(e)) => issues.push(BundleCheckIssue::new(
            "bundle_hash_error",
            format!("Bundle could not be hashed: {e}"),
        )),
        _ => {}
    }

    let recomputed = match recompute(bundle) {
        Ok(r) => r,
        Err(issue) => {
            issues.push(issue);
            return BundleReport {
                kind: bundle.kind.clone(),
                issues,
                proof: None,
            };
        }
    };

    let proof = match bundle.kind.as_str() {
        PROOF_KIND => {
            if bundle.trace.is_some() {
                issues.push(BundleCheckIssue::new(
                    "unexpected_trace",
                    "Proof certificate carries a trace payload",
                ));
            }
            Some(proof::check(&recomputed, bundle, &mut issues))
        }
        TRACE_KIND => {
            if !bundle.disjuncts.is_empty() {
                issues.push(BundleCheckIssue::new(
                    "unexpected_disjuncts",
                    "Trace certificate carries proof payloads",
                ));
            }
            match &bundle.trace {
                Some(t) => trace::check(&recomputed, t, &mut issues),
                None => issues.push(BundleCheckIssue::new(
                    "missing_trace",
                    "Trace certificate has no trace payload",
                )),
            }
            None
        }
        other => {
            issues.push(BundleCheckIssue::new(
                "unknown_kind",
                format!("Unknown certificate kind '{other}'"),
            ));
            None
        }
    };

    BundleReport {
        kind: bundle.kind.clone(),
        issues,
        proof,
    }
}

/// Load and check the bundle stored in `bundle_dir`.
pub fn check_bundle_dir(bundle_dir: &Path) -> Result<BundleReport, ProofKernelError> {
    let bundle = load_bundle(bundle_dir)?;
    Ok(check_bundle(&bundle, true))
}

fn recompute(bundle: &CertificateBundle) -> Result<Recomputed, BundleCheckIssue> {
    let system = bundle
        .system
        .clone()
        .into_validated()
        .map_err(|e| BundleCheckIssue::new("invalid_system", format!("Recorded system is malformed: {e}")))?;
    let net = PetriNet::from_network_system(&system);
    let analysis = SerialAnalysis::compute(&system, &net, &bundle.producer.serial).map_err(|e| {
        BundleCheckIssue::new(
            "recompute_failed",
            format!("Serial set or region could not be recomputed: {e}"),
        )
    })?;
    Ok(Recomputed { net, analysis })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// One request type that can observe an intermediate global state.
    pub fn observe_system() -> NetworkSystem {
        let mut ns = NetworkSystem::new("G0");
        ns.add_request("R", "L0");
        ns.add_response("L1", "saw_G0");
        ns.add_response("L2", "saw_G1");
        ns.add_transition("L0", "G0", "L3", "G1");
        ns.add_transition("L3", "G1", "L0", "G0");
        ns.add_transition("L0", "G0", "L1", "G0");
        ns.add_transition("L0", "G1", "L2", "G1");
        ns
    }

    /// Requests answer without touching the global state.
    pub fn trivial_system() -> NetworkSystem {
        let mut ns = NetworkSystem::new("G0");
        ns.add_request("ping", "P");
        ns.add_request("get", "Q");
        ns.add_response("P", "pong");
        ns.add_response("Q", "value");
        ns
    }

    pub fn producer() -> ProducerOptions {
        ProducerOptions {
            tool: "serval-test".into(),
            bidirectional_pruning: true,
            serial: SerialOptions::default(),
        }
    }

    /// The trivial system's proof: its single disjunct is vacuous and the
    /// invariant is the initial marking alone.
    pub fn trivial_proof_bundle() -> CertificateBundle {
        let system = trivial_system();
        let net = PetriNet::from_network_system(&system);
        CertificateBundle {
            schema_version: CERTIFICATE_SCHEMA_VERSION,
            kind: PROOF_KIND.into(),
            producer: producer(),
            system,
            disjuncts: vec![DisjunctProof {
                id: 0,
                region: None,
                kept_transitions: vec![],
                invariant: vec![GlobalInvariant {
                    global: net.initial_global(),
                    set: SemilinearSet::from_components(vec![
                        serval_ir::semilinear::LinearSet::singleton(Default::default()),
                    ]),
                }],
            }],
            trace: None,
            bundle_sha256: None,
        }
    }
}
