//! Certificate construction and re-checking.
//!
//! Certificates are built from the per-disjunct results and immediately
//! run through the proof kernel. A certificate the kernel rejects turns the
//! method that produced it into an `Error`; it is never reported as valid.

use std::time::{Duration, Instant};

use tracing::{error, info};

use serval_ir::ns::NetworkSystem;
use serval_proof_kernel::{
    check_bundle, CertificateBundle, DisjunctProof, TraceCertificate,
    CERTIFICATE_SCHEMA_VERSION, PROOF_KIND, TRACE_KIND,
};

use super::disjunct::{DisjunctRun, Outcome};
use super::{Method, PipelineOptions};
use crate::result::{MethodResult, Validity, Verdict};

pub(crate) struct Certification {
    pub certificate: Option<CertificateBundle>,
    pub proof_valid: Validity,
    pub trace_valid: Validity,
    pub issues: Vec<String>,
    pub creation_time: Duration,
    pub checking_time: Duration,
}

fn bundle(
    kind: &str,
    ns: &NetworkSystem,
    options: &PipelineOptions,
    disjuncts: Vec<DisjunctProof>,
    trace: Option<TraceCertificate>,
) -> CertificateBundle {
    CertificateBundle {
        schema_version: CERTIFICATE_SCHEMA_VERSION,
        kind: kind.to_string(),
        producer: options.producer(),
        system: ns.clone(),
        disjuncts,
        trace,
        bundle_sha256: None,
    }
}

/// The proofs of every disjunct, if the proof method proved all of them.
fn collect_proofs(runs: &[DisjunctRun]) -> Option<Vec<DisjunctProof>> {
    runs.iter()
        .map(|r| match r.outcome(Method::Proof) {
            Some(Outcome::Proven(proof)) => Some(proof.clone()),
            _ => None,
        })
        .collect()
}

/// Lowest-id counterexample, preferring the order methods ran in.
fn first_counterexample(runs: &[DisjunctRun]) -> Option<TraceCertificate> {
    runs.iter().find_map(|r| {
        r.outcomes.iter().find_map(|(_, o)| match o {
            Outcome::Counterexample(cert) => Some(cert.clone()),
            _ => None,
        })
    })
}

fn demote(methods: &mut [MethodResult], from: Verdict, only: Option<Method>, reason: &str) {
    for m in methods
        .iter_mut()
        .filter(|m| m.verdict == from && only.map_or(true, |only| m.method == only))
    {
        m.verdict = Verdict::Error;
        m.reason = Some(reason.to_string());
    }
}

/// Build the certificate for the methods' answer and check it. Method
/// verdicts whose certificate fails the check are demoted to `Error`.
pub(crate) fn certify(
    ns: &NetworkSystem,
    runs: &[DisjunctRun],
    methods: &mut [MethodResult],
    options: &PipelineOptions,
) -> Certification {
    let mut out = Certification {
        certificate: None,
        proof_valid: Validity::NotApplicable,
        trace_valid: Validity::NotApplicable,
        issues: Vec::new(),
        creation_time: Duration::ZERO,
        checking_time: Duration::ZERO,
    };
    let any = |verdict| methods.iter().any(|m: &MethodResult| m.verdict == verdict);

    let started = Instant::now();
    let built = if any(Verdict::NotSerializable) {
        first_counterexample(runs).map(|trace| bundle(TRACE_KIND, ns, options, Vec::new(), Some(trace)))
    } else if methods
        .iter()
        .any(|m| m.method == Method::Proof && m.verdict == Verdict::Serializable)
    {
        collect_proofs(runs).map(|proofs| bundle(PROOF_KIND, ns, options, proofs, None))
    } else {
        None
    };
    out.creation_time = started.elapsed();
    let Some(certificate) = built else {
        return out;
    };

    let started = Instant::now();
    let report = check_bundle(&certificate, false);
    out.checking_time = started.elapsed();
    let valid = Validity::from(report.is_ok());
    let summary = report.summary();
    info!(kind = %certificate.kind, %summary, "certificate checked");
    if !report.is_ok() {
        error!(kind = %certificate.kind, %summary, "engine produced an invalid certificate");
        out.issues = report
            .issues
            .iter()
            .map(|i| format!("[{}] {}", i.code, i.message))
            .collect();
    }

    if certificate.kind == PROOF_KIND {
        out.proof_valid = valid;
        if valid == Validity::Invalid {
            demote(methods, Verdict::Serializable, Some(Method::Proof), &summary);
        }
    } else {
        out.trace_valid = valid;
        if valid == Validity::Invalid {
            demote(methods, Verdict::NotSerializable, None, &summary);
        }
    }
    out.certificate = Some(certificate);
    out
}
