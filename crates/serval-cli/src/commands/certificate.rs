//! `serval --check-certificate DIR FILE`: re-check a stored certificate
//! against the system it claims to be about.

use std::path::Path;

use miette::IntoDiagnostic;
use tracing::info;

use serval_ir::ns::NetworkSystem;
use serval_proof_kernel::{check_bundle, load_bundle, BundleCheckIssue, BundleReport};

use super::helpers::load_system;

/// Check the bundle in `dir` and that it was produced for `ns`.
pub(crate) fn check_certificate_against(
    dir: &Path,
    ns: &NetworkSystem,
) -> miette::Result<BundleReport> {
    let bundle = load_bundle(dir)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("cannot load certificate from {}", dir.display())))?;
    let mut report = check_bundle(&bundle, true);
    if bundle.system != *ns {
        report.issues.push(BundleCheckIssue {
            code: "system_mismatch",
            message: "Certificate was produced for a different network system".into(),
        });
    }
    Ok(report)
}

pub(crate) fn run_check_certificate_command(
    dir: &Path,
    file: &Path,
    json: bool,
) -> miette::Result<()> {
    let (ns, filename) = load_system(file)?;
    let report = check_certificate_against(dir, &ns)?;
    info!(
        bundle = %dir.display(),
        file = %filename,
        issues = report.issues.len(),
        "certificate checked"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else {
        println!("{}", report.summary());
    }
    if report.is_ok() {
        Ok(())
    } else {
        miette::bail!("Certificate check FAILED.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serval_engine::explicit::ExplicitOracle;
    use serval_engine::{check, PipelineOptions};
    use serval_proof_kernel::write_bundle;

    fn trivial() -> NetworkSystem {
        let mut ns = NetworkSystem::new("G0");
        ns.add_request("ping", "P");
        ns.add_response("P", "pong");
        ns
    }

    fn certified(ns: &NetworkSystem, dir: &Path) {
        let options = PipelineOptions::default();
        let oracle = ExplicitOracle::new(options.explicit_config());
        let outcome = check(ns, &oracle, &options).unwrap();
        write_bundle(dir, outcome.certificate.as_ref().unwrap()).unwrap();
    }

    #[test]
    fn stored_proof_checks_against_its_system() {
        let dir = tempfile::tempdir().unwrap();
        let ns = trivial();
        certified(&ns, dir.path());
        let report = check_certificate_against(dir.path(), &ns).unwrap();
        assert!(report.is_ok(), "{}", report.summary());
        assert_eq!(report.summary(), "Proof certificate is VALID");
    }

    #[test]
    fn certificate_for_another_system_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        certified(&trivial(), dir.path());
        let mut other = trivial();
        other.add_request("get", "Q");
        other.add_response("Q", "value");
        let report = check_certificate_against(dir.path(), &other).unwrap();
        assert!(!report.is_ok());
        assert!(report.issues.iter().any(|i| i.code == "system_mismatch"));
        assert!(report.summary().starts_with("Proof certificate is INVALID"));
    }

    #[test]
    fn missing_bundle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_certificate_against(&dir.path().join("absent"), &trivial()).is_err());
    }
}
