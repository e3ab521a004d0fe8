#![doc = include_str!("../README.md")]

use std::path::{Path, PathBuf};

use clap::Parser;
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use serval_proof_kernel::{check_bundle, load_bundle, ProofChecks, CERTIFICATE_SCHEMA_VERSION};

#[derive(Debug, Parser)]
#[command(
    name = "serval-certcheck",
    about = "Standalone checker for serval certificate bundles"
)]
#[command(version)]
struct Cli {
    /// Path to the certificate bundle directory.
    bundle: PathBuf,

    /// Print the report as JSON instead of the one-line summary.
    #[arg(long)]
    json: bool,

    /// Also write the JSON report to this file.
    #[arg(long, value_name = "PATH")]
    json_report: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CheckerReport {
    schema_version: u32,
    checker: String,
    bundle: String,
    cert_kind: String,
    producer: String,
    disjuncts: usize,
    trace_len: Option<usize>,
    issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proof: Option<ProofChecks>,
    summary: String,
    overall: String,
}

impl CheckerReport {
    fn passed(&self) -> bool {
        self.overall == "pass"
    }
}

fn check_dir(dir: &Path) -> miette::Result<CheckerReport> {
    let bundle = load_bundle(dir)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("cannot load {}", dir.display())))?;
    debug!(kind = %bundle.kind, producer = %bundle.producer.tool, "bundle loaded");

    let report = check_bundle(&bundle, true);
    let issues: Vec<String> = report
        .issues
        .iter()
        .map(|issue| format!("[{}] {}", issue.code, issue.message))
        .collect();
    for line in &issues {
        warn!("{line}");
    }
    let overall = if report.is_ok() { "pass" } else { "fail" };
    Ok(CheckerReport {
        schema_version: CERTIFICATE_SCHEMA_VERSION,
        checker: format!("serval-certcheck {}", env!("CARGO_PKG_VERSION")),
        bundle: dir.display().to_string(),
        cert_kind: bundle.kind.clone(),
        producer: bundle.producer.tool.clone(),
        disjuncts: bundle.disjuncts.len(),
        trace_len: bundle.trace.as_ref().map(|t| t.transitions.len()),
        issues,
        proof: report.proof,
        summary: report.summary(),
        overall: overall.to_string(),
    })
}

fn write_report(path: &Path, report: &CheckerReport) -> miette::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).into_diagnostic()?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report).into_diagnostic()?)
        .into_diagnostic()
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let report = check_dir(&cli.bundle)?;

    if let Some(path) = &cli.json_report {
        write_report(path, &report)?;
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else {
        println!("{}", report.summary);
    }

    if report.passed() {
        Ok(())
    } else {
        miette::bail!("Certificate check FAILED.");
    }
}
