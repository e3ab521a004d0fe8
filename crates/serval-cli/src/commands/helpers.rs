// Shared helpers for the command handlers: reading models, turning
// pipeline errors into diagnostics and writing JSON artifacts.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;

use serval_engine::{parse_system, PipelineError};
use serval_ir::ns::NetworkSystem;

/// Convert a pipeline error into a diagnostic. Parse errors keep their
/// source snippet and labels.
pub(crate) fn pipeline_diagnostic(err: PipelineError) -> miette::Report {
    match err {
        PipelineError::Parse(e) => miette::Report::new(e),
        other => miette::miette!("{other}"),
    }
}

/// Read and parse the network system in `path`.
pub(crate) fn load_system(path: &Path) -> miette::Result<(NetworkSystem, String)> {
    let source = fs::read_to_string(path)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("cannot read {}", path.display())))?;
    let filename = path.display().to_string();
    let ns = parse_system(&source, &filename).map_err(pipeline_diagnostic)?;
    Ok((ns, filename))
}

/// Name used for the `example` field of reports.
pub(crate) fn example_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> miette::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    fs::write(path, serde_json::to_string_pretty(value).into_diagnostic()?).into_diagnostic()
}
