//! `serval FILE`: run the serializability check and report.

use miette::IntoDiagnostic;
use tracing::{info, warn};

use serval_engine::explicit::ExplicitOracle;
use serval_engine::{check, CheckOutcome, PipelineOptions, StatsReport};
use serval_oracle::{ReachabilityOracle, SmptConfig, SmptOracle};
use serval_proof_kernel::{render_events, write_bundle};

use super::helpers::{example_name, load_system, pipeline_diagnostic, write_json_artifact};
use crate::cli::{Cli, OracleKind};

pub(crate) fn pipeline_options_from_cli(cli: &Cli) -> PipelineOptions {
    let mut options = PipelineOptions {
        bidirectional_pruning: !cli.without_bidirectional,
        remove_redundant: !cli.without_remove_redundant,
        generate_less: !cli.without_generate_less,
        smart_kleene_order: !cli.without_smart_kleene_order,
        timeout_secs: cli.timeout,
        overall_timeout_secs: cli.overall_timeout,
        jobs: cli.jobs.max(1),
        strategy: cli.method.into(),
        ..PipelineOptions::default()
    };
    if let Some(max_nodes) = cli.max_nodes {
        options.max_nodes = max_nodes;
    }
    if let Some(max_trace_len) = cli.max_trace_len {
        options.max_trace_len = max_trace_len;
    }
    options
}

pub(crate) fn smpt_config_from_cli(cli: &Cli) -> miette::Result<SmptConfig> {
    let mut config = SmptConfig {
        timeout_secs: cli.timeout,
        use_cache: cli.use_cache,
        ..SmptConfig::default()
    };
    if let Some(raw) = &cli.smpt_command {
        let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            miette::bail!("--smpt-command must name a program");
        }
        config.command = Some(parts);
    }
    if !cli.smpt_methods.is_empty() {
        config.methods = cli.smpt_methods.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    Ok(config)
}

fn oracle_from_cli(
    cli: &Cli,
    options: &PipelineOptions,
) -> miette::Result<Box<dyn ReachabilityOracle>> {
    match cli.oracle {
        OracleKind::Explicit => {
            if cli.use_cache {
                warn!("--use-cache only applies to the SMPT oracle; ignoring it");
            }
            Ok(Box::new(ExplicitOracle::new(options.explicit_config())))
        }
        OracleKind::Smpt => {
            let config = smpt_config_from_cli(cli)?;
            let oracle = SmptOracle::new(config)
                .map_err(|e| miette::miette!("Cannot start the SMPT oracle: {e}"))?;
            Ok(Box::new(oracle))
        }
    }
}

fn render_text(outcome: &CheckOutcome) -> String {
    let mut out = format!("{outcome}\n");
    if let Some(trace) = outcome.certificate.as_ref().and_then(|c| c.trace.as_ref()) {
        out.push_str("Counterexample:\n");
        out.push_str(&render_events(&trace.events));
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(&format!(
        "Total time: {} ms\n",
        outcome.total_time.as_millis()
    ));
    out
}

pub(crate) fn run_check_command(cli: &Cli) -> miette::Result<()> {
    let (ns, filename) = load_system(&cli.file)?;
    let options = pipeline_options_from_cli(cli);
    let oracle = oracle_from_cli(cli, &options)?;
    info!(file = %filename, oracle = oracle.name(), "checking serializability");

    let outcome = check(&ns, oracle.as_ref(), &options).map_err(pipeline_diagnostic)?;
    let report = StatsReport::new(&example_name(&cli.file), &options, &outcome);

    if let Some(path) = &cli.stats_out {
        write_json_artifact(path, &report)?;
        info!(path = %path.display(), "statistics written");
    }

    if let Some(dir) = &cli.create_certificate {
        match &outcome.certificate {
            Some(bundle) => {
                let path = write_bundle(dir, bundle).into_diagnostic()?;
                info!(path = %path.display(), kind = %bundle.kind, "certificate written");
            }
            None => warn!(
                verdict = %outcome.verdict,
                "no certificate to write for this result"
            ),
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    } else {
        print!("{}", render_text(&outcome));
    }
    Ok(())
}
