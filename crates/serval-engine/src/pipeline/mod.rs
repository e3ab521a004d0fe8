//! The serializability check, end to end.
//!
//! `check` translates the system into a Petri net, computes the serial set
//! and the disjuncts of its complement, decides every disjunct with the
//! selected methods on a worker pool, cross-checks the methods and finally
//! builds and re-checks a certificate for the answer.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use serval_dsl::errors::ParseError;
use serval_ir::lowering::{self, LoweringError};
use serval_ir::ns::{NetworkSystem, NsError};
use serval_ir::petri::PetriNet;
use serval_ir::kleene;
use serval_ir::presburger::{self, PresburgerError};
use serval_ir::region::{SerialAnalysis, SerialOptions};
use serval_oracle::{OracleError, ReachabilityOracle};
use serval_proof_kernel::{ProducerOptions, ProofKernelError};

use crate::builder::{BuilderOptions, DEFAULT_MAX_NODES, DEFAULT_MAX_PERIODS, DEFAULT_WITNESS_SEARCH_LIMIT};
use crate::explicit::{ExplicitConfig, DEFAULT_MAX_DEPTH, DEFAULT_MAX_MARKINGS};
use crate::result::{CheckOutcome, MethodResult, Verdict};

pub(crate) mod certification;
pub(crate) mod disjunct;
pub(crate) mod orchestration;
pub(crate) mod timeout;

use disjunct::{DisjunctContext, DisjunctRun};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Lowering error: {0}")]
    Lowering(#[from] LoweringError),
    #[error("Input error: {0}")]
    Input(#[from] NsError),
    #[error("Presburger error: {0}")]
    Presburger(#[from] PresburgerError),
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] ProofKernelError),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// One decision method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Ask the oracle whether the disjunct is reachable.
    Oracle,
    /// Build an invariant and certify it.
    Proof,
}

impl Method {
    pub fn label(&self) -> &'static str {
        match self {
            Method::Oracle => "Original method",
            Method::Proof => "Proof-based method",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which methods a check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Oracle,
    Proof,
    /// Both methods, cross-checked for agreement.
    #[default]
    Both,
}

impl Strategy {
    /// Methods in the order they run inside a disjunct.
    pub fn methods(&self) -> &'static [Method] {
        match self {
            Strategy::Oracle => &[Method::Oracle],
            Strategy::Proof => &[Method::Proof],
            Strategy::Both => &[Method::Oracle, Method::Proof],
        }
    }
}

/// Options for the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub bidirectional_pruning: bool,
    pub remove_redundant: bool,
    pub generate_less: bool,
    pub smart_kleene_order: bool,
    /// Oracle timeout in seconds, `0` for none.
    pub timeout_secs: u64,
    /// Wall-clock limit for the whole check, `0` for none.
    pub overall_timeout_secs: u64,
    /// Disjuncts decided concurrently.
    pub jobs: usize,
    pub max_nodes: usize,
    pub max_periods: usize,
    pub max_conjuncts: usize,
    /// Largest intermediate semilinear set built while computing `Ser`.
    pub max_components: usize,
    pub witness_search_limit: usize,
    /// Longest firing sequence the explicit oracle explores.
    pub max_trace_len: usize,
    /// Markings the explicit oracle may store.
    pub max_markings: usize,
    pub strategy: Strategy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            bidirectional_pruning: true,
            remove_redundant: true,
            generate_less: true,
            smart_kleene_order: true,
            timeout_secs: 0,
            overall_timeout_secs: 0,
            jobs: 1,
            max_nodes: DEFAULT_MAX_NODES,
            max_periods: DEFAULT_MAX_PERIODS,
            max_conjuncts: presburger::DEFAULT_MAX_CONJUNCTS,
            max_components: kleene::DEFAULT_MAX_SIZE,
            witness_search_limit: DEFAULT_WITNESS_SEARCH_LIMIT,
            max_trace_len: DEFAULT_MAX_DEPTH,
            max_markings: DEFAULT_MAX_MARKINGS,
            strategy: Strategy::Both,
        }
    }
}

impl PipelineOptions {
    pub fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            smart_kleene_order: self.smart_kleene_order,
            generate_less: self.generate_less,
            remove_redundant: self.remove_redundant,
            max_conjuncts: self.max_conjuncts,
            max_components: self.max_components,
        }
    }

    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            max_nodes: self.max_nodes,
            max_periods: self.max_periods,
            witness_search_limit: self.witness_search_limit,
            remove_redundant: self.remove_redundant,
            budget: self.serial_options().budget(),
            ..BuilderOptions::default()
        }
    }

    /// Settings for the in-process oracle matching these options.
    pub fn explicit_config(&self) -> ExplicitConfig {
        ExplicitConfig {
            max_markings: self.max_markings,
            max_depth: self.max_trace_len,
            timeout: timeout::overall_timeout_duration(self.timeout_secs),
            builder: self.builder_options(),
        }
    }

    /// What a certificate records about the producing run.
    pub fn producer(&self) -> ProducerOptions {
        ProducerOptions {
            tool: format!("serval {}", env!("CARGO_PKG_VERSION")),
            bidirectional_pruning: self.bidirectional_pruning,
            serial: self.serial_options(),
        }
    }
}

/// Read a network system: `.ser` sources are parsed and lowered, anything
/// else is taken to be JSON.
pub fn parse_system(source: &str, filename: &str) -> Result<NetworkSystem, PipelineError> {
    let is_ser = Path::new(filename)
        .extension()
        .is_some_and(|ext| ext == "ser");
    if is_ser {
        info!("Parsing {filename}...");
        let program = serval_dsl::parse(source, filename)?;
        info!("Lowering to a network system...");
        let ns = lowering::lower_program(&program, lowering::DEFAULT_MAX_STATES)?;
        Ok(ns.into_validated()?)
    } else {
        Ok(NetworkSystem::from_json_str(source)?)
    }
}

/// Parse `source` and check it.
pub fn check_source(
    source: &str,
    filename: &str,
    oracle: &dyn ReachabilityOracle,
    options: &PipelineOptions,
) -> Result<CheckOutcome, PipelineError> {
    let ns = parse_system(source, filename)?;
    check(&ns, oracle, options)
}

/// Decide whether `ns` is serializable.
pub fn check(
    ns: &NetworkSystem,
    oracle: &dyn ReachabilityOracle,
    options: &PipelineOptions,
) -> Result<CheckOutcome, PipelineError> {
    let started = Instant::now();
    let deadline = timeout::deadline_from_timeout_secs(options.overall_timeout_secs);

    let net = PetriNet::from_network_system(ns);
    info!(
        places = net.places().len(),
        transitions = net.transitions().len(),
        "Petri net built"
    );
    let analysis = SerialAnalysis::compute(ns, &net, &options.serial_options())?;
    info!(
        disjuncts = analysis.disjuncts.len(),
        components = analysis.serial_set.components.len(),
        "serial set and region computed"
    );

    let ctx = DisjunctContext {
        net: &net,
        analysis: &analysis,
        oracle,
        options,
        deadline,
    };
    let runs = orchestration::run_disjuncts(&ctx, &analysis.disjuncts);

    let mut methods: Vec<MethodResult> = options
        .strategy
        .methods()
        .iter()
        .map(|m| combine(*m, &runs))
        .collect();
    let certification = certification::certify(ns, &runs, &mut methods, options);
    let verdict = reconcile(&methods);
    info!(%verdict, "check finished");

    Ok(CheckOutcome {
        verdict,
        methods,
        disjuncts: runs.iter().map(DisjunctRun::summary).collect(),
        serial_set: analysis.serial_set.clone(),
        places_before: net.places().len(),
        transitions_before: net.transitions().len(),
        certificate: certification.certificate,
        proof_certificate_valid: certification.proof_valid,
        trace_valid: certification.trace_valid,
        certificate_issues: certification.issues,
        oracle: oracle.stats(),
        certificate_creation_time: certification.creation_time,
        certificate_checking_time: certification.checking_time,
        total_time: started.elapsed(),
    })
}

/// Fold one method's per-disjunct outcomes into its verdict. A single
/// counterexample decides; otherwise failures outrank undecided disjuncts.
pub(crate) fn combine(method: Method, runs: &[DisjunctRun]) -> MethodResult {
    use disjunct::Outcome;

    let outcomes = || runs.iter().filter_map(move |r| r.outcome(method).map(|o| (r.id, o)));
    let result = |verdict, reason: Option<String>| MethodResult {
        method,
        verdict,
        reason,
    };

    if let Some((id, _)) = outcomes().find(|(_, o)| matches!(o, Outcome::Counterexample(_))) {
        return result(
            Verdict::NotSerializable,
            Some(format!("counterexample in disjunct {id}")),
        );
    }
    if let Some((id, Outcome::Failed(reason))) =
        outcomes().find(|(_, o)| matches!(o, Outcome::Failed(_)))
    {
        return result(Verdict::Error, Some(format!("disjunct {id}: {reason}")));
    }
    if let Some((id, o)) = outcomes().find(|(_, o)| !o.is_verified()) {
        return result(Verdict::Timeout, Some(format!("disjunct {id}: {}", o.describe())));
    }
    result(Verdict::Serializable, None)
}

/// The system verdict from the method verdicts. Conclusive answers that
/// disagree are an engine defect and yield `Error`.
pub(crate) fn reconcile(methods: &[MethodResult]) -> Verdict {
    let conclusive: Vec<&MethodResult> =
        methods.iter().filter(|m| m.verdict.is_conclusive()).collect();
    match conclusive.as_slice() {
        [] => {
            if methods.iter().any(|m| m.verdict == Verdict::Error) {
                Verdict::Error
            } else {
                Verdict::Timeout
            }
        }
        [first, rest @ ..] => {
            if let Some(other) = rest.iter().find(|m| m.verdict != first.verdict) {
                tracing::error!(
                    first = %first.method,
                    first_verdict = %first.verdict,
                    second = %other.method,
                    second_verdict = %other.verdict,
                    "decision methods disagree"
                );
                return Verdict::Error;
            }
            for m in methods.iter().filter(|m| !m.verdict.is_conclusive()) {
                tracing::warn!(method = %m.method, verdict = %m.verdict, "method was not conclusive");
            }
            first.verdict
        }
    }
}
