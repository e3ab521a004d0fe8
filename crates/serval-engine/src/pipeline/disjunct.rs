//! Per-disjunct decision state machine.
//!
//! `Init -> Reducing -> BuildingInvariant -> QueryingOracle ->
//! {ProofPath | DisproofPath | Timeout} -> Verified | Inconclusive`
//!
//! Every disjunct owns its reduced net and invariant; only the unreduced
//! net, the serial analysis and the oracle are shared, read-only.

use std::fmt;
use std::time::Instant;

use tracing::debug;

use serval_ir::petri::{PetriNet, TransitionId};
use serval_ir::presburger::Conjunct;
use serval_ir::region::{Disjunct, SerialAnalysis};
use serval_oracle::{OracleVerdict, ReachabilityOracle};
use serval_proof_kernel::{DisjunctProof, TraceCertificate};

use super::timeout::{deadline_exceeded, remaining_timeout_secs, timeout_unknown_reason};
use super::{Method, PipelineOptions};
use crate::builder::{self, BuildOutcome};
use crate::reduction::{self, RemovalReport};
use crate::result::{DisjunctStatus, DisjunctSummary};
use crate::witness;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Init,
    Reducing,
    BuildingInvariant,
    QueryingOracle,
    ProofPath,
    DisproofPath,
    Timeout,
    Verified,
    Inconclusive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Reducing => "reducing",
            Phase::BuildingInvariant => "building_invariant",
            Phase::QueryingOracle => "querying_oracle",
            Phase::ProofPath => "proof_path",
            Phase::DisproofPath => "disproof_path",
            Phase::Timeout => "timeout",
            Phase::Verified => "verified",
            Phase::Inconclusive => "inconclusive",
        })
    }
}

/// How one method ended on one disjunct.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// The oracle showed the disjunct unreachable.
    Unreachable,
    /// An invariant excludes the disjunct.
    Proven(DisjunctProof),
    Counterexample(TraceCertificate),
    Timeout(String),
    /// Unreachable according to the oracle, but no certificate was found.
    Inconclusive(String),
    Failed(String),
    Skipped,
}

impl Outcome {
    pub(crate) fn is_verified(&self) -> bool {
        matches!(self, Outcome::Unreachable | Outcome::Proven(_))
    }

    pub(crate) fn status(&self) -> DisjunctStatus {
        match self {
            Outcome::Unreachable | Outcome::Proven(_) => DisjunctStatus::Verified,
            Outcome::Counterexample(_) => DisjunctStatus::Counterexample,
            Outcome::Timeout(_) => DisjunctStatus::Timeout,
            Outcome::Inconclusive(_) => DisjunctStatus::Inconclusive,
            Outcome::Failed(_) => DisjunctStatus::Error,
            Outcome::Skipped => DisjunctStatus::Skipped,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Outcome::Unreachable => "unreachable".into(),
            Outcome::Proven(_) => "proven".into(),
            Outcome::Counterexample(_) => "counterexample".into(),
            Outcome::Timeout(reason) | Outcome::Inconclusive(reason) | Outcome::Failed(reason) => {
                reason.clone()
            }
            Outcome::Skipped => "skipped after a counterexample elsewhere".into(),
        }
    }
}

/// Everything one disjunct produced.
#[derive(Debug, Clone)]
pub(crate) struct DisjunctRun {
    pub id: usize,
    pub region: Option<String>,
    pub reduction: RemovalReport,
    pub oracle_calls: u64,
    pub oracle_timeouts: u64,
    pub builder_nodes: usize,
    pub invariant_components: usize,
    pub invariant_periods: usize,
    pub outcomes: Vec<(Method, Outcome)>,
}

impl DisjunctRun {
    fn new(ctx: &DisjunctContext<'_>, disjunct: &Disjunct) -> Self {
        DisjunctRun {
            id: disjunct.id,
            region: disjunct.region.as_ref().map(|r| r.render(ctx.net)),
            reduction: RemovalReport::default(),
            oracle_calls: 0,
            oracle_timeouts: 0,
            builder_nodes: 0,
            invariant_components: 0,
            invariant_periods: 0,
            outcomes: Vec::new(),
        }
    }

    /// Placeholder for a disjunct never started.
    pub(crate) fn skipped(ctx: &DisjunctContext<'_>, disjunct: &Disjunct) -> Self {
        let mut run = DisjunctRun::new(ctx, disjunct);
        run.outcomes = ctx
            .options
            .strategy
            .methods()
            .iter()
            .map(|m| (*m, Outcome::Skipped))
            .collect();
        run
    }

    pub(crate) fn outcome(&self, method: Method) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, o)| o)
    }

    pub(crate) fn has_counterexample(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, Outcome::Counterexample(_)))
    }

    pub(crate) fn summary(&self) -> DisjunctSummary {
        DisjunctSummary {
            id: self.id,
            region: self.region.clone(),
            reduction: self.reduction.clone(),
            oracle_calls: self.oracle_calls,
            oracle_timeouts: self.oracle_timeouts,
            builder_nodes: self.builder_nodes,
            invariant_components: self.invariant_components,
            invariant_periods: self.invariant_periods,
            statuses: self.outcomes.iter().map(|(m, o)| (*m, o.status())).collect(),
        }
    }
}

/// Read-only inputs shared by every disjunct.
pub(crate) struct DisjunctContext<'a> {
    pub net: &'a PetriNet,
    pub analysis: &'a SerialAnalysis,
    pub oracle: &'a dyn ReachabilityOracle,
    pub options: &'a PipelineOptions,
    pub deadline: Option<Instant>,
}

struct Worker<'a, 'c> {
    ctx: &'c DisjunctContext<'a>,
    disjunct: &'c Disjunct,
    reduced: PetriNet,
    query: Option<Conjunct>,
    /// First oracle answer in this disjunct, reused by the proof fallback.
    oracle_answer: Option<OracleVerdict>,
    run: DisjunctRun,
}

/// Decide one disjunct with every method the strategy selects.
pub(crate) fn run_disjunct(ctx: &DisjunctContext<'_>, disjunct: &Disjunct) -> DisjunctRun {
    let id = disjunct.id;
    let enter = |phase: Phase| debug!(disjunct = id, %phase, "disjunct phase");
    enter(Phase::Init);
    let mut run = DisjunctRun::new(ctx, disjunct);

    enter(Phase::Reducing);
    let (reduced, report) = reduction::reduce(
        ctx.net,
        &disjunct.targets,
        ctx.options.bidirectional_pruning,
    );
    debug!(
        disjunct = id,
        places_after = report.places_after,
        transitions_after = report.transitions_after,
        iterations = report.pruning_iterations,
        "net reduced"
    );
    run.reduction = report;

    let query = match disjunct.query(&reduced) {
        Ok(q) => q,
        Err(e) => {
            let reason = format!("region query could not be built: {e}");
            run.outcomes = ctx
                .options
                .strategy
                .methods()
                .iter()
                .map(|m| (*m, Outcome::Failed(reason.clone())))
                .collect();
            return run;
        }
    };

    let mut worker = Worker {
        ctx,
        disjunct,
        reduced,
        query,
        oracle_answer: None,
        run,
    };
    for method in ctx.options.strategy.methods() {
        let outcome = if deadline_exceeded(ctx.deadline) {
            enter(Phase::Timeout);
            Outcome::Timeout(timeout_unknown_reason(&format!("Disjunct {id}")))
        } else {
            match method {
                Method::Oracle => worker.oracle_method(),
                Method::Proof => worker.proof_method(),
            }
        };
        enter(match &outcome {
            o if o.is_verified() => Phase::Verified,
            Outcome::Counterexample(_) => Phase::Verified,
            Outcome::Timeout(_) => Phase::Timeout,
            _ => Phase::Inconclusive,
        });
        worker.run.outcomes.push((*method, outcome));
    }
    worker.run
}

impl Worker<'_, '_> {
    fn id(&self) -> usize {
        self.disjunct.id
    }

    fn phase(&self, phase: Phase) {
        debug!(disjunct = self.id(), %phase, "disjunct phase");
    }

    /// Ask the oracle, once per disjunct.
    fn ask_oracle(&mut self, query: &Conjunct) -> Result<OracleVerdict, String> {
        if let Some(answer) = &self.oracle_answer {
            return Ok(answer.clone());
        }
        self.phase(Phase::QueryingOracle);
        // Each query gets at most what is left of the overall limit.
        let limit = remaining_timeout_secs(self.ctx.deadline);
        if limit == Some(0) {
            self.run.oracle_timeouts += 1;
            return Ok(OracleVerdict::Timeout);
        }
        self.run.oracle_calls += 1;
        let answer = self
            .ctx
            .oracle
            .query_with_limit(&self.reduced, query, limit)
            .map_err(|e| format!("{} oracle failed: {e}", self.ctx.oracle.name()))?;
        if answer == OracleVerdict::Timeout {
            self.run.oracle_timeouts += 1;
        }
        self.oracle_answer = Some(answer.clone());
        Ok(answer)
    }

    fn counterexample(&self, trace: &[TransitionId], source: &str) -> Outcome {
        self.phase(Phase::DisproofPath);
        match witness::confirm(self.ctx.net, self.ctx.analysis, self.disjunct, trace) {
            Ok(cert) => {
                debug!(disjunct = self.id(), steps = trace.len(), "counterexample confirmed");
                Outcome::Counterexample(cert)
            }
            Err(e) => Outcome::Failed(format!("{source} witness rejected: {e}")),
        }
    }

    fn oracle_method(&mut self) -> Outcome {
        let Some(query) = self.query.clone() else {
            // The region is empty: nothing to ask.
            return Outcome::Unreachable;
        };
        match self.ask_oracle(&query) {
            Ok(OracleVerdict::Reachable { trace }) => self.counterexample(&trace, "oracle"),
            Ok(OracleVerdict::Unreachable) => Outcome::Unreachable,
            Ok(OracleVerdict::Timeout) => Outcome::Timeout("SMPT Timeout".into()),
            Err(reason) => Outcome::Failed(reason),
        }
    }

    fn proof_method(&mut self) -> Outcome {
        self.phase(Phase::BuildingInvariant);
        let options = self.ctx.options.builder_options();
        let build = match builder::build(
            &self.reduced,
            self.query.as_ref(),
            &options,
            self.ctx.deadline,
        ) {
            Ok(build) => build,
            Err(e) => return Outcome::Failed(format!("invariant construction failed: {e}")),
        };
        self.run.builder_nodes = build.stats.nodes;
        match build.outcome {
            BuildOutcome::Invariant(invariant) => {
                self.phase(Phase::ProofPath);
                self.run.invariant_components = invariant.num_components();
                self.run.invariant_periods = invariant.num_periods();
                Outcome::Proven(DisjunctProof {
                    id: self.id(),
                    region: self.disjunct.region.clone(),
                    kept_transitions: self.reduced.transition_ids().into_iter().collect(),
                    invariant: invariant.to_global_invariants(),
                })
            }
            BuildOutcome::Reachable { trace, .. } => self.counterexample(&trace, "builder"),
            BuildOutcome::Exhausted { reason } => {
                debug!(disjunct = self.id(), %reason, "builder exhausted, asking the oracle");
                let Some(query) = self.query.clone() else {
                    return Outcome::Inconclusive(reason);
                };
                match self.ask_oracle(&query) {
                    Ok(OracleVerdict::Reachable { trace }) => self.counterexample(&trace, "oracle"),
                    Ok(OracleVerdict::Unreachable) => Outcome::Inconclusive(format!(
                        "{reason}; the oracle reports the disjunct unreachable but no certificate was built"
                    )),
                    Ok(OracleVerdict::Timeout) => {
                        Outcome::Timeout(format!("{reason}; SMPT Timeout"))
                    }
                    Err(reason) => Outcome::Failed(reason),
                }
            }
        }
    }
}
