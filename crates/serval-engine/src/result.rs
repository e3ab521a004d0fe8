use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serval_ir::semilinear::SemilinearSet;
use serval_oracle::OracleStats;
use serval_proof_kernel::CertificateBundle;

use crate::pipeline::{Method, PipelineOptions};
use crate::reduction::RemovalReport;

/// System-level answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Serializable,
    NotSerializable,
    /// Some disjunct stayed undecided; never read as either answer.
    Timeout,
    Error,
}

impl Verdict {
    pub fn is_conclusive(&self) -> bool {
        matches!(self, Verdict::Serializable | Verdict::NotSerializable)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Serializable => "Serializable",
            Verdict::NotSerializable => "Not serializable",
            Verdict::Timeout => "SMPT Timeout",
            Verdict::Error => "Error",
        })
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of checking a certificate, or `N/A` when none was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
    NotApplicable,
}

impl From<bool> for Validity {
    fn from(ok: bool) -> Self {
        if ok {
            Validity::Valid
        } else {
            Validity::Invalid
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Validity::Valid => "true",
            Validity::Invalid => "false",
            Validity::NotApplicable => "N/A",
        })
    }
}

impl Serialize for Validity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Validity::Valid => serializer.serialize_bool(true),
            Validity::Invalid => serializer.serialize_bool(false),
            Validity::NotApplicable => serializer.serialize_str("N/A"),
        }
    }
}

/// Verdict of one decision method over all disjuncts.
#[derive(Debug, Clone, Serialize)]
pub struct MethodResult {
    pub method: Method,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// How one method ended on one disjunct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisjunctStatus {
    /// Unreachable, with a proof when the proof method produced it.
    Verified,
    Counterexample,
    Timeout,
    Inconclusive,
    Error,
    /// Not started because another disjunct already had a counterexample.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisjunctSummary {
    pub id: usize,
    /// Region rendered with place names; `None` for a vacuous disjunct.
    pub region: Option<String>,
    pub reduction: RemovalReport,
    pub oracle_calls: u64,
    pub oracle_timeouts: u64,
    pub builder_nodes: usize,
    pub invariant_components: usize,
    pub invariant_periods: usize,
    pub statuses: Vec<(Method, DisjunctStatus)>,
}

/// Everything a check produces.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub methods: Vec<MethodResult>,
    pub disjuncts: Vec<DisjunctSummary>,
    pub serial_set: SemilinearSet,
    pub places_before: usize,
    pub transitions_before: usize,
    /// Proof or trace bundle, unstamped, when one was built.
    pub certificate: Option<CertificateBundle>,
    pub proof_certificate_valid: Validity,
    pub trace_valid: Validity,
    /// Kernel messages when the certificate failed its check.
    pub certificate_issues: Vec<String>,
    pub oracle: OracleStats,
    pub certificate_creation_time: Duration,
    pub certificate_checking_time: Duration,
    pub total_time: Duration,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.methods {
            write!(f, "{}: {}", m.method.label(), m.verdict)?;
            if let Some(reason) = &m.reason {
                write!(f, " ({reason})")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "Result: {}", self.verdict)?;
        writeln!(f, "Proof certificate valid: {}", self.proof_certificate_valid)?;
        write!(f, "Trace valid: {}", self.trace_valid)?;
        for issue in &self.certificate_issues {
            write!(f, "\n  {issue}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionsReport {
    pub bidirectional_pruning: bool,
    pub remove_redundant: bool,
    pub generate_less: bool,
    pub smart_kleene_order: bool,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStats {
    pub periods: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemilinearStats {
    pub num_components: usize,
    pub components: Vec<ComponentStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisjunctNetStats {
    pub id: usize,
    pub places_after: usize,
    pub transitions_after: usize,
    pub pruning_iterations: usize,
    pub removed_places: usize,
    pub removed_transitions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PetriNetStats {
    pub places_before: usize,
    pub transitions_before: usize,
    pub disjuncts: Vec<DisjunctNetStats>,
}

/// Machine-readable run summary written by `--json` and `--stats-out`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub timestamp: u64,
    pub example: String,
    pub options: OptionsReport,
    pub result: Verdict,
    pub proof_certificate_valid: Validity,
    pub trace_valid: Validity,
    pub certificate_creation_time_ms: u64,
    pub certificate_checking_time_ms: u64,
    pub num_disjuncts: usize,
    pub total_time_ms: u64,
    pub smpt_calls: u64,
    pub smpt_timeouts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub semilinear_set: SemilinearStats,
    pub petri_net: PetriNetStats,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl StatsReport {
    pub fn new(example: &str, options: &PipelineOptions, outcome: &CheckOutcome) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        StatsReport {
            timestamp,
            example: example.to_string(),
            options: OptionsReport {
                bidirectional_pruning: options.bidirectional_pruning,
                remove_redundant: options.remove_redundant,
                generate_less: options.generate_less,
                smart_kleene_order: options.smart_kleene_order,
                timeout: options.timeout_secs,
            },
            result: outcome.verdict,
            proof_certificate_valid: outcome.proof_certificate_valid,
            trace_valid: outcome.trace_valid,
            certificate_creation_time_ms: millis(outcome.certificate_creation_time),
            certificate_checking_time_ms: millis(outcome.certificate_checking_time),
            num_disjuncts: outcome.disjuncts.len(),
            total_time_ms: millis(outcome.total_time),
            smpt_calls: outcome.oracle.calls,
            smpt_timeouts: outcome.oracle.timeouts,
            cache_hits: outcome.oracle.cache_hits,
            cache_misses: outcome.oracle.cache_misses,
            semilinear_set: SemilinearStats {
                num_components: outcome.serial_set.components.len(),
                components: outcome
                    .serial_set
                    .components
                    .iter()
                    .map(|c| ComponentStats {
                        periods: c.periods.len(),
                    })
                    .collect(),
            },
            petri_net: PetriNetStats {
                places_before: outcome.places_before,
                transitions_before: outcome.transitions_before,
                disjuncts: outcome
                    .disjuncts
                    .iter()
                    .map(|d| DisjunctNetStats {
                        id: d.id,
                        places_after: d.reduction.places_after,
                        transitions_after: d.reduction.transitions_after,
                        pruning_iterations: d.reduction.pruning_iterations,
                        removed_places: d.reduction.removed_places.len(),
                        removed_transitions: d.reduction.removed_transitions.len(),
                    })
                    .collect(),
            },
        }
    }
}
