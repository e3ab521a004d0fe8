//! Counterexample traces: event rendering and checking.

use std::fmt;

use serde::{Deserialize, Serialize};

use serval_ir::petri::{PetriNet, PlaceKind, TransitionId, TransitionKind};
use serval_ir::vector::SparseVector;

use crate::{BundleCheckIssue, CompletedPair, Recomputed, TraceCertificate};

/// A transition of the trace, in network-system terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", deny_unknown_fields)]
pub enum TraceEvent {
    RequestStart {
        request: String,
    },
    InternalStep {
        request: String,
        from_local: String,
        from_global: String,
        to_local: String,
        to_global: String,
    },
    RequestComplete {
        request: String,
        response: String,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::RequestStart { request } => write!(f, "start {request}"),
            TraceEvent::InternalStep {
                request,
                from_local,
                from_global,
                to_local,
                to_global,
            } => write!(
                f,
                "{request}: ({from_local}, {from_global}) -> ({to_local}, {to_global})"
            ),
            TraceEvent::RequestComplete { request, response } => {
                write!(f, "{request} responds {response}")
            }
        }
    }
}

/// Events of a firing sequence. Unknown ids are skipped; the checker
/// reports them through replay.
pub fn events_of(net: &PetriNet, trace: &[TransitionId]) -> Vec<TraceEvent> {
    trace
        .iter()
        .filter_map(|id| net.transition(*id))
        .map(|t| match &t.kind {
            TransitionKind::Spawn { request } => TraceEvent::RequestStart {
                request: request.clone(),
            },
            TransitionKind::Step {
                request,
                from_local,
                from_global,
                to_local,
                to_global,
            } => TraceEvent::InternalStep {
                request: request.clone(),
                from_local: from_local.clone(),
                from_global: from_global.clone(),
                to_local: to_local.clone(),
                to_global: to_global.clone(),
            },
            TransitionKind::Respond {
                request, response, ..
            } => TraceEvent::RequestComplete {
                request: request.clone(),
                response: response.clone(),
            },
        })
        .collect()
}

/// Non-zero completed counts, sorted by request then response.
pub fn completed_pairs(net: &PetriNet, counters: &SparseVector) -> Vec<CompletedPair> {
    let mut pairs: Vec<CompletedPair> = counters
        .iter()
        .filter_map(|(p, count)| match net.place(p).map(|p| &p.kind) {
            Some(PlaceKind::Completed { request, response }) if count > 0 => Some(CompletedPair {
                request: request.clone(),
                response: response.clone(),
                count,
            }),
            _ => None,
        })
        .collect();
    pairs.sort();
    pairs
}

/// Numbered, one event per line.
pub fn render_events(events: &[TraceEvent]) -> String {
    let mut out = String::new();
    for (i, e) in events.iter().enumerate() {
        out.push_str(&format!("{:>4}. {e}\n", i + 1));
    }
    out
}

pub(crate) fn check(rc: &Recomputed, trace: &TraceCertificate, issues: &mut Vec<BundleCheckIssue>) {
    let net = &rc.net;
    let Some(disjunct) = rc.analysis.disjuncts.iter().find(|d| d.id == trace.disjunct) else {
        issues.push(BundleCheckIssue::new(
            "unknown_disjunct",
            format!("Trace names disjunct {}, which does not exist", trace.disjunct),
        ));
        return;
    };

    let end = match net.replay(&trace.transitions) {
        Ok(m) => m,
        Err((step, e)) => {
            issues.push(BundleCheckIssue::new(
                "illegal_firing",
                format!("Step {} cannot fire: {e}", step + 1),
            ));
            return;
        }
    };

    let busy: Vec<String> = net
        .in_flight_places()
        .filter(|p| end.counters.get(p.id) > 0)
        .map(|p| format!("{}={}", p.kind, end.counters.get(p.id)))
        .collect();
    if !busy.is_empty() {
        issues.push(BundleCheckIssue::new(
            "requests_in_flight",
            format!("Requests still in flight at the end: {}", busy.join(", ")),
        ));
    }

    if events_of(net, &trace.transitions) != trace.events {
        issues.push(BundleCheckIssue::new(
            "events_mismatch",
            "Recorded events do not match the firing sequence",
        ));
    }

    let completed = completed_pairs(net, &end.counters);
    if completed != trace.completed {
        issues.push(BundleCheckIssue::new(
            "completed_mismatch",
            "Recorded completed pairs do not match the final marking",
        ));
    }

    let finished: SparseVector = net
        .completed_places()
        .map(|p| (p.id, end.counters.get(p.id)))
        .filter(|(_, n)| *n > 0)
        .collect();
    if rc.analysis.automaton.can_produce(&finished) {
        issues.push(BundleCheckIssue::new(
            "serializable_outcome",
            format!("Completed requests {finished} are produced by a serial execution"),
        ));
    }

    match disjunct.is_witnessed_by(net, &end.counters) {
        Ok(true) => {}
        Ok(false) => issues.push(BundleCheckIssue::new(
            "not_witnessed",
            format!("Final marking does not lie in disjunct {}", disjunct.id),
        )),
        Err(e) => issues.push(BundleCheckIssue::new(
            "not_witnessed",
            format!("Disjunct {} could not be evaluated: {e}", disjunct.id),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{check_bundle, CertificateBundle, CERTIFICATE_SCHEMA_VERSION, TRACE_KIND};
    use serval_ir::region::SerialAnalysis;

    fn ids(raw: &[u32]) -> Vec<TransitionId> {
        raw.iter().map(|n| TransitionId(*n)).collect()
    }

    fn trace_bundle(raw: &[u32]) -> CertificateBundle {
        let system = observe_system();
        let net = PetriNet::from_network_system(&system);
        let transitions = ids(raw);
        let end = net.replay(&transitions).unwrap();
        let analysis = SerialAnalysis::compute(&system, &net, &producer().serial).unwrap();
        let disjunct = analysis
            .disjuncts
            .iter()
            .find(|d| d.is_witnessed_by(&net, &end.counters).unwrap())
            .map_or(0, |d| d.id);
        CertificateBundle {
            schema_version: CERTIFICATE_SCHEMA_VERSION,
            kind: TRACE_KIND.into(),
            producer: producer(),
            system,
            disjuncts: vec![],
            trace: Some(TraceCertificate {
                disjunct,
                events: events_of(&net, &transitions),
                completed: completed_pairs(&net, &end.counters),
                transitions,
            }),
            bundle_sha256: None,
        }
    }

    #[test]
    fn interleaved_observation_is_a_valid_trace() {
        let bundle = trace_bundle(&[0, 0, 1, 4, 2, 3, 6, 5]);
        let report = check_bundle(&bundle, false);
        assert!(report.is_ok(), "{:?}", report.issues);
        assert_eq!(report.summary(), "Trace is valid");
        let trace = bundle.trace.unwrap();
        assert_eq!(trace.completed.len(), 2);
        assert_eq!(
            trace.events[2],
            TraceEvent::InternalStep {
                request: "R".into(),
                from_local: "L0".into(),
                from_global: "G0".into(),
                to_local: "L3".into(),
                to_global: "G1".into(),
            }
        );
    }

    #[test]
    fn serial_outcome_is_rejected() {
        let bundle = trace_bundle(&[0, 3, 5]);
        let report = check_bundle(&bundle, false);
        let codes: Vec<_> = report.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&"serializable_outcome"));
        assert!(codes.contains(&"not_witnessed"));
    }

    #[test]
    fn illegal_step_is_rejected() {
        let mut bundle = trace_bundle(&[0, 0, 1, 4, 2, 3, 6, 5]);
        bundle.trace.as_mut().unwrap().transitions.swap(0, 2);
        let report = check_bundle(&bundle, false);
        assert_eq!(report.issues[0].code, "illegal_firing");
        assert!(report.summary().starts_with("Trace is INVALID: Step 1"));
    }

    #[test]
    fn unfinished_requests_are_rejected() {
        let bundle = trace_bundle(&[0, 0, 1, 4, 2, 3, 6]);
        let report = check_bundle(&bundle, false);
        assert!(report.issues.iter().any(|i| i.code == "requests_in_flight"));
    }

    #[test]
    fn tampered_events_are_rejected() {
        let mut bundle = trace_bundle(&[0, 0, 1, 4, 2, 3, 6, 5]);
        bundle.trace.as_mut().unwrap().events.pop();
        let report = check_bundle(&bundle, false);
        assert!(report.issues.iter().any(|i| i.code == "events_mismatch"));
    }

    #[test]
    fn events_render_numbered() {
        let net = PetriNet::from_network_system(&observe_system());
        let text = render_events(&events_of(&net, &ids(&[0, 3, 5])));
        assert_eq!(
            text,
            "   1. start R\n   2. R: (L0, G0) -> (L1, G0)\n   3. R responds saw_G0\n"
        );
    }
}
