//! Serializability proof checking.
//!
//! For every recomputed disjunct the bundle must carry an invariant, given
//! per global state, over the transitions of the disjunct's relevance
//! closure. Three obligations are checked independently:
//!
//! - `initial_state_ok`: the empty counter vector is in the invariant of the
//!   initial global;
//! - `inductive_ok`: firing any kept transition from any member lands in the
//!   invariant of the successor global, checked per linear component with
//!   exact Presburger inclusion;
//! - `implies_serializable_ok`: no member with nothing in flight lies in the
//!   disjunct's non-serializable region.

use std::collections::{BTreeMap, BTreeSet};

use serval_ir::petri::{PetriNet, PlaceId, Transition, TransitionId};
use serval_ir::presburger::{self, PresburgerBudget};
use serval_ir::region::Disjunct;
use serval_ir::semilinear::{LinearSet, SemilinearSet};
use serval_ir::vector::SparseVector;

use crate::closure::relevant_transitions;
use crate::{BundleCheckIssue, CertificateBundle, DisjunctProof, ProofChecks, Recomputed};

const EXAMPLE_SEARCH_LIMIT: usize = 2_000;

/// Members of `set` that can fire `t`, after firing it. Exact: a member
/// lacking the consumed token in the base must use some period that
/// supplies it.
pub fn post_image(set: &LinearSet, t: &Transition) -> Vec<LinearSet> {
    let bases: Vec<SparseVector> = match t.consume {
        Some(c) if set.base.get(c) == 0 => set
            .periods
            .iter()
            .filter(|p| p.get(c) >= 1)
            .map(|p| set.base.plus(p))
            .collect(),
        _ => vec![set.base.clone()],
    };
    bases
        .iter()
        .filter_map(|b| t.apply_counters(b))
        .map(|b| LinearSet::new(b, set.periods.clone()))
        .collect()
}

pub(crate) fn check(
    rc: &Recomputed,
    bundle: &CertificateBundle,
    issues: &mut Vec<BundleCheckIssue>,
) -> ProofChecks {
    let budget = bundle.producer.serial.budget();
    let mut checks = ProofChecks {
        initial_state_ok: true,
        inductive_ok: true,
        implies_serializable_ok: true,
    };

    let mut payloads: BTreeMap<usize, &DisjunctProof> = BTreeMap::new();
    for p in &bundle.disjuncts {
        if payloads.insert(p.id, p).is_some() {
            issues.push(BundleCheckIssue::new(
                "duplicate_disjunct",
                format!("Disjunct {} appears more than once", p.id),
            ));
        }
    }
    let expected: BTreeSet<usize> = rc.analysis.disjuncts.iter().map(|d| d.id).collect();
    for id in payloads.keys().filter(|id| !expected.contains(id)) {
        issues.push(BundleCheckIssue::new(
            "unexpected_disjunct",
            format!("Disjunct {id} does not exist in the recomputed region"),
        ));
    }

    for disjunct in &rc.analysis.disjuncts {
        let Some(payload) = payloads.get(&disjunct.id) else {
            issues.push(BundleCheckIssue::new(
                "missing_disjunct",
                format!("No proof for disjunct {}", disjunct.id),
            ));
            checks.implies_serializable_ok = false;
            continue;
        };
        if payload.region != disjunct.region {
            issues.push(BundleCheckIssue::new(
                "region_mismatch",
                format!(
                    "Disjunct {} records a region that differs from the recomputed one",
                    disjunct.id
                ),
            ));
        }
        check_disjunct(&rc.net, disjunct, payload, budget, issues, &mut checks);
    }
    checks
}

fn check_disjunct(
    net: &PetriNet,
    disjunct: &Disjunct,
    payload: &DisjunctProof,
    budget: PresburgerBudget,
    issues: &mut Vec<BundleCheckIssue>,
    checks: &mut ProofChecks,
) {
    let id = disjunct.id;
    let all = net.transition_ids();
    let kept: BTreeSet<TransitionId> = payload.kept_transitions.iter().copied().collect();
    if let Some(bad) = kept.iter().find(|t| !all.contains(t)) {
        issues.push(BundleCheckIssue::new(
            "unknown_transition",
            format!("Disjunct {id} keeps transition {bad}, which does not exist"),
        ));
        checks.inductive_ok = false;
        return;
    }
    let missing: Vec<String> = relevant_transitions(net, &disjunct.targets)
        .difference(&kept)
        .map(|t| t.to_string())
        .collect();
    if !missing.is_empty() {
        issues.push(BundleCheckIssue::new(
            "relevance_closure",
            format!(
                "Disjunct {id} drops relevant transitions: {}",
                missing.join(", ")
            ),
        ));
        checks.inductive_ok = false;
    }
    let reduced = net.restricted_to(&kept);

    let mut invariant: BTreeMap<PlaceId, &SemilinearSet> = BTreeMap::new();
    for part in &payload.invariant {
        if !net.place(part.global).is_some_and(|p| p.is_global()) {
            issues.push(BundleCheckIssue::new(
                "invalid_global",
                format!("Disjunct {id} has an invariant at non-global place {}", part.global),
            ));
            checks.inductive_ok = false;
            continue;
        }
        if invariant.insert(part.global, &part.set).is_some() {
            issues.push(BundleCheckIssue::new(
                "duplicate_global",
                format!(
                    "Disjunct {id} lists the invariant at {} twice",
                    net.place_name(part.global)
                ),
            ));
            checks.inductive_ok = false;
        }
    }

    let initial_ok = invariant
        .get(&net.initial_global())
        .is_some_and(|s| s.contains(&SparseVector::new()));
    if !initial_ok {
        issues.push(BundleCheckIssue::new(
            "initial_state",
            format!("Disjunct {id}: the initial marking is not in the invariant"),
        ));
        checks.initial_state_ok = false;
    }

    let empty = SemilinearSet::empty();
    'inductive: for (global, set) in &invariant {
        for component in &set.components {
            for t in reduced.transitions() {
                if t.is_identity() || !t.enabled_at_global(*global) {
                    continue;
                }
                let next = t.next_global(*global);
                let target = invariant.get(&next).copied().unwrap_or(&empty);
                for post in post_image(component, t) {
                    let failure = match presburger::semilinear_includes(target, &post, budget) {
                        Ok(true) => None,
                        Ok(false) => Some(format!(
                            "firing {} from {} at {} leaves the invariant at {}",
                            t.id,
                            component,
                            net.place_name(*global),
                            net.place_name(next)
                        )),
                        Err(e) => Some(format!("inclusion for {} could not be decided: {e}", t.id)),
                    };
                    if let Some(message) = failure {
                        issues.push(BundleCheckIssue::new(
                            "not_inductive",
                            format!("Disjunct {id}: {message}"),
                        ));
                        checks.inductive_ok = false;
                        break 'inductive;
                    }
                }
            }
        }
    }

    let query = match disjunct.query(net) {
        Ok(Some(q)) => q,
        Ok(None) => return,
        Err(e) => {
            issues.push(BundleCheckIssue::new(
                "region_query",
                format!("Disjunct {id}: region query could not be built: {e}"),
            ));
            checks.implies_serializable_ok = false;
            return;
        }
    };
    let idle: BTreeSet<PlaceId> = net.in_flight_places().map(|p| p.id).collect();
    for set in invariant.values() {
        for component in &set.components {
            match presburger::linear_set_meets(component, &query, &idle, budget) {
                Ok(false) => {}
                Ok(true) => {
                    let example =
                        presburger::find_member(component, &query, &idle, EXAMPLE_SEARCH_LIMIT)
                            .ok()
                            .flatten()
                            .map(|v| render_counts(net, &v))
                            .unwrap_or_else(|| component.to_string());
                    issues.push(BundleCheckIssue::new(
                        "implies_serializable",
                        format!("Disjunct {id}: Values outside serializable set: {example}"),
                    ));
                    checks.implies_serializable_ok = false;
                    return;
                }
                Err(e) => {
                    issues.push(BundleCheckIssue::new(
                        "implies_serializable",
                        format!("Disjunct {id}: region intersection could not be decided: {e}"),
                    ));
                    checks.implies_serializable_ok = false;
                    return;
                }
            }
        }
    }
}

fn render_counts(net: &PetriNet, v: &SparseVector) -> String {
    let parts: Vec<String> = v
        .iter()
        .map(|(p, n)| format!("{}={n}", net.place_name(p)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{check_bundle, GlobalInvariant, PROOF_KIND};
    use serval_ir::ns::NetworkSystem;
    use serval_ir::petri::PlaceKind;

    fn lin(base: SparseVector, periods: Vec<SparseVector>) -> LinearSet {
        LinearSet::new(base, periods)
    }

    #[test]
    fn post_image_splits_on_periods_supplying_the_token() {
        let net = PetriNet::from_network_system(&observe_system());
        let respond = net
            .transitions()
            .iter()
            .find(|t| t.consume.is_some() && t.guard.is_none())
            .unwrap();
        let c = respond.consume.unwrap();
        let other = PlaceId(c.0 + 100);
        let set = lin(
            SparseVector::new(),
            vec![SparseVector::unit(c), SparseVector::unit(other)],
        );
        let post = post_image(&set, respond);
        assert_eq!(post.len(), 1);
        assert_eq!(post[0].base, SparseVector::unit(respond.produce.unwrap()));

        let none = lin(SparseVector::new(), vec![SparseVector::unit(other)]);
        assert!(post_image(&none, respond).is_empty());
    }

    #[test]
    fn missing_initial_marking_is_reported() {
        let mut bundle = trivial_proof_bundle();
        bundle.disjuncts[0].invariant[0].set = SemilinearSet::empty();
        let report = check_bundle(&bundle, false);
        let checks = report.proof.unwrap();
        assert!(!checks.initial_state_ok);
        assert!(checks.inductive_ok);
        assert!(report.issues.iter().any(|i| i.code == "initial_state"));
    }

    #[test]
    fn missing_disjunct_is_reported() {
        let mut bundle = trivial_proof_bundle();
        bundle.disjuncts.clear();
        let report = check_bundle(&bundle, false);
        assert!(report.issues.iter().any(|i| i.code == "missing_disjunct"));
        assert!(!report.is_ok());
    }

    fn observe_bundle(invariant: Vec<GlobalInvariant>, kept: Vec<TransitionId>) -> CertificateBundle {
        let system = observe_system();
        let net = PetriNet::from_network_system(&system);
        let analysis = serval_ir::region::SerialAnalysis::compute(
            &system,
            &net,
            &serval_ir::region::SerialOptions::default(),
        )
        .unwrap();
        CertificateBundle {
            schema_version: crate::CERTIFICATE_SCHEMA_VERSION,
            kind: PROOF_KIND.into(),
            producer: producer(),
            system,
            disjuncts: analysis
                .disjuncts
                .iter()
                .map(|d| DisjunctProof {
                    id: d.id,
                    region: d.region.clone(),
                    kept_transitions: kept.clone(),
                    invariant: invariant.clone(),
                })
                .collect(),
            trace: None,
            bundle_sha256: None,
        }
    }

    #[test]
    fn dropping_relevant_transitions_is_rejected() {
        let net = PetriNet::from_network_system(&observe_system());
        let bundle = observe_bundle(
            vec![GlobalInvariant {
                global: net.initial_global(),
                set: SemilinearSet::from_components(vec![LinearSet::singleton(
                    SparseVector::new(),
                )]),
            }],
            vec![],
        );
        let report = check_bundle(&bundle, false);
        assert!(report.issues.iter().any(|i| i.code == "relevance_closure"));
        assert!(!report.proof.unwrap().inductive_ok);
    }

    #[test]
    fn an_invariant_meeting_the_region_fails_implication() {
        // Claim "anything at all" at every global: inductive, contains the
        // initial marking, but meets the non-serializable region.
        let system = observe_system();
        let net = PetriNet::from_network_system(&system);
        let all_places: Vec<SparseVector> = net
            .places()
            .iter()
            .filter(|p| !p.is_global())
            .map(|p| SparseVector::unit(p.id))
            .collect();
        let everything = SemilinearSet::from_components(vec![lin(SparseVector::new(), all_places)]);
        let invariant: Vec<GlobalInvariant> = net
            .global_places()
            .map(|g| GlobalInvariant {
                global: g.id,
                set: everything.clone(),
            })
            .collect();
        let kept: Vec<TransitionId> = net.transitions().iter().map(|t| t.id).collect();
        let report = check_bundle(&observe_bundle(invariant, kept), false);
        let checks = report.proof.unwrap();
        assert!(checks.initial_state_ok);
        assert!(checks.inductive_ok, "{:?}", report.issues);
        assert!(!checks.implies_serializable_ok);
        let saw1 = net
            .place_id(&PlaceKind::Completed {
                request: "R".into(),
                response: "saw_G1".into(),
            })
            .unwrap();
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("Values outside serializable set")
                && i.message.contains(&net.place_name(saw1))));
    }

    #[test]
    fn non_inductive_invariant_is_rejected() {
        // Only the initial marking, although requests can always be spawned.
        let mut ns = NetworkSystem::new("G0");
        ns.add_request("R", "L0");
        ns.add_response("L0", "done");
        let net = PetriNet::from_network_system(&ns);
        let mut bundle = trivial_proof_bundle();
        bundle.system = ns;
        bundle.disjuncts[0].invariant = vec![GlobalInvariant {
            global: net.initial_global(),
            set: SemilinearSet::from_components(vec![LinearSet::singleton(SparseVector::new())]),
        }];
        bundle.disjuncts[0].kept_transitions = net.transitions().iter().map(|t| t.id).collect();
        let report = check_bundle(&bundle, false);
        assert!(!report.proof.unwrap().inductive_ok);
        assert!(report.issues.iter().any(|i| i.code == "not_inductive"));
    }
}
