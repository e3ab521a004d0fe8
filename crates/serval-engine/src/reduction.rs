//! Structural reduction of the Petri net before per-disjunct analysis.
//!
//! Every pass is a pure function from a net to a smaller net plus what it
//! removed. Reduced nets keep the full place table and a filtered
//! transition list, so transition ids stay valid across passes.

use std::collections::BTreeSet;

use serde::Serialize;

use serval_ir::petri::{PetriNet, PlaceId, TransitionId};

/// Size of a net before and after reduction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub places_before: usize,
    pub places_after: usize,
    pub transitions_before: usize,
    pub transitions_after: usize,
    pub pruning_iterations: usize,
    pub removed_places: Vec<PlaceId>,
    pub removed_transitions: Vec<TransitionId>,
}

impl RemovalReport {
    fn between(before: &PetriNet, after: &PetriNet, pruning_iterations: usize) -> Self {
        let live = after.live_places();
        let kept = after.transition_ids();
        RemovalReport {
            places_before: before.places().len(),
            places_after: live.len(),
            transitions_before: before.transitions().len(),
            transitions_after: after.transitions().len(),
            pruning_iterations,
            removed_places: before
                .places()
                .iter()
                .map(|p| p.id)
                .filter(|p| !live.contains(p))
                .collect(),
            removed_transitions: before
                .transitions()
                .iter()
                .map(|t| t.id)
                .filter(|t| !kept.contains(t))
                .collect(),
        }
    }
}

fn without(net: &PetriNet, removed: &[TransitionId]) -> PetriNet {
    let keep: BTreeSet<TransitionId> = net
        .transition_ids()
        .into_iter()
        .filter(|t| !removed.contains(t))
        .collect();
    net.restricted_to(&keep)
}

/// Drop transitions that can never fire: some input is not markable from
/// the initial marking.
pub fn forward_pass(net: &PetriNet) -> (PetriNet, Vec<TransitionId>) {
    let marked = net.coverable_places();
    let removed: Vec<TransitionId> = net
        .transitions()
        .iter()
        .filter(|t| !t.inputs().all(|p| marked.contains(&p)))
        .map(|t| t.id)
        .collect();
    (without(net, &removed), removed)
}

/// Drop transitions whose outputs can never drain into `targets`.
pub fn backward_pass(net: &PetriNet, targets: &BTreeSet<PlaceId>) -> (PetriNet, Vec<TransitionId>) {
    let mut drains = targets.clone();
    loop {
        let before = drains.len();
        for t in net.transitions() {
            if t.outputs().all(|p| drains.contains(&p)) {
                drains.extend(t.inputs());
            }
        }
        if drains.len() == before {
            break;
        }
    }
    let removed: Vec<TransitionId> = net
        .transitions()
        .iter()
        .filter(|t| !t.outputs().all(|p| drains.contains(&p)))
        .map(|t| t.id)
        .collect();
    (without(net, &removed), removed)
}

/// Alternate forward and backward passes until neither removes anything.
/// Identity transitions go first: they never change a marking.
pub fn bidirectional_prune(net: &PetriNet, targets: &BTreeSet<PlaceId>) -> (PetriNet, RemovalReport) {
    let identities: Vec<TransitionId> = net
        .transitions()
        .iter()
        .filter(|t| t.is_identity())
        .map(|t| t.id)
        .collect();
    let mut current = without(net, &identities);
    let mut iterations = 0;
    loop {
        iterations += 1;
        let (forward, removed_fwd) = forward_pass(&current);
        let (backward, removed_bwd) = backward_pass(&forward, targets);
        current = backward;
        tracing::trace!(
            iteration = iterations,
            forward = removed_fwd.len(),
            backward = removed_bwd.len(),
            "pruning pass"
        );
        if removed_fwd.is_empty() && removed_bwd.is_empty() {
            break;
        }
    }
    let report = RemovalReport::between(net, &current, iterations);
    (current, report)
}

/// Reduce `net` for a disjunct with the given targets. Without targets no
/// run can witness the disjunct, so nothing is kept regardless of
/// `pruning`.
pub fn reduce(net: &PetriNet, targets: &BTreeSet<PlaceId>, pruning: bool) -> (PetriNet, RemovalReport) {
    if targets.is_empty() {
        let empty = net.restricted_to(&BTreeSet::new());
        let report = RemovalReport::between(net, &empty, 0);
        return (empty, report);
    }
    if pruning {
        bidirectional_prune(net, targets)
    } else {
        let report = RemovalReport::between(net, net, 0);
        (net.clone(), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completed, minimal_system};

    fn targets(net: &PetriNet, completed: &[PlaceId]) -> BTreeSet<PlaceId> {
        net.global_places()
            .map(|p| p.id)
            .chain(completed.iter().copied())
            .collect()
    }

    #[test]
    fn forward_pass_drops_unfireable_steps() {
        // L5 is never entered, so its step can never fire.
        let mut ns = minimal_system();
        ns.add_transition("L5", "G0", "L1", "G0");
        let net = PetriNet::from_network_system(&ns);
        let (reduced, removed) = forward_pass(&net);
        assert_eq!(removed.len(), 1);
        assert_eq!(reduced.transitions().len(), net.transitions().len() - 1);
    }

    #[test]
    fn backward_pass_keeps_only_draining_transitions() {
        let net = PetriNet::from_network_system(&minimal_system());
        let saw0 = completed(&net, "R", "saw_G0");
        let (reduced, removed) = backward_pass(&net, &targets(&net, &[saw0]));
        assert!(!removed.is_empty());
        assert!(reduced
            .transitions()
            .iter()
            .all(|t| t.produce != Some(completed(&net, "R", "saw_G1"))));
    }

    #[test]
    fn pruning_reaches_a_fixpoint_and_reports_sizes() {
        let net = PetriNet::from_network_system(&minimal_system());
        let saw1 = completed(&net, "R", "saw_G1");
        let (reduced, report) = reduce(&net, &targets(&net, &[saw1]), true);
        assert!(report.pruning_iterations >= 1);
        assert_eq!(report.places_before, net.places().len());
        assert_eq!(report.transitions_after, reduced.transitions().len());
        assert_eq!(
            report.places_after + report.removed_places.len(),
            report.places_before
        );
        assert!(reduced.live_places().contains(&saw1));
        assert!(!reduced.live_places().contains(&completed(&net, "R", "saw_G0")));
    }

    #[test]
    fn disabled_pruning_keeps_everything() {
        let net = PetriNet::from_network_system(&minimal_system());
        let (reduced, report) = reduce(&net, &targets(&net, &[]), false);
        assert_eq!(reduced, net);
        assert!(report.removed_transitions.is_empty());
        assert_eq!(report.pruning_iterations, 0);
    }

    #[test]
    fn no_targets_means_an_empty_net() {
        let net = PetriNet::from_network_system(&minimal_system());
        for pruning in [true, false] {
            let (reduced, report) = reduce(&net, &BTreeSet::new(), pruning);
            assert!(reduced.transitions().is_empty());
            assert_eq!(report.removed_transitions.len(), net.transitions().len());
        }
    }

    #[test]
    fn pruning_agrees_with_the_kernel_relevance_closure() {
        let net = PetriNet::from_network_system(&minimal_system());
        let t = targets(&net, &[completed(&net, "R", "saw_G1")]);
        let (reduced, _) = reduce(&net, &t, true);
        assert_eq!(
            reduced.transition_ids(),
            serval_proof_kernel::closure::relevant_transitions(&net, &t)
        );
    }
}
