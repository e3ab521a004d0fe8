//! Relevance closure: the transitions a witnessing run can use.
//!
//! A run ending in a marking whose tokens all sit in `targets` (globals and
//! the completed places a disjunct allows) only fires transitions whose
//! inputs can be marked from the initial marking and whose outputs can
//! still drain into `targets`. A proof only has to be closed under these.

use std::collections::BTreeSet;

use serval_ir::petri::{PetriNet, PlaceId, TransitionId};

pub fn relevant_transitions(net: &PetriNet, targets: &BTreeSet<PlaceId>) -> BTreeSet<TransitionId> {
    let mut live: BTreeSet<TransitionId> = net
        .transitions()
        .iter()
        .filter(|t| !t.is_identity())
        .map(|t| t.id)
        .collect();

    loop {
        let before = live.len();

        let mut marked = BTreeSet::from([net.initial_global()]);
        let mut grew = true;
        while grew {
            grew = false;
            for t in net.transitions().iter().filter(|t| live.contains(&t.id)) {
                if t.inputs().all(|p| marked.contains(&p)) {
                    for p in t.outputs() {
                        grew |= marked.insert(p);
                    }
                }
            }
        }
        live.retain(|id| {
            net.transition(*id)
                .is_some_and(|t| t.inputs().all(|p| marked.contains(&p)))
        });

        let mut drains = targets.clone();
        let mut grew = true;
        while grew {
            grew = false;
            for t in net.transitions().iter().filter(|t| live.contains(&t.id)) {
                if t.outputs().all(|p| drains.contains(&p)) {
                    for p in t.inputs() {
                        grew |= drains.insert(p);
                    }
                }
            }
        }
        live.retain(|id| {
            net.transition(*id)
                .is_some_and(|t| t.outputs().all(|p| drains.contains(&p)))
        });

        if live.len() == before {
            return live;
        }
    }
}
