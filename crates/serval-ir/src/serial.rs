//! Serial executions of a network system.
//!
//! When requests run one at a time, the only state carried from one request
//! to the next is the global state. The serial automaton therefore has one
//! node per global state and an edge `g --(req, resp)--> g'` whenever a
//! request `req` started at `g` can answer `resp` while leaving `g'`. The
//! multisets of completed pairs along its paths are exactly the
//! serially achievable outcomes.

use std::collections::{BTreeSet, HashSet, VecDeque};

use indexmap::IndexSet;

use crate::kleene::{eliminate_states, KleeneOptions, SizeExceeded};
use crate::ns::NetworkSystem;
use crate::petri::{PetriNet, PlaceId, PlaceKind};
use crate::semilinear::{LinearSet, SemilinearSet};
use crate::vector::SparseVector;

/// Edge of the serial automaton; nodes and labels are places of the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SerialEdge {
    pub from: PlaceId,
    pub completed: PlaceId,
    pub to: PlaceId,
}

#[derive(Debug, Clone)]
pub struct SerialAutomaton {
    initial: PlaceId,
    globals: IndexSet<PlaceId>,
    edges: Vec<SerialEdge>,
}

impl SerialAutomaton {
    /// Explore the serial automaton from the initial global state.
    pub fn new(ns: &NetworkSystem, net: &PetriNet) -> Self {
        let initial = net.initial_global();
        let mut globals: IndexSet<String> = IndexSet::new();
        globals.insert(ns.initial_global.clone());
        let mut edges = BTreeSet::new();

        let mut next = 0;
        while next < globals.len() {
            let g = globals[next].clone();
            next += 1;
            for entry in &ns.requests {
                for (local, reached) in run_to_completion(ns, &entry.local, &g) {
                    let mut responses = ns.responses_at(&local).peekable();
                    if responses.peek().is_none() {
                        continue;
                    }
                    for resp in responses {
                        let from = global_place(net, &g);
                        let to = global_place(net, &reached);
                        let completed = net.place_id(&PlaceKind::Completed {
                            request: entry.name.clone(),
                            response: resp.to_string(),
                        });
                        if let (Some(from), Some(to), Some(completed)) = (from, to, completed) {
                            edges.insert(SerialEdge {
                                from,
                                completed,
                                to,
                            });
                        }
                    }
                    globals.insert(reached);
                }
            }
        }

        let globals = globals
            .iter()
            .filter_map(|g| global_place(net, g))
            .collect();
        SerialAutomaton {
            initial,
            globals,
            edges: edges.into_iter().collect(),
        }
    }

    pub fn initial(&self) -> PlaceId {
        self.initial
    }

    /// Global states reachable between requests of a serial execution,
    /// initial first. States only passed through while a request is still
    /// running are not included.
    pub fn globals(&self) -> impl Iterator<Item = PlaceId> + '_ {
        self.globals.iter().copied()
    }

    pub fn edges(&self) -> &[SerialEdge] {
        &self.edges
    }

    /// Parikh image of the automaton: every multiset of completed pairs
    /// produced by some serial execution.
    pub fn serial_set(&self, opts: KleeneOptions) -> Result<SemilinearSet, SizeExceeded> {
        let labelled: Vec<(PlaceId, SemilinearSet, PlaceId)> = self
            .edges
            .iter()
            .map(|e| {
                let letter = LinearSet::singleton(SparseVector::unit(e.completed));
                (e.from, SemilinearSet::from_components(vec![letter]), e.to)
            })
            .collect();
        eliminate_states(&labelled, self.initial, opts)
    }

    /// Whether some serial execution completes exactly `completed`.
    ///
    /// Explicit search over `(global, remaining multiset)` pairs; used by
    /// the trace checker where an answer must not depend on the symbolic
    /// machinery.
    pub fn can_produce(&self, completed: &SparseVector) -> bool {
        let mut seen: HashSet<(PlaceId, SparseVector)> = HashSet::new();
        let mut stack = vec![(self.initial, completed.clone())];
        // Every state is accepting, so an empty remainder anywhere succeeds.
        while let Some((g, remaining)) = stack.pop() {
            if remaining.is_zero() {
                return true;
            }
            if !seen.insert((g, remaining.clone())) {
                continue;
            }
            for e in self.edges.iter().filter(|e| e.from == g) {
                let mut rest = remaining.clone();
                if rest.sub_at(e.completed, 1).is_some() {
                    stack.push((e.to, rest));
                }
            }
        }
        false
    }
}

fn global_place(net: &PetriNet, g: &str) -> Option<PlaceId> {
    net.place_id(&PlaceKind::Global {
        global: g.to_string(),
    })
}

/// All `(local, global)` pairs reachable from `(local, global)` by one
/// request running alone.
fn run_to_completion(ns: &NetworkSystem, local: &str, global: &str) -> Vec<(String, String)> {
    let mut seen: IndexSet<(String, String)> = IndexSet::new();
    let mut queue = VecDeque::new();
    seen.insert((local.to_string(), global.to_string()));
    queue.push_back((local.to_string(), global.to_string()));
    while let Some((l, g)) = queue.pop_front() {
        for t in ns.transitions_from(&l, &g) {
            let next = (t.to_local.clone(), t.to_global.clone());
            if seen.insert(next.clone()) {
                queue.push_back(next);
            }
        }
    }
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{atomic_flag_ns, crossing_globals_ns, minimal_ns, trivial_ns};
    use crate::proptest_generators::arb_shared_entry_system;
    use proptest::prelude::*;

    fn completed(net: &PetriNet, req: &str, resp: &str) -> PlaceId {
        net.place_id(&PlaceKind::Completed {
            request: req.into(),
            response: resp.into(),
        })
        .unwrap()
    }

    #[test]
    fn minimal_serial_runs_only_see_g0() {
        let ns = minimal_ns();
        let net = PetriNet::from_network_system(&ns);
        let aut = SerialAutomaton::new(&ns, &net);
        let saw0 = completed(&net, "R", "saw_G0");
        let saw1 = completed(&net, "R", "saw_G1");
        assert_eq!(aut.edges().len(), 1);
        assert_eq!(aut.edges()[0].completed, saw0);
        assert_eq!(aut.globals().count(), 1);

        let ser = aut.serial_set(KleeneOptions::default()).unwrap();
        let both: SparseVector = [(saw0, 1), (saw1, 1)].into_iter().collect();
        assert!(ser.contains(&SparseVector::new()));
        assert!(ser.contains(&[(saw0, 3)].into_iter().collect()));
        assert!(!ser.contains(&both));
        assert!(!aut.can_produce(&both));
        assert!(aut.can_produce(&[(saw0, 2)].into_iter().collect()));
    }

    #[test]
    fn trivial_serial_set_is_everything() {
        let ns = trivial_ns();
        let net = PetriNet::from_network_system(&ns);
        let aut = SerialAutomaton::new(&ns, &net);
        let pong = completed(&net, "ping", "pong");
        let value = completed(&net, "get", "value");
        let ser = aut.serial_set(KleeneOptions::default()).unwrap();
        let v: SparseVector = [(pong, 4), (value, 2)].into_iter().collect();
        assert!(ser.contains(&v));
        assert!(aut.can_produce(&v));
    }

    #[test]
    fn read_after_set_sees_one() {
        let ns = atomic_flag_ns();
        let net = PetriNet::from_network_system(&ns);
        let aut = SerialAutomaton::new(&ns, &net);
        let done = completed(&net, "set", "done");
        let zero = completed(&net, "read", "0");
        let one = completed(&net, "read", "1");
        for opts in [
            KleeneOptions::default(),
            KleeneOptions {
                smart_order: false,
                generate_less: false,
                remove_redundant: false,
                ..KleeneOptions::default()
            },
        ] {
            let ser = aut.serial_set(opts).unwrap();
            assert!(ser.contains(&[(zero, 2), (done, 1), (one, 3)].into_iter().collect()));
            assert!(!ser.contains(&[(one, 1)].into_iter().collect()));
        }
        assert!(!aut.can_produce(&[(one, 1)].into_iter().collect()));
        assert!(aut.can_produce(&[(done, 1), (one, 1)].into_iter().collect()));
    }

    #[test]
    fn crossing_globals_keep_the_serial_set_small() {
        let ns = crossing_globals_ns();
        let net = PetriNet::from_network_system(&ns);
        let aut = SerialAutomaton::new(&ns, &net);
        assert_eq!(aut.edges().len(), 8);
        assert_eq!(aut.globals().count(), 2);

        let places = [
            completed(&net, "A", "r1"),
            completed(&net, "B", "r1"),
            completed(&net, "A", "r2"),
            completed(&net, "B", "r2"),
        ];
        for remove_redundant in [true, false] {
            let opts = KleeneOptions {
                remove_redundant,
                ..KleeneOptions::default()
            };
            let ser = aut.serial_set(opts).unwrap();
            assert!(ser.components.len() <= 100, "{}", ser.components.len());
            for counts in [[0, 0, 0, 0], [2, 1, 0, 3], [0, 0, 1, 1], [1, 2, 2, 1]] {
                let v: SparseVector = places.iter().copied().zip(counts).collect();
                assert!(ser.contains(&v), "{v}");
            }
        }
        let reduced = aut.serial_set(KleeneOptions::default()).unwrap();
        assert!(reduced.components.len() <= 4, "{}", reduced.components.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 48,
            ..ProptestConfig::default()
        })]

        #[test]
        fn serial_set_matches_explicit_search(ns in arb_shared_entry_system()) {
            let net = PetriNet::from_network_system(&ns);
            let aut = SerialAutomaton::new(&ns, &net);
            let places: Vec<PlaceId> = net.completed_places().map(|p| p.id).collect();
            for remove_redundant in [true, false] {
                let opts = KleeneOptions {
                    remove_redundant,
                    ..KleeneOptions::default()
                };
                let ser = aut.serial_set(opts).unwrap();
                let mut counts = vec![0u64; places.len()];
                loop {
                    let v: SparseVector = places.iter().copied().zip(counts.iter().copied()).collect();
                    prop_assert_eq!(ser.contains(&v), aut.can_produce(&v), "{}", v);
                    // Next vector with every count at most 2.
                    let Some(i) = counts.iter().position(|c| *c < 2) else {
                        break;
                    };
                    counts[i] += 1;
                    counts[..i].iter_mut().for_each(|c| *c = 0);
                }
            }
        }
    }
}
