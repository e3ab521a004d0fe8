//! Kleene algebras and state elimination.
//!
//! [`eliminate_states`] turns a labelled automaton into the algebra element
//! denoting every path from the start state (all states accepting).

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

pub const DEFAULT_MAX_SIZE: usize = 4096;

/// Operations of a (commutative-enough) Kleene algebra.
pub trait Kleene: Clone {
    fn zero() -> Self;
    fn one() -> Self;
    fn plus(self, other: Self) -> Self;
    fn times(self, other: Self) -> Self;
    fn star(self) -> Self;
    fn is_zero(&self) -> bool;
    fn is_one(&self) -> bool;

    /// Size measured against [`KleeneOptions::max_size`].
    fn size(&self) -> usize {
        1
    }

    /// Size of `self.star()`, computed without building it.
    fn star_size(&self) -> usize {
        self.size()
    }

    /// An equal element that is hopefully smaller.
    fn reduce(self) -> Self {
        self
    }
}

/// Knobs for [`eliminate_states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KleeneOptions {
    /// Eliminate the state with the fewest one-directional edges first.
    pub smart_order: bool,
    /// Short-circuit operations on `0` and `1` instead of building them.
    pub generate_less: bool,
    /// Reduce every intermediate label.
    pub remove_redundant: bool,
    /// Largest intermediate element elimination may build.
    pub max_size: usize,
}

impl Default for KleeneOptions {
    fn default() -> Self {
        Self {
            smart_order: true,
            generate_less: true,
            remove_redundant: true,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("state elimination would build an element larger than {limit}")]
pub struct SizeExceeded {
    pub limit: usize,
}

type Result<T> = std::result::Result<T, SizeExceeded>;

fn within_budget(size: usize, opts: KleeneOptions) -> Result<()> {
    if size > opts.max_size {
        return Err(SizeExceeded {
            limit: opts.max_size,
        });
    }
    Ok(())
}

fn reduced<K: Kleene>(k: K, opts: KleeneOptions) -> K {
    if opts.remove_redundant {
        k.reduce()
    } else {
        k
    }
}

fn plus<K: Kleene>(a: K, b: K, opts: KleeneOptions) -> Result<K> {
    if opts.generate_less {
        if a.is_zero() {
            return Ok(b);
        }
        if b.is_zero() {
            return Ok(a);
        }
    }
    within_budget(a.size().saturating_add(b.size()), opts)?;
    Ok(reduced(a.plus(b), opts))
}

fn times<K: Kleene>(a: K, b: K, opts: KleeneOptions) -> Result<K> {
    if opts.generate_less {
        if a.is_zero() || b.is_zero() {
            return Ok(K::zero());
        }
        if a.is_one() {
            return Ok(b);
        }
        if b.is_one() {
            return Ok(a);
        }
    }
    within_budget(a.size().saturating_mul(b.size()), opts)?;
    Ok(reduced(a.times(b), opts))
}

fn star<K: Kleene>(a: K, opts: KleeneOptions) -> Result<K> {
    if opts.generate_less && (a.is_zero() || a.is_one()) {
        return Ok(K::one());
    }
    within_budget(a.star_size(), opts)?;
    Ok(reduced(a.star(), opts))
}

/// `None` is the extra start/end state added during elimination.
type Node<S> = Option<S>;

/// Compute the sum over all paths from `start` to any state.
///
/// A fresh state is added with a unit edge to `start` and unit edges back
/// from every state; all original states are then eliminated and the label
/// of the remaining self-loop is returned. Fails as soon as an intermediate
/// label would outgrow `opts.max_size`.
pub fn eliminate_states<S, K>(edges: &[(S, K, S)], start: S, opts: KleeneOptions) -> Result<K>
where
    S: Ord + Clone,
    K: Kleene,
{
    let mut graph: BTreeMap<(Node<S>, Node<S>), K> = BTreeMap::new();
    let add = |graph: &mut BTreeMap<(Node<S>, Node<S>), K>,
               key: (Node<S>, Node<S>),
               k: K|
     -> Result<()> {
        let merged = match graph.remove(&key) {
            Some(existing) => plus(existing, k, opts)?,
            None => k,
        };
        graph.insert(key, merged);
        Ok(())
    };

    let mut states: BTreeSet<S> = BTreeSet::new();
    states.insert(start.clone());
    for (from, k, to) in edges {
        states.insert(from.clone());
        states.insert(to.clone());
        add(&mut graph, (Some(from.clone()), Some(to.clone())), k.clone())?;
    }
    add(&mut graph, (None, Some(start)), K::one())?;
    for s in &states {
        add(&mut graph, (Some(s.clone()), None), K::one())?;
    }

    while let Some(state) = pick_state(&graph, &states, opts) {
        states.remove(&state);
        let node = Some(state);

        let mut rest = BTreeMap::new();
        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();
        let mut self_loop = K::zero();
        for ((from, to), k) in std::mem::take(&mut graph) {
            match (from == node, to == node) {
                (true, true) => self_loop = plus(self_loop, k, opts)?,
                (true, false) => outgoing.push((to, k)),
                (false, true) => incoming.push((from, k)),
                (false, false) => {
                    rest.insert((from, to), k);
                }
            }
        }
        let looped = star(self_loop, opts)?;
        graph = rest;
        for (from, k1) in &incoming {
            for (to, k2) in &outgoing {
                let through = times(k1.clone(), times(looped.clone(), k2.clone(), opts)?, opts)?;
                add(&mut graph, (from.clone(), to.clone()), through)?;
            }
        }
    }

    graph
        .into_values()
        .try_fold(K::zero(), |acc, k| plus(acc, k, opts))
}

fn pick_state<S: Ord + Clone, K>(
    graph: &BTreeMap<(Node<S>, Node<S>), K>,
    states: &BTreeSet<S>,
    opts: KleeneOptions,
) -> Option<S> {
    if !opts.smart_order {
        return states.iter().next().cloned();
    }
    states
        .iter()
        .min_by_key(|s| {
            let node = Some((*s).clone());
            let mut count = 0usize;
            for (from, to) in graph.keys() {
                if *to == node && !graph.contains_key(&(node.clone(), from.clone())) {
                    count += 1;
                }
                if *from == node && !graph.contains_key(&(to.clone(), node.clone())) {
                    count += 1;
                }
            }
            count
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::petri::PlaceId;
    use crate::semilinear::{LinearSet, SemilinearSet};
    use crate::vector::SparseVector;

    fn letter(p: u32) -> SemilinearSet {
        SemilinearSet::from_components(vec![LinearSet::singleton(SparseVector::unit(PlaceId(p)))])
    }

    fn v(pairs: &[(u32, u64)]) -> SparseVector {
        pairs.iter().map(|(p, n)| (PlaceId(*p), *n)).collect()
    }

    fn all_options() -> Vec<KleeneOptions> {
        let mut out = Vec::new();
        for smart_order in [false, true] {
            for generate_less in [false, true] {
                for remove_redundant in [false, true] {
                    out.push(KleeneOptions {
                        smart_order,
                        generate_less,
                        remove_redundant,
                        ..KleeneOptions::default()
                    });
                }
            }
        }
        out
    }

    #[test]
    fn single_state_with_loop_is_its_star() {
        let edges = vec![("a", letter(0), "a")];
        for opts in all_options() {
            let s = eliminate_states(&edges, "a", opts).unwrap();
            for n in 0..5 {
                assert!(s.contains(&v(&[(0, n)])), "{opts:?}");
            }
            assert!(!s.contains(&v(&[(1, 1)])));
        }
    }

    #[test]
    fn paths_respect_edge_order() {
        // a --x--> b --y--> b, b --z--> a
        let edges = vec![("a", letter(0), "b"), ("b", letter(1), "b"), ("b", letter(2), "a")];
        for opts in all_options() {
            let s = eliminate_states(&edges, "a", opts).unwrap();
            assert!(s.contains(&SparseVector::new()));
            assert!(s.contains(&v(&[(0, 1), (1, 4)])));
            assert!(s.contains(&v(&[(0, 2), (1, 1), (2, 1)])));
            assert!(s.contains(&v(&[(0, 2), (2, 2)])));
            // y or z without a preceding x is impossible
            assert!(!s.contains(&v(&[(1, 1)])), "{opts:?}");
            // two z's need two x's
            assert!(!s.contains(&v(&[(0, 1), (2, 2)])), "{opts:?}");
        }
    }

    #[test]
    fn unreachable_states_contribute_nothing() {
        let edges = vec![("b", letter(0), "b")];
        let s = eliminate_states(&edges, "a", KleeneOptions::default()).unwrap();
        assert!(s.contains(&SparseVector::new()));
        assert!(!s.contains(&v(&[(0, 1)])));
    }

    #[test]
    fn two_globals_with_crossing_edges_stay_small() {
        // g0 and g1 each loop on two letters and reach each other.
        let edges = vec![
            ("g0", letter(0), "g0"),
            ("g0", letter(1), "g0"),
            ("g0", letter(2), "g1"),
            ("g1", letter(3), "g1"),
            ("g1", letter(4), "g1"),
            ("g1", letter(5), "g0"),
        ];
        let s = eliminate_states(&edges, "g0", KleeneOptions::default()).unwrap();
        assert!(s.components.len() <= 8, "{}", s.components.len());
        assert!(s.contains(&v(&[(0, 3), (1, 1), (2, 2), (3, 1), (5, 1)])));
        assert!(s.contains(&v(&[(2, 1), (4, 7)])));
        assert!(!s.contains(&v(&[(5, 1)])));
        assert!(!s.contains(&v(&[(2, 2), (3, 1)])));
    }

    #[test]
    fn oversized_labels_fail_instead_of_growing() {
        let mut edges = Vec::new();
        for p in 0..6 {
            edges.push(("a", letter(p), "b"));
            edges.push(("b", letter(10 + p), "a"));
        }
        let opts = KleeneOptions {
            remove_redundant: false,
            max_size: 4,
            ..KleeneOptions::default()
        };
        assert_eq!(
            eliminate_states(&edges, "a", opts),
            Err(SizeExceeded { limit: 4 })
        );
    }
}
