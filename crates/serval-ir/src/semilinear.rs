//! Linear and semilinear sets of place vectors.
//!
//! A [`LinearSet`] `b + P*` denotes `{ b + Σ kᵢ·pᵢ : kᵢ ∈ ℕ }`; a
//! [`SemilinearSet`] is a finite union of them. All vectors are
//! non-negative, which makes membership decidable by bounded search.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kleene::Kleene;
use crate::petri::PlaceId;
use crate::vector::SparseVector;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinearSet {
    pub base: SparseVector,
    pub periods: Vec<SparseVector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemilinearSet {
    pub components: Vec<LinearSet>,
}

/// Is `target` a non-negative integer combination of `periods`?
///
/// Depth-first search on the lowest non-zero coordinate: any decomposition
/// must use a period that covers it. Failed remainders are memoised.
pub fn in_period_cone(target: &SparseVector, periods: &[SparseVector]) -> bool {
    fn go(
        rest: &SparseVector,
        periods: &[SparseVector],
        failed: &mut HashSet<SparseVector>,
    ) -> bool {
        let Some((pivot, _)) = rest.iter().next() else {
            return true;
        };
        if failed.contains(rest) {
            return false;
        }
        for p in periods {
            if p.get(pivot) == 0 || !p.le(rest) {
                continue;
            }
            if let Some(next) = rest.checked_minus(p) {
                if go(&next, periods, failed) {
                    return true;
                }
            }
        }
        failed.insert(rest.clone());
        false
    }

    let useful: Vec<SparseVector> = periods.iter().filter(|p| !p.is_zero()).cloned().collect();
    go(target, &useful, &mut HashSet::new())
}

impl LinearSet {
    pub fn singleton(base: SparseVector) -> Self {
        Self {
            base,
            periods: Vec::new(),
        }
    }

    pub fn new(base: SparseVector, periods: Vec<SparseVector>) -> Self {
        Self { base, periods }
    }

    pub fn contains(&self, v: &SparseVector) -> bool {
        match v.checked_minus(&self.base) {
            Some(rest) => in_period_cone(&rest, &self.periods),
            None => false,
        }
    }

    /// Sufficient test for `self ⊆ other`: the base is a member and every
    /// period lies in the other's period cone.
    pub fn subsumed_by(&self, other: &LinearSet) -> bool {
        other.contains(&self.base)
            && self
                .periods
                .iter()
                .all(|p| in_period_cone(p, &other.periods))
    }

    pub fn support(&self) -> impl Iterator<Item = PlaceId> + '_ {
        self.base
            .support()
            .chain(self.periods.iter().flat_map(|p| p.support()))
    }

    /// Drop zero and duplicate periods, then periods generated by the rest.
    pub fn simplified(&self) -> LinearSet {
        let mut periods: Vec<SparseVector> = Vec::new();
        for p in &self.periods {
            if !p.is_zero() && !periods.contains(p) {
                periods.push(p.clone());
            }
        }
        // Larger periods first so small generators survive.
        periods.sort_by(|a, b| b.total().cmp(&a.total()).then_with(|| a.cmp(b)));
        let mut i = 0;
        while i < periods.len() {
            let others: Vec<SparseVector> = periods
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| p.clone())
                .collect();
            if in_period_cone(&periods[i], &others) {
                periods.remove(i);
            } else {
                i += 1;
            }
        }
        periods.sort();
        LinearSet {
            base: self.base.clone(),
            periods,
        }
    }

    fn sum(&self, other: &LinearSet) -> LinearSet {
        let mut periods = self.periods.clone();
        for p in &other.periods {
            if !periods.contains(p) {
                periods.push(p.clone());
            }
        }
        LinearSet {
            base: self.base.plus(&other.base),
            periods,
        }
    }
}

/// `(⋃ bᵢ + P*)*` for components sharing the periods `P`. A non-zero member
/// uses some `bᵢ`, which can serve as its base, so one component per base
/// suffices. A zero base or an empty `P` leaves a single component.
fn star_of_group(periods: &[SparseVector], bases: &[SparseVector]) -> SemilinearSet {
    let mut all = periods.to_vec();
    for b in bases {
        if !b.is_zero() && !all.contains(b) {
            all.push(b.clone());
        }
    }
    if periods.is_empty() || bases.iter().any(SparseVector::is_zero) {
        return SemilinearSet {
            components: vec![LinearSet::new(SparseVector::new(), all)],
        };
    }
    let mut components = vec![LinearSet::singleton(SparseVector::new())];
    components.extend(bases.iter().map(|b| LinearSet::new(b.clone(), all.clone())));
    SemilinearSet { components }
}

impl SemilinearSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_components(components: Vec<LinearSet>) -> Self {
        Self { components }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn contains(&self, v: &SparseVector) -> bool {
        self.components.iter().any(|c| c.contains(v))
    }

    /// Sufficient test for `set ⊆ self` component-wise.
    pub fn covers(&self, set: &LinearSet) -> bool {
        self.components.iter().any(|c| set.subsumed_by(c))
    }

    pub fn num_periods(&self) -> usize {
        self.components.iter().map(|c| c.periods.len()).sum()
    }

    /// Distinct bases of the components, keyed by their non-zero periods.
    fn period_groups(&self) -> BTreeMap<Vec<SparseVector>, Vec<SparseVector>> {
        let mut groups: BTreeMap<Vec<SparseVector>, Vec<SparseVector>> = BTreeMap::new();
        for c in &self.components {
            let mut periods: Vec<SparseVector> =
                c.periods.iter().filter(|p| !p.is_zero()).cloned().collect();
            periods.sort();
            periods.dedup();
            let bases = groups.entry(periods).or_default();
            if !bases.contains(&c.base) {
                bases.push(c.base.clone());
            }
        }
        groups
    }

    /// Simplify every component and drop components subsumed by another
    /// surviving one. The denoted set is unchanged.
    pub fn remove_redundant(&self) -> SemilinearSet {
        let mut comps: Vec<LinearSet> = Vec::new();
        for c in &self.components {
            let c = c.simplified();
            if !comps.contains(&c) {
                comps.push(c);
            }
        }
        let mut keep = vec![true; comps.len()];
        for i in 0..comps.len() {
            let subsumed = (0..comps.len())
                .any(|j| j != i && keep[j] && comps[i].subsumed_by(&comps[j]));
            if subsumed {
                keep[i] = false;
            }
        }
        SemilinearSet {
            components: comps
                .into_iter()
                .zip(keep)
                .filter_map(|(c, k)| k.then_some(c))
                .collect(),
        }
    }
}

impl Kleene for SemilinearSet {
    fn zero() -> Self {
        SemilinearSet::empty()
    }

    fn one() -> Self {
        SemilinearSet {
            components: vec![LinearSet::singleton(SparseVector::new())],
        }
    }

    fn plus(mut self, other: Self) -> Self {
        self.components.extend(other.components);
        self
    }

    fn times(self, other: Self) -> Self {
        let mut components = Vec::with_capacity(self.components.len() * other.components.len());
        for a in &self.components {
            for b in &other.components {
                components.push(a.sum(b));
            }
        }
        SemilinearSet { components }
    }

    fn star(self) -> Self {
        self.period_groups()
            .iter()
            .map(|(periods, bases)| star_of_group(periods, bases))
            .fold(Self::one(), |acc, s| acc.times(s))
    }

    fn is_zero(&self) -> bool {
        self.components.is_empty()
    }

    fn is_one(&self) -> bool {
        self.components.len() == 1
            && self.components[0].base.is_zero()
            && self.components[0].periods.iter().all(|p| p.is_zero())
    }

    fn size(&self) -> usize {
        self.components.len()
    }

    fn star_size(&self) -> usize {
        self.period_groups()
            .iter()
            .map(|(periods, bases)| {
                if periods.is_empty() || bases.iter().any(SparseVector::is_zero) {
                    1
                } else {
                    bases.len() + 1
                }
            })
            .fold(1usize, usize::saturating_mul)
    }

    fn reduce(self) -> Self {
        self.remove_redundant()
    }
}

impl fmt::Display for LinearSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for p in &self.periods {
            write!(f, " + {p}*")?;
        }
        Ok(())
    }
}

impl fmt::Display for SemilinearSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "∅");
        }
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, " ∪ ")?;
            }
            write!(f, "({c})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(pairs: &[(u32, u64)]) -> SparseVector {
        pairs.iter().map(|(p, n)| (PlaceId(*p), *n)).collect()
    }

    #[test]
    fn membership_uses_non_negative_combinations() {
        let ls = LinearSet::new(v(&[(0, 1)]), vec![v(&[(0, 2)]), v(&[(1, 3)])]);
        assert!(ls.contains(&v(&[(0, 1)])));
        assert!(ls.contains(&v(&[(0, 5), (1, 6)])));
        assert!(!ls.contains(&v(&[(0, 2)])));
        assert!(!ls.contains(&v(&[(0, 1), (1, 2)])));
        assert!(!ls.contains(&SparseVector::new()));
    }

    #[test]
    fn cone_membership_needs_mixed_periods() {
        let periods = vec![v(&[(0, 1), (1, 1)]), v(&[(0, 2)])];
        assert!(in_period_cone(&v(&[(0, 3), (1, 1)]), &periods));
        assert!(!in_period_cone(&v(&[(0, 2), (1, 1)]), &periods));
    }

    #[test]
    fn subsumption_is_syntactic_but_exact_on_members() {
        let big = LinearSet::new(SparseVector::new(), vec![v(&[(0, 1)])]);
        let small = LinearSet::new(v(&[(0, 2)]), vec![v(&[(0, 3)])]);
        assert!(small.subsumed_by(&big));
        assert!(!big.subsumed_by(&small));
    }

    #[test]
    fn star_of_linear_set() {
        let s = SemilinearSet::from_components(vec![LinearSet::new(
            v(&[(0, 1)]),
            vec![v(&[(1, 1)])],
        )]);
        let star = s.star();
        assert!(star.contains(&SparseVector::new()));
        assert!(star.contains(&v(&[(0, 3), (1, 7)])));
        assert!(!star.contains(&v(&[(1, 1)])));
        assert_eq!(star.components.len(), 2);
    }

    #[test]
    fn star_of_singletons_is_one_linear_set() {
        let letters = SemilinearSet::from_components(
            (0..8).map(|p| LinearSet::singleton(v(&[(p, 1)]))).collect(),
        );
        assert_eq!(letters.star_size(), 1);
        let star = letters.star();
        assert_eq!(star.components.len(), 1);
        assert!(star.components[0].base.is_zero());
        assert!(star.contains(&v(&[(0, 2), (5, 1), (7, 4)])));

        let twice = SemilinearSet::from_components(vec![LinearSet::singleton(v(&[(0, 2)]))]).star();
        assert_eq!(twice.components.len(), 1);
        assert!(twice.contains(&v(&[(0, 4)])));
        assert!(!twice.contains(&v(&[(0, 3)])));
    }

    #[test]
    fn star_size_matches_the_built_star() {
        let s = SemilinearSet::from_components(vec![
            LinearSet::new(v(&[(0, 2)]), vec![v(&[(0, 1)])]),
            LinearSet::new(v(&[(1, 1)]), vec![v(&[(2, 1)])]),
            LinearSet::singleton(v(&[(3, 1)])),
        ]);
        assert_eq!(s.star_size(), 4);
        let star = s.clone().star();
        assert_eq!(star.components.len(), s.star_size());
        // 2p + p* never yields a lone p.
        assert!(!star.contains(&v(&[(0, 1)])));
        assert!(star.contains(&v(&[(0, 3), (3, 2)])));
    }

    #[test]
    fn shared_periods_star_linearly() {
        // Eight bases over the same period: 9 components, not 2^8.
        let p = v(&[(9, 1)]);
        let s = SemilinearSet::from_components(
            (0..8).map(|i| LinearSet::new(v(&[(i, 1)]), vec![p.clone()])).collect(),
        );
        assert_eq!(s.star_size(), 9);
        let star = s.star();
        assert_eq!(star.components.len(), 9);
        assert!(star.contains(&SparseVector::new()));
        assert!(star.contains(&v(&[(0, 2), (3, 1), (9, 5)])));
        // The period only comes with some base.
        assert!(!star.contains(&v(&[(9, 1)])));
    }

    #[test]
    fn times_and_plus() {
        let a = SemilinearSet::from_components(vec![LinearSet::singleton(v(&[(0, 1)]))]);
        let b = SemilinearSet::from_components(vec![
            LinearSet::singleton(v(&[(1, 1)])),
            LinearSet::singleton(SparseVector::new()),
        ]);
        let ab = a.clone().times(b.clone());
        assert!(ab.contains(&v(&[(0, 1), (1, 1)])));
        assert!(ab.contains(&v(&[(0, 1)])));
        assert!(!ab.contains(&v(&[(1, 1)])));
        assert_eq!(a.plus(b).components.len(), 3);
        assert!(SemilinearSet::zero().times(ab).is_zero());
    }

    #[test]
    fn remove_redundant_preserves_the_denoted_set() {
        let s = SemilinearSet::from_components(vec![
            LinearSet::new(SparseVector::new(), vec![v(&[(0, 1)]), v(&[(0, 2)]), SparseVector::new()]),
            LinearSet::new(v(&[(0, 4)]), vec![v(&[(0, 1)])]),
            LinearSet::singleton(v(&[(1, 1)])),
        ]);
        let r = s.remove_redundant();
        assert_eq!(r.components.len(), 2);
        assert_eq!(r.components[0].periods, vec![v(&[(0, 1)])]);
        for x in 0..6 {
            for y in 0..3 {
                let p = v(&[(0, x), (1, y)]);
                assert_eq!(s.contains(&p), r.contains(&p), "{p}");
            }
        }
    }

    #[test]
    fn equal_components_keep_one_copy() {
        let c = LinearSet::new(v(&[(0, 1)]), vec![v(&[(1, 1)])]);
        let s = SemilinearSet::from_components(vec![c.clone(), c.clone()]);
        assert_eq!(s.remove_redundant().components, vec![c]);
    }
}
