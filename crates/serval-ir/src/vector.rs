//! Sparse non-negative integer vectors indexed by place.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::petri::PlaceId;

/// A vector over places with implicit zeros. Zero entries are never stored,
/// so structural equality is value equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<(PlaceId, u64)>", into = "Vec<(PlaceId, u64)>")]
pub struct SparseVector {
    entries: BTreeMap<PlaceId, u64>,
}

impl From<Vec<(PlaceId, u64)>> for SparseVector {
    fn from(pairs: Vec<(PlaceId, u64)>) -> Self {
        let mut v = SparseVector::new();
        for (p, n) in pairs {
            v.add_at(p, n);
        }
        v
    }
}

impl From<SparseVector> for Vec<(PlaceId, u64)> {
    fn from(v: SparseVector) -> Self {
        v.entries.into_iter().collect()
    }
}

impl FromIterator<(PlaceId, u64)> for SparseVector {
    fn from_iter<I: IntoIterator<Item = (PlaceId, u64)>>(iter: I) -> Self {
        let mut v = SparseVector::new();
        for (p, n) in iter {
            v.add_at(p, n);
        }
        v
    }
}

impl SparseVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(place: PlaceId) -> Self {
        let mut v = Self::new();
        v.add_at(place, 1);
        v
    }

    pub fn get(&self, place: PlaceId) -> u64 {
        self.entries.get(&place).copied().unwrap_or(0)
    }

    pub fn set(&mut self, place: PlaceId, value: u64) {
        if value == 0 {
            self.entries.remove(&place);
        } else {
            self.entries.insert(place, value);
        }
    }

    pub fn add_at(&mut self, place: PlaceId, amount: u64) {
        let v = self.get(place).saturating_add(amount);
        self.set(place, v);
    }

    /// Decrement one entry; `None` when it would go negative.
    pub fn sub_at(&mut self, place: PlaceId, amount: u64) -> Option<()> {
        let v = self.get(place).checked_sub(amount)?;
        self.set(place, v);
        Some(())
    }

    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, u64)> + '_ {
        self.entries.iter().map(|(p, n)| (*p, *n))
    }

    pub fn support(&self) -> impl Iterator<Item = PlaceId> + '_ {
        self.entries.keys().copied()
    }

    pub fn total(&self) -> u64 {
        self.entries.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    pub fn plus(&self, other: &SparseVector) -> SparseVector {
        let mut out = self.clone();
        for (p, n) in other.iter() {
            out.add_at(p, n);
        }
        out
    }

    pub fn scaled(&self, factor: u64) -> SparseVector {
        self.iter()
            .map(|(p, n)| (p, n.saturating_mul(factor)))
            .collect()
    }

    /// `self - other` when `other <= self` componentwise.
    pub fn checked_minus(&self, other: &SparseVector) -> Option<SparseVector> {
        let mut out = self.clone();
        for (p, n) in other.iter() {
            out.sub_at(p, n)?;
        }
        Some(out)
    }

    /// Componentwise `self <= other`.
    pub fn le(&self, other: &SparseVector) -> bool {
        self.iter().all(|(p, n)| n <= other.get(p))
    }
}

impl fmt::Display for SparseVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (p, n)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}: {n}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(pairs: &[(u32, u64)]) -> SparseVector {
        pairs.iter().map(|(p, n)| (PlaceId(*p), *n)).collect()
    }

    #[test]
    fn zero_entries_are_not_stored() {
        let mut a = v(&[(1, 2)]);
        a.sub_at(PlaceId(1), 2).unwrap();
        assert!(a.is_zero());
        assert_eq!(a, SparseVector::new());
    }

    #[test]
    fn subtraction_below_zero_fails() {
        let mut a = v(&[(0, 1)]);
        assert!(a.sub_at(PlaceId(0), 2).is_none());
        assert_eq!(a.get(PlaceId(0)), 1);
        assert!(v(&[(0, 1)]).checked_minus(&v(&[(1, 1)])).is_none());
    }

    #[test]
    fn order_and_arithmetic() {
        let a = v(&[(0, 1), (2, 3)]);
        let b = v(&[(0, 2), (2, 3), (5, 1)]);
        assert!(a.le(&b));
        assert!(!b.le(&a));
        assert_eq!(b.checked_minus(&a).unwrap(), v(&[(0, 1), (5, 1)]));
        assert_eq!(a.plus(&a), a.scaled(2));
        assert_eq!(b.total(), 6);
    }

    #[test]
    fn serializes_as_pairs() {
        let a = v(&[(3, 1), (1, 4)]);
        let text = serde_json::to_string(&a).unwrap();
        assert_eq!(text, "[[1,4],[3,1]]");
        let back: SparseVector = serde_json::from_str(&text).unwrap();
        assert_eq!(back, a);
    }
}
