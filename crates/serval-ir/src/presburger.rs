//! Exact Presburger arithmetic over place counters.
//!
//! Formulas are kept in disjunctive normal form over normalised atoms
//! (`e = 0`, `e >= 0`, `m | e`). Existential quantifiers are removed with
//! Cooper's method, which is what lets the non-serializable region
//! `N^Completed \ Ser` be computed exactly rather than approximated.
//!
//! All arithmetic is checked; a computation that would overflow `i64`
//! reports [`PresburgerError::Overflow`] instead of producing a wrong
//! answer, and every elimination is bounded by a [`PresburgerBudget`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kleene::SizeExceeded;
use crate::petri::{PetriNet, PlaceId};
use crate::semilinear::{LinearSet, SemilinearSet};
use crate::vector::SparseVector;

pub const DEFAULT_MAX_CONJUNCTS: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresburgerError {
    #[error("integer overflow in Presburger arithmetic")]
    Overflow,
    #[error("Presburger computation exceeded its budget of {limit} conjuncts")]
    BudgetExceeded { limit: usize },
    #[error("serial set exceeded its budget of {limit} linear components")]
    ComponentBudgetExceeded { limit: usize },
}

impl From<SizeExceeded> for PresburgerError {
    fn from(e: SizeExceeded) -> Self {
        PresburgerError::ComponentBudgetExceeded { limit: e.limit }
    }
}

type Result<T> = std::result::Result<T, PresburgerError>;

/// Upper bound on the number of conjuncts a single operation may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresburgerBudget {
    pub max_conjuncts: usize,
}

impl Default for PresburgerBudget {
    fn default() -> Self {
        Self {
            max_conjuncts: DEFAULT_MAX_CONJUNCTS,
        }
    }
}

/// A variable ranging over the integers: either a place counter or an
/// auxiliary (period multiplier) introduced by a formula builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Var {
    Place(PlaceId),
    Aux(u32),
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Place(p) => write!(f, "{p}"),
            Var::Aux(i) => write!(f, "k{i}"),
        }
    }
}

/// `Σ cᵢ·vᵢ + constant` with no zero coefficients stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "LinExprRepr", into = "LinExprRepr")]
pub struct LinExpr {
    terms: BTreeMap<Var, i64>,
    constant: i64,
}

#[derive(Serialize, Deserialize)]
struct LinExprRepr {
    terms: Vec<(Var, i64)>,
    constant: i64,
}

impl From<LinExprRepr> for LinExpr {
    fn from(repr: LinExprRepr) -> Self {
        LinExpr {
            terms: repr.terms.into_iter().filter(|(_, c)| *c != 0).collect(),
            constant: repr.constant,
        }
    }
}

impl From<LinExpr> for LinExprRepr {
    fn from(expr: LinExpr) -> Self {
        LinExprRepr {
            terms: expr.terms.into_iter().collect(),
            constant: expr.constant,
        }
    }
}

fn add(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b).ok_or(PresburgerError::Overflow)
}

fn mul(a: i64, b: i64) -> Result<i64> {
    a.checked_mul(b).ok_or(PresburgerError::Overflow)
}

fn to_i64(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| PresburgerError::Overflow)
}

fn gcd(a: i64, b: i64) -> Result<i64> {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    to_i64(a)
}

fn lcm(a: i64, b: i64) -> Result<i64> {
    if a == 0 || b == 0 {
        return Ok(0);
    }
    let g = gcd(a, b)?;
    mul((a / g).abs(), b.abs())
}

impl LinExpr {
    pub fn constant(c: i64) -> Self {
        LinExpr {
            terms: BTreeMap::new(),
            constant: c,
        }
    }

    pub fn var(v: Var) -> Self {
        Self::term(v, 1)
    }

    pub fn term(v: Var, coeff: i64) -> Self {
        let mut terms = BTreeMap::new();
        if coeff != 0 {
            terms.insert(v, coeff);
        }
        LinExpr { terms, constant: 0 }
    }

    pub fn place(p: PlaceId) -> Self {
        Self::var(Var::Place(p))
    }

    pub fn coeff(&self, v: Var) -> i64 {
        self.terms.get(&v).copied().unwrap_or(0)
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    pub fn terms(&self) -> impl Iterator<Item = (Var, i64)> + '_ {
        self.terms.iter().map(|(v, c)| (*v, *c))
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.terms.keys().copied()
    }

    pub fn is_ground(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn plus(&self, other: &LinExpr) -> Result<LinExpr> {
        let mut out = self.clone();
        for (v, c) in &other.terms {
            let sum = add(out.coeff(*v), *c)?;
            if sum == 0 {
                out.terms.remove(v);
            } else {
                out.terms.insert(*v, sum);
            }
        }
        out.constant = add(out.constant, other.constant)?;
        Ok(out)
    }

    pub fn minus(&self, other: &LinExpr) -> Result<LinExpr> {
        self.plus(&other.scaled(-1)?)
    }

    pub fn scaled(&self, k: i64) -> Result<LinExpr> {
        if k == 0 {
            return Ok(LinExpr::default());
        }
        let mut terms = BTreeMap::new();
        for (v, c) in &self.terms {
            terms.insert(*v, mul(*c, k)?);
        }
        Ok(LinExpr {
            terms,
            constant: mul(self.constant, k)?,
        })
    }

    pub fn offset(&self, c: i64) -> Result<LinExpr> {
        let mut out = self.clone();
        out.constant = add(out.constant, c)?;
        Ok(out)
    }

    /// The expression with the `v` term dropped.
    pub fn without(&self, v: Var) -> LinExpr {
        let mut out = self.clone();
        out.terms.remove(&v);
        out
    }

    /// Replace `v` by `by`.
    pub fn substitute(&self, v: Var, by: &LinExpr) -> Result<LinExpr> {
        let c = self.coeff(v);
        if c == 0 {
            return Ok(self.clone());
        }
        self.without(v).plus(&by.scaled(c)?)
    }

    /// Evaluate under `value`; `None` on overflow.
    pub fn eval(&self, value: impl Fn(Var) -> i128) -> Option<i128> {
        let mut acc = i128::from(self.constant);
        for (v, c) in &self.terms {
            acc = acc.checked_add(i128::from(*c).checked_mul(value(*v))?)?;
        }
        Some(acc)
    }

    fn render(&self, name: &dyn Fn(Var) -> String) -> String {
        let mut out = String::new();
        for (v, c) in &self.terms {
            let sign = if *c < 0 { "-" } else { "+" };
            if out.is_empty() {
                if *c < 0 {
                    out.push('-');
                }
            } else {
                out.push_str(&format!(" {sign} "));
            }
            if c.unsigned_abs() != 1 {
                out.push_str(&format!("{}*", c.unsigned_abs()));
            }
            out.push_str(&name(*v));
        }
        if out.is_empty() {
            return self.constant.to_string();
        }
        if self.constant != 0 {
            let sign = if self.constant < 0 { "-" } else { "+" };
            out.push_str(&format!(" {sign} {}", self.constant.unsigned_abs()));
        }
        out
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&|v| v.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Relation {
    /// `e = 0`
    Eq,
    /// `e >= 0`
    Ge,
    /// `modulus | e`
    Div { modulus: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Atom {
    pub expr: LinExpr,
    pub relation: Relation,
}

/// Outcome of normalising an atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simplified {
    True,
    False,
    Atom(Atom),
}

impl Atom {
    pub fn eq(expr: LinExpr) -> Self {
        Atom {
            expr,
            relation: Relation::Eq,
        }
    }

    pub fn ge(expr: LinExpr) -> Self {
        Atom {
            expr,
            relation: Relation::Ge,
        }
    }

    pub fn divides(modulus: i64, expr: LinExpr) -> Self {
        Atom {
            expr,
            relation: Relation::Div { modulus },
        }
    }

    /// Multiply through by `k > 0`; divisibility moduli scale too.
    fn scaled(&self, k: i64) -> Result<Atom> {
        let relation = match self.relation {
            Relation::Div { modulus } => Relation::Div {
                modulus: mul(modulus, k)?,
            },
            other => other,
        };
        Ok(Atom {
            expr: self.expr.scaled(k)?,
            relation,
        })
    }

    fn substitute(&self, v: Var, by: &LinExpr) -> Result<Atom> {
        Ok(Atom {
            expr: self.expr.substitute(v, by)?,
            relation: self.relation,
        })
    }

    /// Bring the atom into canonical form, deciding it when it is ground.
    pub fn normalized(&self) -> Result<Simplified> {
        let decide = |b: bool| {
            if b {
                Simplified::True
            } else {
                Simplified::False
            }
        };
        let c = self.expr.constant;
        match self.relation {
            Relation::Eq => {
                if self.expr.is_ground() {
                    return Ok(decide(c == 0));
                }
                let g = self.expr.terms.values().try_fold(0, |g, c| gcd(g, *c))?;
                if c % g != 0 {
                    return Ok(Simplified::False);
                }
                let first_negative = self.expr.terms.values().next().is_some_and(|c| *c < 0);
                let sign = if first_negative { -1 } else { 1 };
                let terms = self
                    .expr
                    .terms
                    .iter()
                    .map(|(v, k)| (*v, sign * (k / g)))
                    .collect();
                Ok(Simplified::Atom(Atom::eq(LinExpr {
                    terms,
                    constant: sign * (c / g),
                })))
            }
            Relation::Ge => {
                if self.expr.is_ground() {
                    return Ok(decide(c >= 0));
                }
                let g = self.expr.terms.values().try_fold(0, |g, c| gcd(g, *c))?;
                let terms = self.expr.terms.iter().map(|(v, k)| (*v, k / g)).collect();
                Ok(Simplified::Atom(Atom::ge(LinExpr {
                    terms,
                    constant: c.div_euclid(g),
                })))
            }
            Relation::Div { modulus } => {
                let m = modulus.checked_abs().ok_or(PresburgerError::Overflow)?;
                if m == 0 {
                    return Atom::eq(self.expr.clone()).normalized();
                }
                let terms: BTreeMap<Var, i64> = self
                    .expr
                    .terms
                    .iter()
                    .map(|(v, k)| (*v, k.rem_euclid(m)))
                    .filter(|(_, k)| *k != 0)
                    .collect();
                let c = c.rem_euclid(m);
                if terms.is_empty() {
                    return Ok(decide(c == 0));
                }
                let g = terms.values().try_fold(m, |g, k| gcd(g, *k))?;
                if c % g != 0 {
                    return Ok(Simplified::False);
                }
                let m = m / g;
                if m == 1 {
                    return Ok(Simplified::True);
                }
                let terms = terms.into_iter().map(|(v, k)| (v, k / g)).collect();
                Ok(Simplified::Atom(Atom::divides(
                    m,
                    LinExpr {
                        terms,
                        constant: c / g,
                    },
                )))
            }
        }
    }

    /// The negation as a disjunction of atoms.
    pub fn negated(&self) -> Result<Vec<Atom>> {
        Ok(match self.relation {
            Relation::Ge => vec![Atom::ge(self.expr.scaled(-1)?.offset(-1)?)],
            Relation::Eq => vec![
                Atom::ge(self.expr.offset(-1)?),
                Atom::ge(self.expr.scaled(-1)?.offset(-1)?),
            ],
            Relation::Div { modulus } => {
                let mut out = Vec::new();
                for r in 1..modulus.abs() {
                    out.push(Atom::divides(modulus, self.expr.offset(-r)?));
                }
                out
            }
        })
    }

    pub fn holds(&self, value: impl Fn(Var) -> i128) -> Result<bool> {
        let e = self.expr.eval(value).ok_or(PresburgerError::Overflow)?;
        Ok(match self.relation {
            Relation::Eq => e == 0,
            Relation::Ge => e >= 0,
            Relation::Div { modulus } => modulus != 0 && e.rem_euclid(i128::from(modulus)) == 0,
        })
    }

    fn render(&self, name: &dyn Fn(Var) -> String) -> String {
        let e = self.expr.render(name);
        match self.relation {
            Relation::Eq => format!("{e} = 0"),
            Relation::Ge => format!("{e} >= 0"),
            Relation::Div { modulus } => format!("{modulus} | {e}"),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&|v| v.to_string()))
    }
}

/// A normalised conjunction of atoms. The empty conjunction is `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conjunct {
    atoms: Vec<Atom>,
}

impl Conjunct {
    pub fn top() -> Self {
        Conjunct::default()
    }

    /// Normalise `atoms`; `None` when the conjunction is trivially false.
    pub fn new(atoms: impl IntoIterator<Item = Atom>) -> Result<Option<Conjunct>> {
        let mut ge: BTreeMap<BTreeMap<Var, i64>, i64> = BTreeMap::new();
        let mut eq: BTreeMap<BTreeMap<Var, i64>, i64> = BTreeMap::new();
        let mut other = BTreeSet::new();
        for atom in atoms {
            let atom = match atom.normalized()? {
                Simplified::True => continue,
                Simplified::False => return Ok(None),
                Simplified::Atom(a) => a,
            };
            match atom.relation {
                Relation::Ge => {
                    let slot = ge.entry(atom.expr.terms).or_insert(atom.expr.constant);
                    *slot = (*slot).min(atom.expr.constant);
                }
                Relation::Eq => match eq.get(&atom.expr.terms) {
                    Some(c) if *c != atom.expr.constant => return Ok(None),
                    Some(_) => {}
                    None => {
                        eq.insert(atom.expr.terms, atom.expr.constant);
                    }
                },
                Relation::Div { .. } => {
                    other.insert(atom);
                }
            }
        }
        let mut atoms: Vec<Atom> = other.into_iter().collect();
        atoms.extend(
            eq.into_iter()
                .map(|(terms, constant)| Atom::eq(LinExpr { terms, constant })),
        );
        atoms.extend(
            ge.into_iter()
                .map(|(terms, constant)| Atom::ge(LinExpr { terms, constant })),
        );
        atoms.sort();
        Ok(Some(Conjunct { atoms }))
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn is_top(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn with(&self, atom: Atom) -> Result<Option<Conjunct>> {
        Conjunct::new(self.atoms.iter().cloned().chain(std::iter::once(atom)))
    }

    pub fn and(&self, other: &Conjunct) -> Result<Option<Conjunct>> {
        Conjunct::new(self.atoms.iter().chain(&other.atoms).cloned())
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        self.atoms.iter().flat_map(|a| a.expr.vars()).collect()
    }

    pub fn places(&self) -> BTreeSet<PlaceId> {
        self.vars()
            .into_iter()
            .filter_map(|v| match v {
                Var::Place(p) => Some(p),
                Var::Aux(_) => None,
            })
            .collect()
    }

    /// Whether the counters in `v` satisfy every atom. Auxiliary
    /// variables read as zero.
    pub fn holds(&self, v: &SparseVector) -> Result<bool> {
        let value = |var: Var| match var {
            Var::Place(p) => i128::from(v.get(p)),
            Var::Aux(_) => 0,
        };
        for atom in &self.atoms {
            if !atom.holds(value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Negation as a flat disjunction of atoms.
    pub fn negated(&self) -> Result<Vec<Atom>> {
        let mut out = Vec::new();
        for atom in &self.atoms {
            out.extend(atom.negated()?);
        }
        Ok(out)
    }

    fn is_superset_of(&self, other: &Conjunct) -> bool {
        other.atoms.iter().all(|a| self.atoms.binary_search(a).is_ok())
    }

    /// Human-readable rendering using the net's place names.
    pub fn render(&self, net: &PetriNet) -> String {
        if self.atoms.is_empty() {
            return "true".into();
        }
        let name = |v: Var| match v {
            Var::Place(p) => net.place_name(p),
            Var::Aux(i) => format!("k{i}"),
        };
        self.atoms
            .iter()
            .map(|a| a.render(&name))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl fmt::Display for Conjunct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.atoms.is_empty() {
            return write!(f, "true");
        }
        for (i, a) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, " && ")?;
            }
            write!(f, "{a}")?;
        }
        Ok(())
    }
}

/// Disjunction of conjuncts. The empty disjunction is `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dnf {
    conjuncts: Vec<Conjunct>,
}

impl Dnf {
    pub fn falsum() -> Self {
        Dnf::default()
    }

    pub fn from_conjuncts(conjuncts: Vec<Conjunct>) -> Self {
        Dnf { conjuncts }
    }

    pub fn conjuncts(&self) -> &[Conjunct] {
        &self.conjuncts
    }

    pub fn into_conjuncts(self) -> Vec<Conjunct> {
        self.conjuncts
    }

    pub fn is_false(&self) -> bool {
        self.conjuncts.is_empty()
    }

    pub fn holds(&self, v: &SparseVector) -> Result<bool> {
        for c in &self.conjuncts {
            if c.holds(v)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Cooper elimination with a conjunct budget.
struct Eliminator {
    limit: usize,
    produced: usize,
}

impl Eliminator {
    fn new(budget: PresburgerBudget) -> Self {
        Eliminator {
            limit: budget.max_conjuncts,
            produced: 0,
        }
    }

    fn charge(&mut self, n: usize) -> Result<()> {
        self.produced = self.produced.saturating_add(n);
        if self.produced > self.limit {
            return Err(PresburgerError::BudgetExceeded { limit: self.limit });
        }
        Ok(())
    }

    /// `∃y. conj` as a list of conjuncts without `y`.
    fn eliminate(&mut self, conj: &Conjunct, y: Var) -> Result<Vec<Conjunct>> {
        let (with_y, rest): (Vec<&Atom>, Vec<&Atom>) =
            conj.atoms.iter().partition(|a| a.expr.coeff(y) != 0);
        if with_y.is_empty() {
            return Ok(vec![conj.clone()]);
        }
        let rest: Vec<Atom> = rest.into_iter().cloned().collect();

        if let Some(pos) = with_y.iter().position(|a| a.relation == Relation::Eq) {
            // a·y + t = 0 with a > 0: substitute a·y := -t everywhere.
            let eq = with_y[pos];
            let mut a = eq.expr.coeff(y);
            let mut t = eq.expr.without(y);
            if a < 0 {
                a = -a;
                t = t.scaled(-1)?;
            }
            let mut atoms = rest;
            for (i, atom) in with_y.iter().enumerate() {
                if i == pos {
                    continue;
                }
                let c = atom.expr.coeff(y);
                let scaled = atom.scaled(a)?;
                atoms.push(Atom {
                    expr: scaled.expr.without(y).minus(&t.scaled(c)?)?,
                    relation: scaled.relation,
                });
            }
            if a > 1 {
                atoms.push(Atom::divides(a, t));
            }
            self.charge(1)?;
            return Ok(Conjunct::new(atoms)?.into_iter().collect());
        }

        // Scale every atom so that y appears with coefficient ±δ, then
        // rename δ·y to y.
        let mut delta = 1;
        for atom in &with_y {
            delta = lcm(delta, atom.expr.coeff(y))?;
        }
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        let mut bounded = Vec::new();
        let mut modulus_lcm = 1;
        for atom in &with_y {
            let c = atom.expr.coeff(y);
            let scaled = atom.scaled(delta / c.abs())?;
            let t = scaled.expr.without(y);
            let renamed = Atom {
                expr: LinExpr::term(y, c.signum()).plus(&t)?,
                relation: scaled.relation,
            };
            match scaled.relation {
                Relation::Ge if c > 0 => lowers.push(t.scaled(-1)?),
                Relation::Ge => uppers.push(t),
                Relation::Div { modulus } => modulus_lcm = lcm(modulus_lcm, modulus)?,
                Relation::Eq => {}
            }
            bounded.push(renamed);
        }
        if delta > 1 {
            bounded.push(Atom::divides(delta, LinExpr::var(y)));
            modulus_lcm = lcm(modulus_lcm, delta)?;
        }
        let period = usize::try_from(modulus_lcm).map_err(|_| PresburgerError::Overflow)?;

        let mut out = Vec::new();
        if lowers.is_empty() || uppers.is_empty() {
            // y is unbounded on one side: only the divisibility residue
            // matters.
            self.charge(period)?;
            let divs: Vec<&Atom> = bounded
                .iter()
                .filter(|a| matches!(a.relation, Relation::Div { .. }))
                .collect();
            for j in 1..=modulus_lcm {
                let value = LinExpr::constant(j);
                let mut atoms = rest.clone();
                for d in &divs {
                    atoms.push(d.substitute(y, &value)?);
                }
                out.extend(Conjunct::new(atoms)?);
            }
        } else {
            let (bounds, sign) = if lowers.len() <= uppers.len() {
                (&lowers, 1)
            } else {
                (&uppers, -1)
            };
            self.charge(period.saturating_mul(bounds.len()))?;
            for bound in bounds {
                for j in 0..modulus_lcm {
                    let value = bound.offset(mul(sign, j)?)?;
                    let mut atoms = rest.clone();
                    for b in &bounded {
                        atoms.push(b.substitute(y, &value)?);
                    }
                    out.extend(Conjunct::new(atoms)?);
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Eliminate every variable accepted by `quantified`.
    fn project(
        &mut self,
        conj: Conjunct,
        quantified: &dyn Fn(Var) -> bool,
    ) -> Result<Vec<Conjunct>> {
        let mut out = Vec::new();
        let mut stack = vec![conj];
        while let Some(c) = stack.pop() {
            match pick_var(&c, quantified) {
                None => out.push(c),
                Some(y) => stack.extend(self.eliminate(&c, y)?),
            }
        }
        out.sort();
        out.dedup();
        Ok(prune_supersets(out))
    }

    fn satisfiable(&mut self, conj: Conjunct) -> Result<bool> {
        let mut stack = vec![conj];
        while let Some(c) = stack.pop() {
            match pick_var(&c, &|_| true) {
                None => return Ok(true),
                Some(y) => stack.extend(self.eliminate(&c, y)?),
            }
        }
        Ok(false)
    }
}

/// Prefer a variable bound by an equation, then the rarest one.
fn pick_var(conj: &Conjunct, quantified: &dyn Fn(Var) -> bool) -> Option<Var> {
    let mut occurrences: BTreeMap<Var, (bool, usize)> = BTreeMap::new();
    for atom in &conj.atoms {
        for v in atom.expr.vars().filter(|v| quantified(*v)) {
            let slot = occurrences.entry(v).or_insert((false, 0));
            slot.0 |= atom.relation == Relation::Eq;
            slot.1 += 1;
        }
    }
    occurrences
        .into_iter()
        .min_by_key(|(_, (has_eq, count))| (!*has_eq, *count))
        .map(|(v, _)| v)
}

/// Drop conjuncts that contain every atom of another conjunct.
fn prune_supersets(conjuncts: Vec<Conjunct>) -> Vec<Conjunct> {
    let mut keep = vec![true; conjuncts.len()];
    for i in 0..conjuncts.len() {
        for j in 0..conjuncts.len() {
            if i != j && keep[j] && conjuncts[i] != conjuncts[j] && conjuncts[i].is_superset_of(&conjuncts[j]) {
                keep[i] = false;
                break;
            }
        }
    }
    conjuncts
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect()
}

/// Decide satisfiability of `conj` over the integers.
pub fn is_satisfiable(conj: &Conjunct, budget: PresburgerBudget) -> Result<bool> {
    Eliminator::new(budget).satisfiable(conj.clone())
}

/// Whether every integer point of `a` also satisfies `b`.
pub fn implies(a: &Conjunct, b: &Conjunct, budget: PresburgerBudget) -> Result<bool> {
    for alt in b.negated()? {
        if let Some(c) = a.with(alt)? {
            if is_satisfiable(&c, budget)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Remove every auxiliary variable from `conj` existentially.
pub fn eliminate_aux(conj: &Conjunct, budget: PresburgerBudget) -> Result<Dnf> {
    let conjuncts = Eliminator::new(budget).project(conj.clone(), &|v| matches!(v, Var::Aux(_)))?;
    Ok(Dnf { conjuncts })
}

/// `x = base + Σ kᵢ·periodᵢ ∧ kᵢ >= 0` over the places in `dims` and the
/// set's support, with `kᵢ` as `Aux(i)`.
pub fn linear_set_formula(set: &LinearSet, dims: &BTreeSet<PlaceId>) -> Result<Conjunct> {
    let mut places: BTreeSet<PlaceId> = dims.clone();
    places.extend(set.support());
    let mut atoms = Vec::new();
    for p in places {
        let mut expr = LinExpr::place(p).offset(-to_i64(set.base.get(p))?)?;
        for (i, period) in set.periods.iter().enumerate() {
            let k = aux(i)?;
            expr = expr.plus(&LinExpr::term(k, -to_i64(period.get(p))?))?;
        }
        atoms.push(Atom::eq(expr));
    }
    for i in 0..set.periods.len() {
        atoms.push(Atom::ge(LinExpr::var(aux(i)?)));
    }
    // Equations with non-negative right-hand sides are always consistent.
    Ok(Conjunct::new(atoms)?.unwrap_or_default())
}

fn aux(i: usize) -> Result<Var> {
    u32::try_from(i)
        .map(Var::Aux)
        .map_err(|_| PresburgerError::Overflow)
}

/// `{x ∈ N^dims : x ∉ set}` in DNF. Unsatisfiable and subsumed conjuncts
/// are removed, so an empty result means `set` covers all of `N^dims`.
pub fn complement(
    set: &SemilinearSet,
    dims: &BTreeSet<PlaceId>,
    budget: PresburgerBudget,
) -> Result<Dnf> {
    let nonneg = dims.iter().map(|p| Atom::ge(LinExpr::place(*p)));
    let mut current: Vec<Conjunct> = Conjunct::new(nonneg)?.into_iter().collect();

    for component in &set.components {
        let membership = linear_set_formula(component, dims)?;
        let members = eliminate_aux(&membership, budget)?;
        for member in members.conjuncts {
            if member.is_top() {
                return Ok(Dnf::falsum());
            }
            let alternatives = member.negated()?;
            let mut next = Vec::new();
            for c in &current {
                for alt in &alternatives {
                    if let Some(n) = c.with(alt.clone())? {
                        if is_satisfiable(&n, budget)? {
                            next.push(n);
                        }
                    }
                }
            }
            next.sort();
            next.dedup();
            current = prune_supersets(next);
            if current.len() > budget.max_conjuncts {
                return Err(PresburgerError::BudgetExceeded {
                    limit: budget.max_conjuncts,
                });
            }
            if current.is_empty() {
                return Ok(Dnf::falsum());
            }
        }
    }

    Ok(Dnf {
        conjuncts: drop_implied(current, budget)?,
    })
}

const SEMANTIC_PRUNE_LIMIT: usize = 64;

/// Drop conjuncts whose points all satisfy some other kept conjunct.
fn drop_implied(conjuncts: Vec<Conjunct>, budget: PresburgerBudget) -> Result<Vec<Conjunct>> {
    if conjuncts.len() > SEMANTIC_PRUNE_LIMIT {
        return Ok(conjuncts);
    }
    let mut keep = vec![true; conjuncts.len()];
    for i in 0..conjuncts.len() {
        for j in 0..conjuncts.len() {
            if i != j && keep[j] && implies(&conjuncts[i], &conjuncts[j], budget)? {
                keep[i] = false;
                break;
            }
        }
    }
    Ok(conjuncts
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect())
}

/// Periods of `set` that keep every place in `zero` empty.
fn periods_avoiding<'a>(set: &'a LinearSet, zero: &BTreeSet<PlaceId>) -> Vec<&'a SparseVector> {
    set.periods
        .iter()
        .filter(|p| !p.support().any(|q| zero.contains(&q)))
        .collect()
}

/// Whether some member of `set` with all `zero` places empty satisfies
/// `conj`.
pub fn linear_set_meets(
    set: &LinearSet,
    conj: &Conjunct,
    zero: &BTreeSet<PlaceId>,
    budget: PresburgerBudget,
) -> Result<bool> {
    if set.base.support().any(|p| zero.contains(&p)) {
        return Ok(false);
    }
    if conj.holds(&set.base)? {
        return Ok(true);
    }
    let periods = periods_avoiding(set, zero);
    if periods.is_empty() {
        return Ok(false);
    }
    let mut atoms = Vec::new();
    for atom in &conj.atoms {
        let mut current = atom.clone();
        for p in atom.expr.vars().filter_map(|v| match v {
            Var::Place(p) => Some(p),
            Var::Aux(_) => None,
        }) {
            let mut value = LinExpr::constant(to_i64(set.base.get(p))?);
            for (i, period) in periods.iter().enumerate() {
                value = value.plus(&LinExpr::term(aux(i)?, to_i64(period.get(p))?))?;
            }
            current = current.substitute(Var::Place(p), &value)?;
        }
        atoms.push(current);
    }
    for i in 0..periods.len() {
        atoms.push(Atom::ge(LinExpr::var(aux(i)?)));
    }
    match Conjunct::new(atoms)? {
        None => Ok(false),
        Some(c) => is_satisfiable(&c, budget),
    }
}

/// Search members of `set` (with all `zero` places empty) by increasing
/// period multiplicity for one satisfying `conj`, testing at most
/// `max_candidates` points.
pub fn find_member(
    set: &LinearSet,
    conj: &Conjunct,
    zero: &BTreeSet<PlaceId>,
    max_candidates: usize,
) -> Result<Option<SparseVector>> {
    if set.base.support().any(|p| zero.contains(&p)) {
        return Ok(None);
    }
    let periods = periods_avoiding(set, zero);
    let mut tested = 0usize;
    let mut total = 0u64;
    loop {
        let mut found = None;
        let mut counts = vec![0u64; periods.len()];
        let exhausted = compositions(&mut counts, 0, total, &mut |lambda| {
            tested += 1;
            let mut v = set.base.clone();
            for (k, p) in lambda.iter().zip(&periods) {
                if *k > 0 {
                    v = v.plus(&p.scaled(*k));
                }
            }
            match conj.holds(&v) {
                Ok(true) => {
                    found = Some(Ok(v));
                    true
                }
                Ok(false) => tested >= max_candidates,
                Err(e) => {
                    found = Some(Err(e));
                    true
                }
            }
        });
        if let Some(result) = found {
            return result.map(Some);
        }
        if exhausted || periods.is_empty() {
            return Ok(None);
        }
        total += 1;
    }
}

/// Call `visit` on every way to distribute `total` over `counts[idx..]`;
/// returns `true` as soon as `visit` does.
fn compositions(
    counts: &mut [u64],
    idx: usize,
    total: u64,
    visit: &mut dyn FnMut(&[u64]) -> bool,
) -> bool {
    if counts.is_empty() {
        return total == 0 && visit(counts);
    }
    if idx + 1 == counts.len() {
        counts[idx] = total;
        let stop = visit(counts);
        counts[idx] = 0;
        return stop;
    }
    for k in (0..=total).rev() {
        counts[idx] = k;
        if compositions(counts, idx + 1, total - k, visit) {
            counts[idx] = 0;
            return true;
        }
    }
    counts[idx] = 0;
    false
}

/// Exact inclusion `inner ⊆ outer`, trying the syntactic cover first.
pub fn semilinear_includes(
    outer: &SemilinearSet,
    inner: &LinearSet,
    budget: PresburgerBudget,
) -> Result<bool> {
    if outer.covers(inner) {
        return Ok(true);
    }
    let mut dims: BTreeSet<PlaceId> = inner.support().collect();
    for c in &outer.components {
        dims.extend(c.support());
    }
    let outside = complement(outer, &dims, budget)?;
    for conj in &outside.conjuncts {
        if linear_set_meets(inner, conj, &BTreeSet::new(), budget)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(i: u32) -> LinExpr {
        LinExpr::place(PlaceId(i))
    }

    fn v(pairs: &[(u32, u64)]) -> SparseVector {
        pairs.iter().map(|(p, n)| (PlaceId(*p), *n)).collect()
    }

    fn conj(atoms: Vec<Atom>) -> Conjunct {
        Conjunct::new(atoms).unwrap().unwrap()
    }

    fn budget() -> PresburgerBudget {
        PresburgerBudget::default()
    }

    #[test]
    fn normalisation_divides_by_gcd() {
        let a = Atom::ge(x(0).scaled(2).unwrap().offset(-3).unwrap());
        // 2x - 3 >= 0  <=>  x - 2 >= 0
        assert_eq!(
            a.normalized().unwrap(),
            Simplified::Atom(Atom::ge(x(0).offset(-2).unwrap()))
        );
        let e = Atom::eq(x(0).scaled(2).unwrap().offset(-3).unwrap());
        assert_eq!(e.normalized().unwrap(), Simplified::False);
        let d = Atom::divides(4, x(0).scaled(2).unwrap().offset(1).unwrap());
        assert_eq!(d.normalized().unwrap(), Simplified::False);
        let d = Atom::divides(3, x(0).scaled(3).unwrap());
        assert_eq!(d.normalized().unwrap(), Simplified::True);
    }

    #[test]
    fn equation_sign_is_canonical() {
        let a = Atom::eq(x(0).scaled(-1).unwrap().plus(&x(1)).unwrap());
        let b = Atom::eq(x(0).minus(&x(1)).unwrap());
        assert_eq!(a.normalized().unwrap(), b.normalized().unwrap());
    }

    #[test]
    fn conflicting_bounds_are_unsatisfiable() {
        let c = conj(vec![
            Atom::ge(x(0).offset(-3).unwrap()),
            Atom::ge(x(0).scaled(-1).unwrap().offset(2).unwrap()),
        ]);
        assert!(!is_satisfiable(&c, budget()).unwrap());
    }

    #[test]
    fn parity_needs_divisibility() {
        // 2y = x, x = 3 has no integer solution
        let y = LinExpr::var(Var::Aux(0));
        let c = conj(vec![
            Atom::eq(y.scaled(2).unwrap().minus(&x(0)).unwrap()),
            Atom::eq(x(0).offset(-3).unwrap()),
        ]);
        assert!(!is_satisfiable(&c, budget()).unwrap());

        let c = conj(vec![
            Atom::eq(y.scaled(2).unwrap().minus(&x(0)).unwrap()),
            Atom::ge(x(0).offset(-3).unwrap()),
            Atom::ge(x(0).scaled(-1).unwrap().offset(4).unwrap()),
        ]);
        assert!(is_satisfiable(&c, budget()).unwrap());
    }

    #[test]
    fn eliminating_multipliers_yields_membership() {
        // x0 in 1 + 2N
        let set = LinearSet::new(v(&[(0, 1)]), vec![v(&[(0, 2)])]);
        let dims: BTreeSet<PlaceId> = [PlaceId(0)].into();
        let formula = linear_set_formula(&set, &dims).unwrap();
        let dnf = eliminate_aux(&formula, budget()).unwrap();
        for n in 0..8u64 {
            assert_eq!(
                dnf.holds(&v(&[(0, n)])).unwrap(),
                n % 2 == 1,
                "x0 = {n}: {dnf:?}"
            );
        }
    }

    #[test]
    fn complement_of_multiples_of_one_letter() {
        // Ser = {k·p0}, dims {p0, p1}: outside iff p1 >= 1
        let ser = SemilinearSet::from_components(vec![
            LinearSet::singleton(SparseVector::new()),
            LinearSet::new(v(&[(0, 1)]), vec![v(&[(0, 1)])]),
        ]);
        let dims: BTreeSet<PlaceId> = [PlaceId(0), PlaceId(1)].into();
        let region = complement(&ser, &dims, budget()).unwrap();
        assert_eq!(region.conjuncts().len(), 1, "{region:?}");
        assert!(region.holds(&v(&[(0, 1), (1, 1)])).unwrap());
        assert!(region.holds(&v(&[(1, 2)])).unwrap());
        assert!(!region.holds(&v(&[(0, 5)])).unwrap());
        assert!(!region.holds(&SparseVector::new()).unwrap());
    }

    #[test]
    fn complement_of_everything_is_empty() {
        let all = SemilinearSet::from_components(vec![LinearSet::new(
            SparseVector::new(),
            vec![v(&[(0, 1)]), v(&[(1, 1)])],
        )]);
        let dims: BTreeSet<PlaceId> = [PlaceId(0), PlaceId(1)].into();
        assert!(complement(&all, &dims, budget()).unwrap().is_false());
    }

    #[test]
    fn complement_of_even_numbers_is_odd() {
        let evens = SemilinearSet::from_components(vec![LinearSet::new(
            SparseVector::new(),
            vec![v(&[(0, 2)])],
        )]);
        let dims: BTreeSet<PlaceId> = [PlaceId(0)].into();
        let odds = complement(&evens, &dims, budget()).unwrap();
        for n in 0..10u64 {
            assert_eq!(odds.holds(&v(&[(0, n)])).unwrap(), n % 2 == 1);
        }
    }

    #[test]
    fn meets_respects_zero_places() {
        let set = LinearSet::new(SparseVector::new(), vec![v(&[(0, 1), (2, 1)]), v(&[(1, 1)])]);
        let target = conj(vec![Atom::ge(x(0).offset(-1).unwrap())]);
        assert!(linear_set_meets(&set, &target, &BTreeSet::new(), budget()).unwrap());
        let zero: BTreeSet<PlaceId> = [PlaceId(2)].into();
        assert!(!linear_set_meets(&set, &target, &zero, budget()).unwrap());
        assert_eq!(
            find_member(&set, &target, &BTreeSet::new(), 100).unwrap(),
            Some(v(&[(0, 1), (2, 1)]))
        );
        assert_eq!(find_member(&set, &target, &zero, 100).unwrap(), None);
    }

    #[test]
    fn meets_needs_matching_residue() {
        // x0 in 2N never equals 5
        let set = LinearSet::new(SparseVector::new(), vec![v(&[(0, 2)])]);
        let target = conj(vec![Atom::eq(x(0).offset(-5).unwrap())]);
        assert!(!linear_set_meets(&set, &target, &BTreeSet::new(), budget()).unwrap());
        let target = conj(vec![Atom::eq(x(0).offset(-6).unwrap())]);
        assert!(linear_set_meets(&set, &target, &BTreeSet::new(), budget()).unwrap());
    }

    #[test]
    fn inclusion_needs_exact_check_for_split_covers() {
        // N = 2N ∪ (1 + 2N), which no single component covers
        let outer = SemilinearSet::from_components(vec![
            LinearSet::new(SparseVector::new(), vec![v(&[(0, 2)])]),
            LinearSet::new(v(&[(0, 1)]), vec![v(&[(0, 2)])]),
        ]);
        let inner = LinearSet::new(SparseVector::new(), vec![v(&[(0, 1)])]);
        assert!(!outer.covers(&inner));
        assert!(semilinear_includes(&outer, &inner, budget()).unwrap());
        let wider = LinearSet::new(SparseVector::new(), vec![v(&[(0, 1)]), v(&[(1, 1)])]);
        assert!(!semilinear_includes(&outer, &wider, budget()).unwrap());
    }

    #[test]
    fn budget_is_enforced() {
        let y = Var::Aux(0);
        let c = conj(vec![
            Atom::divides(97, LinExpr::var(y).plus(&x(0)).unwrap()),
            Atom::ge(LinExpr::var(y)),
            Atom::ge(LinExpr::var(y).scaled(-1).unwrap().plus(&x(1)).unwrap()),
        ]);
        let tiny = PresburgerBudget { max_conjuncts: 10 };
        assert_eq!(
            eliminate_aux(&c, tiny),
            Err(PresburgerError::BudgetExceeded { limit: 10 })
        );
    }

    #[test]
    fn rendering_uses_place_names() {
        let c = conj(vec![Atom::ge(x(0).offset(-1).unwrap())]);
        assert_eq!(c.to_string(), "p0 - 1 >= 0");
    }
}
