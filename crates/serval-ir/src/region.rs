//! The non-serializable region and its split into disjuncts.
//!
//! A terminal marking (no request in flight) is a counterexample exactly
//! when its completed counts lie outside the serially achievable set. That
//! complement is computed in DNF; each conjunct becomes one disjunct that
//! can be checked on its own.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::kleene::{self, KleeneOptions};
use crate::ns::NetworkSystem;
use crate::petri::{PetriNet, PlaceId};
use crate::presburger::{self, Atom, Conjunct, LinExpr, PresburgerBudget, PresburgerError};
use crate::semilinear::SemilinearSet;
use crate::serial::SerialAutomaton;
use crate::vector::SparseVector;

/// Knobs that influence how `Ser` and the region are computed. Recorded
/// in certificates so a checker can recompute the same disjuncts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOptions {
    pub smart_kleene_order: bool,
    pub generate_less: bool,
    pub remove_redundant: bool,
    pub max_conjuncts: usize,
    /// Largest intermediate semilinear set built while computing `Ser`.
    #[serde(default = "default_max_components")]
    pub max_components: usize,
}

fn default_max_components() -> usize {
    kleene::DEFAULT_MAX_SIZE
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            smart_kleene_order: true,
            generate_less: true,
            remove_redundant: true,
            max_conjuncts: presburger::DEFAULT_MAX_CONJUNCTS,
            max_components: default_max_components(),
        }
    }
}

impl SerialOptions {
    pub fn kleene(&self) -> KleeneOptions {
        KleeneOptions {
            smart_order: self.smart_kleene_order,
            generate_less: self.generate_less,
            remove_redundant: self.remove_redundant,
            max_size: self.max_components,
        }
    }

    pub fn budget(&self) -> PresburgerBudget {
        PresburgerBudget {
            max_conjuncts: self.max_conjuncts,
        }
    }
}

/// One independent sub-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disjunct {
    pub id: usize,
    /// Constraint on completed counts; `None` when the region is empty and
    /// this disjunct can never be witnessed.
    pub region: Option<Conjunct>,
    /// Places a witnessing run must be able to mark.
    pub targets: BTreeSet<PlaceId>,
}

impl Disjunct {
    pub fn is_vacuous(&self) -> bool {
        self.region.is_none()
    }

    /// The region constraint together with "nothing in flight", as a
    /// reachability query over the net.
    pub fn query(&self, net: &PetriNet) -> Result<Option<Conjunct>, PresburgerError> {
        let Some(region) = &self.region else {
            return Ok(None);
        };
        let idle = net.in_flight_places().map(|p| Atom::eq(LinExpr::place(p.id)));
        Conjunct::new(region.atoms().iter().cloned().chain(idle))
    }

    /// Whether a marking with these counters witnesses the disjunct.
    pub fn is_witnessed_by(
        &self,
        net: &PetriNet,
        counters: &SparseVector,
    ) -> Result<bool, PresburgerError> {
        let Some(region) = &self.region else {
            return Ok(false);
        };
        if net.in_flight_places().any(|p| counters.get(p.id) > 0) {
            return Ok(false);
        }
        region.holds(counters)
    }
}

/// `Ser` together with the disjuncts of its complement.
#[derive(Debug, Clone)]
pub struct SerialAnalysis {
    pub automaton: SerialAutomaton,
    pub serial_set: SemilinearSet,
    pub disjuncts: Vec<Disjunct>,
}

impl SerialAnalysis {
    pub fn compute(
        ns: &NetworkSystem,
        net: &PetriNet,
        options: &SerialOptions,
    ) -> Result<Self, PresburgerError> {
        let automaton = SerialAutomaton::new(ns, net);
        let mut serial_set = automaton.serial_set(options.kleene())?;
        if options.remove_redundant {
            serial_set = serial_set.remove_redundant();
        }
        tracing::debug!(
            components = serial_set.components.len(),
            periods = serial_set.num_periods(),
            "serial set computed"
        );
        let disjuncts = disjuncts(net, &serial_set, options.budget())?;
        Ok(SerialAnalysis {
            automaton,
            serial_set,
            disjuncts,
        })
    }
}

/// Split `N^Completed \ ser` into disjuncts. Completed places that can never
/// be marked are left out of the dimensions. An empty region yields a single
/// vacuous disjunct with no targets.
pub fn disjuncts(
    net: &PetriNet,
    ser: &SemilinearSet,
    budget: PresburgerBudget,
) -> Result<Vec<Disjunct>, PresburgerError> {
    let coverable = net.coverable_places();
    let completed: BTreeSet<PlaceId> = net
        .completed_places()
        .map(|p| p.id)
        .filter(|p| coverable.contains(p))
        .collect();
    let region = presburger::complement(ser, &completed, budget)?;
    if region.is_false() {
        return Ok(vec![Disjunct {
            id: 0,
            region: None,
            targets: BTreeSet::new(),
        }]);
    }

    let mut out = Vec::new();
    for (id, conj) in region.into_conjuncts().into_iter().enumerate() {
        let mut targets: BTreeSet<PlaceId> = net.global_places().map(|p| p.id).collect();
        for d in &completed {
            if can_be_positive(&conj, *d, budget)? {
                targets.insert(*d);
            }
        }
        out.push(Disjunct {
            id,
            region: Some(conj),
            targets,
        });
    }
    Ok(out)
}

fn can_be_positive(
    conj: &Conjunct,
    place: PlaceId,
    budget: PresburgerBudget,
) -> Result<bool, PresburgerError> {
    match conj.with(Atom::ge(LinExpr::place(place).offset(-1)?))? {
        None => Ok(false),
        Some(c) => presburger::is_satisfiable(&c, budget),
    }
}
