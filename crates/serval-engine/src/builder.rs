//! Semilinear reachability builder.
//!
//! Explores symbolic nodes `(global, L)` where `L` is a linear set of
//! counter vectors. Every node holds reachable markings only: successors
//! are exact images (a transition whose consumed place is empty in the
//! base splits on the periods that supply it), and a period is only added
//! when a path returns to an ancestor's global with a base that only grew.
//! Once no new node escapes the existing ones, the per-global union is
//! closed under every transition and is therefore the reachable set itself.
//!
//! Queries range over request places. Nodes meeting the query stop the
//! search; a member is picked by bounded enumeration and a firing sequence
//! to it is rebuilt from the node chain, undoing accelerations by running
//! their cycles backwards.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use serval_ir::petri::{PetriNet, PlaceId, Transition, TransitionId};
use serval_ir::presburger::{self, Conjunct, PresburgerBudget, PresburgerError, Relation, Var};
use serval_ir::semilinear::{in_period_cone, LinearSet, SemilinearSet};
use serval_ir::vector::SparseVector;
use serval_proof_kernel::proof::post_image;
use serval_proof_kernel::GlobalInvariant;

use crate::pipeline::timeout::deadline_exceeded;

pub const DEFAULT_MAX_NODES: usize = 5_000;
pub const DEFAULT_MAX_PERIODS: usize = 12;
pub const DEFAULT_WITNESS_SEARCH_LIMIT: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderOptions {
    pub max_nodes: usize,
    /// Periods a single node may accumulate through acceleration.
    pub max_periods: usize,
    /// Exact (Presburger) subsumption is only tried while a global has at
    /// most this many nodes.
    pub exact_subsumption_limit: usize,
    pub witness_search_limit: usize,
    pub remove_redundant: bool,
    pub budget: PresburgerBudget,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            max_periods: DEFAULT_MAX_PERIODS,
            exact_subsumption_limit: 4,
            witness_search_limit: DEFAULT_WITNESS_SEARCH_LIMIT,
            remove_redundant: true,
            budget: PresburgerBudget::default(),
        }
    }
}

/// Reachable markings, per global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invariant {
    pub per_global: BTreeMap<PlaceId, SemilinearSet>,
}

impl Invariant {
    pub fn num_components(&self) -> usize {
        self.per_global.values().map(|s| s.components.len()).sum()
    }

    pub fn num_periods(&self) -> usize {
        self.per_global.values().map(|s| s.num_periods()).sum()
    }

    pub fn contains(&self, global: PlaceId, counters: &SparseVector) -> bool {
        self.per_global
            .get(&global)
            .is_some_and(|s| s.contains(counters))
    }

    pub fn to_global_invariants(&self) -> Vec<GlobalInvariant> {
        self.per_global
            .iter()
            .map(|(global, set)| GlobalInvariant {
                global: *global,
                set: set.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Invariant(Invariant),
    /// A marking satisfying the query and a firing sequence reaching it.
    Reachable {
        global: PlaceId,
        marking: SparseVector,
        trace: Vec<TransitionId>,
    },
    Exhausted {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub nodes: usize,
    pub accelerations: usize,
    pub subsumed: usize,
}

#[derive(Debug, Clone)]
pub struct Build {
    pub outcome: BuildOutcome,
    pub stats: BuildStats,
}

#[derive(Debug, Clone)]
struct Acceleration {
    cycle: Vec<TransitionId>,
    /// The node's set before the cycle's period was added.
    before: LinearSet,
}

#[derive(Debug, Clone)]
struct Node {
    global: PlaceId,
    set: LinearSet,
    parent: Option<usize>,
    via: Option<TransitionId>,
    accelerations: Vec<Acceleration>,
    /// Nearest ancestor (or self) whose periods are those of this node.
    segment_start: usize,
    /// Signed change of the base since `segment_start`.
    effect: BTreeMap<PlaceId, i64>,
}

struct Builder<'a> {
    net: &'a PetriNet,
    query: Option<&'a Conjunct>,
    /// Places the query pins to zero.
    idle: BTreeSet<PlaceId>,
    options: &'a BuilderOptions,
    deadline: Option<Instant>,
    nodes: Vec<Node>,
    by_global: BTreeMap<PlaceId, Vec<usize>>,
    stats: BuildStats,
}

/// Run the builder on `net`. With a query, stop at the first node that
/// meets it.
pub fn build(
    net: &PetriNet,
    query: Option<&Conjunct>,
    options: &BuilderOptions,
    deadline: Option<Instant>,
) -> Result<Build, PresburgerError> {
    let mut builder = Builder {
        net,
        query,
        idle: query.map(forced_zero).unwrap_or_default(),
        options,
        deadline,
        nodes: Vec::new(),
        by_global: BTreeMap::new(),
        stats: BuildStats::default(),
    };
    let outcome = builder.run()?;
    builder.stats.nodes = builder.nodes.len();
    tracing::debug!(
        nodes = builder.stats.nodes,
        accelerations = builder.stats.accelerations,
        subsumed = builder.stats.subsumed,
        "builder finished"
    );
    Ok(Build {
        outcome,
        stats: builder.stats,
    })
}

fn exhausted(reason: impl Into<String>) -> BuildOutcome {
    BuildOutcome::Exhausted {
        reason: reason.into(),
    }
}

impl Builder<'_> {
    fn run(&mut self) -> Result<BuildOutcome, PresburgerError> {
        let net = self.net;
        let root = Node {
            global: net.initial_global(),
            set: LinearSet::singleton(SparseVector::new()),
            parent: None,
            via: None,
            accelerations: Vec::new(),
            segment_start: 0,
            effect: BTreeMap::new(),
        };
        self.insert(root);
        if let Some(hit) = self.check_hit(0)? {
            return Ok(hit);
        }

        let mut queue = VecDeque::from([0usize]);
        while let Some(i) = queue.pop_front() {
            if deadline_exceeded(self.deadline) {
                return Ok(exhausted("deadline reached while building the invariant"));
            }
            let global = self.nodes[i].global;
            let set = self.nodes[i].set.clone();
            for t in net.transitions() {
                if t.is_identity() || !t.enabled_at_global(global) {
                    continue;
                }
                let next = t.next_global(global);
                for post in post_image(&set, t) {
                    if self.is_covered(next, &post)? {
                        self.stats.subsumed += 1;
                        continue;
                    }
                    if self.nodes.len() >= self.options.max_nodes {
                        return Ok(exhausted(format!(
                            "node budget of {} exhausted",
                            self.options.max_nodes
                        )));
                    }
                    let idx = self.push_child(i, t, next, post)?;
                    if let Some(hit) = self.check_hit(idx)? {
                        return Ok(hit);
                    }
                    queue.push_back(idx);
                }
            }
        }
        Ok(BuildOutcome::Invariant(self.invariant()))
    }

    fn insert(&mut self, node: Node) -> usize {
        let idx = self.nodes.len();
        self.by_global.entry(node.global).or_default().push(idx);
        self.nodes.push(node);
        idx
    }

    fn is_covered(&self, global: PlaceId, set: &LinearSet) -> Result<bool, PresburgerError> {
        let Some(at_global) = self.by_global.get(&global) else {
            return Ok(false);
        };
        if at_global
            .iter()
            .any(|&i| set.subsumed_by(&self.nodes[i].set))
        {
            return Ok(true);
        }
        if at_global.len() > self.options.exact_subsumption_limit {
            return Ok(false);
        }
        let union = SemilinearSet::from_components(
            at_global.iter().map(|&i| self.nodes[i].set.clone()).collect(),
        );
        match presburger::semilinear_includes(&union, set, self.options.budget) {
            Ok(included) => Ok(included),
            Err(PresburgerError::BudgetExceeded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn push_child(
        &mut self,
        parent: usize,
        t: &Transition,
        global: PlaceId,
        set: LinearSet,
    ) -> Result<usize, PresburgerError> {
        let (segment_start, mut effect) = {
            let p = &self.nodes[parent];
            (p.segment_start, p.effect.clone())
        };
        // Base difference rather than the transition's effect: a split
        // successor also absorbs the period that supplied its token.
        let parent_base = &self.nodes[parent].set.base;
        let places: BTreeSet<PlaceId> = set.base.support().chain(parent_base.support()).collect();
        for place in places {
            let delta = signed(set.base.get(place))?
                .checked_sub(signed(parent_base.get(place))?)
                .ok_or(PresburgerError::Overflow)?;
            let entry = effect.entry(place).or_insert(0);
            *entry = entry.checked_add(delta).ok_or(PresburgerError::Overflow)?;
        }
        effect.retain(|_, v| *v != 0);

        let mut node = Node {
            global,
            set,
            parent: Some(parent),
            via: Some(t.id),
            accelerations: Vec::new(),
            segment_start,
            effect,
        };

        // Compare with every ancestor in the current segment at the same
        // global: a non-negative effect is a cycle that can be repeated.
        let mut ancestor = Some(parent);
        while let Some(a) = ancestor {
            if self.nodes[a].global == global {
                if let Some(period) = nonnegative_difference(&node.effect, &self.nodes[a].effect) {
                    if node.set.periods.len() < self.options.max_periods
                        && !in_period_cone(&period, &node.set.periods)
                    {
                        let cycle = self.path_from(a, parent, t.id);
                        node.accelerations.push(Acceleration {
                            cycle,
                            before: node.set.clone(),
                        });
                        node.set.periods.push(period);
                        self.stats.accelerations += 1;
                    }
                }
            }
            if a == segment_start {
                break;
            }
            ancestor = self.nodes[a].parent;
        }

        let idx = self.nodes.len();
        if !node.accelerations.is_empty() {
            node.segment_start = idx;
            node.effect.clear();
        }
        Ok(self.insert(node))
    }

    /// Transitions leading from node `from` to a new child of `parent` via `last`.
    fn path_from(&self, from: usize, parent: usize, last: TransitionId) -> Vec<TransitionId> {
        let mut path = vec![last];
        let mut current = parent;
        while current != from {
            let node = &self.nodes[current];
            match (node.via, node.parent) {
                (Some(via), Some(up)) => {
                    path.push(via);
                    current = up;
                }
                _ => break,
            }
        }
        path.reverse();
        path
    }

    fn check_hit(&self, idx: usize) -> Result<Option<BuildOutcome>, PresburgerError> {
        let Some(query) = self.query else {
            return Ok(None);
        };
        let node = &self.nodes[idx];
        match presburger::linear_set_meets(&node.set, query, &self.idle, self.options.budget) {
            Ok(false) => return Ok(None),
            Ok(true) => {}
            Err(PresburgerError::BudgetExceeded { limit }) => {
                return Ok(Some(exhausted(format!(
                    "query intersection exceeded the budget of {limit} conjuncts"
                ))))
            }
            Err(e) => return Err(e),
        }
        let member = presburger::find_member(
            &node.set,
            query,
            &self.idle,
            self.options.witness_search_limit,
        )?;
        let Some(marking) = member else {
            return Ok(Some(exhausted(format!(
                "no witness among the first {} members",
                self.options.witness_search_limit
            ))));
        };
        let Some(trace) = self.trace_to(idx, &marking) else {
            return Ok(Some(exhausted("witness trace could not be rebuilt")));
        };
        match self.net.replay(&trace) {
            Ok(end) if end.global == node.global && end.counters == marking => {
                Ok(Some(BuildOutcome::Reachable {
                    global: node.global,
                    marking,
                    trace,
                }))
            }
            _ => Ok(Some(exhausted("rebuilt witness trace does not replay"))),
        }
    }

    /// A firing sequence from the initial marking to `target`, a member of
    /// node `idx`.
    fn trace_to(&self, idx: usize, target: &SparseVector) -> Option<Vec<TransitionId>> {
        let mut pieces: Vec<Vec<TransitionId>> = Vec::new();
        let mut current = idx;
        let mut w = target.clone();
        loop {
            let node = &self.nodes[current];
            for acc in node.accelerations.iter().rev() {
                let mut repeats = 0usize;
                while !acc.before.contains(&w) {
                    if repeats >= self.options.witness_search_limit {
                        return None;
                    }
                    for t in acc.cycle.iter().rev() {
                        self.undo(&mut w, *t)?;
                    }
                    repeats += 1;
                }
                pieces.push(acc.cycle.repeat(repeats));
            }
            let Some(parent) = node.parent else {
                break;
            };
            let via = node.via?;
            self.undo(&mut w, via)?;
            pieces.push(vec![via]);
            current = parent;
        }
        if !w.is_zero() {
            return None;
        }
        pieces.reverse();
        Some(pieces.concat())
    }

    /// The marking before `t` fired, given the one after.
    fn undo(&self, w: &mut SparseVector, t: TransitionId) -> Option<()> {
        let t = self.net.transition(t)?;
        if let Some(p) = t.produce {
            w.sub_at(p, 1)?;
        }
        if let Some(c) = t.consume {
            w.add_at(c, 1);
        }
        Some(())
    }

    fn invariant(&self) -> Invariant {
        let per_global = self
            .by_global
            .iter()
            .map(|(global, idxs)| {
                let set = SemilinearSet::from_components(
                    idxs.iter().map(|&i| self.nodes[i].set.clone()).collect(),
                );
                let set = if self.options.remove_redundant {
                    set.remove_redundant()
                } else {
                    set
                };
                (*global, set)
            })
            .collect();
        Invariant { per_global }
    }
}

/// Places constrained by an atom `p = 0`.
pub fn forced_zero(query: &Conjunct) -> BTreeSet<PlaceId> {
    query
        .atoms()
        .iter()
        .filter(|a| a.relation == Relation::Eq && a.expr.constant_term() == 0)
        .filter_map(|a| {
            let mut terms = a.expr.terms();
            match (terms.next(), terms.next()) {
                (Some((Var::Place(p), _)), None) => Some(p),
                _ => None,
            }
        })
        .collect()
}

fn signed(n: u64) -> Result<i64, PresburgerError> {
    i64::try_from(n).map_err(|_| PresburgerError::Overflow)
}

/// `a - b` when it is non-negative everywhere and non-zero.
fn nonnegative_difference(
    a: &BTreeMap<PlaceId, i64>,
    b: &BTreeMap<PlaceId, i64>,
) -> Option<SparseVector> {
    let places: BTreeSet<PlaceId> = a.keys().chain(b.keys()).copied().collect();
    let mut out = SparseVector::new();
    for p in places {
        let d = a.get(&p).copied().unwrap_or(0) - b.get(&p).copied().unwrap_or(0);
        if d < 0 {
            return None;
        }
        out.set(p, d as u64);
    }
    (!out.is_zero()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::reduce;
    use crate::test_support::{analysis_of, completed, minimal_system, trivial_system};
    use serval_ir::petri::PlaceKind;

    #[test]
    fn trivial_system_converges_to_everything() {
        let net = PetriNet::from_network_system(&trivial_system());
        let build = build(&net, None, &BuilderOptions::default(), None).unwrap();
        let BuildOutcome::Invariant(inv) = build.outcome else {
            panic!("expected an invariant, got {:?}", build.outcome);
        };
        assert!(build.stats.accelerations > 0);
        let g0 = net.initial_global();
        let pong = completed(&net, "ping", "pong");
        let value = completed(&net, "get", "value");
        let p = net
            .place_id(&PlaceKind::InFlight {
                request: "ping".into(),
                local: "P".into(),
            })
            .unwrap();
        let marking: SparseVector = [(pong, 2), (value, 1), (p, 1)].into_iter().collect();
        assert!(inv.contains(g0, &SparseVector::new()));
        assert!(inv.contains(g0, &marking));
        assert_eq!(inv.per_global.len(), 1);
    }

    #[test]
    fn empty_net_gives_the_initial_marking() {
        let net = PetriNet::from_network_system(&trivial_system());
        let empty = net.restricted_to(&BTreeSet::new());
        let build = build(&empty, None, &BuilderOptions::default(), None).unwrap();
        let BuildOutcome::Invariant(inv) = build.outcome else {
            panic!("expected an invariant");
        };
        assert_eq!(inv.num_components(), 1);
        assert_eq!(inv.num_periods(), 0);
        assert_eq!(build.stats.nodes, 1);
    }

    #[test]
    fn minimal_system_hits_its_disjunct_with_a_replayable_trace() {
        let ns = minimal_system();
        let (net, analysis) = analysis_of(&ns);
        let disjunct = &analysis.disjuncts[0];
        let query = disjunct.query(&net).unwrap().unwrap();
        let (reduced, _) = reduce(&net, &disjunct.targets, true);
        let build = build(&reduced, Some(&query), &BuilderOptions::default(), None).unwrap();
        let BuildOutcome::Reachable { marking, trace, .. } = build.outcome else {
            panic!("expected a hit, got {:?}", build.outcome);
        };
        let end = net.replay(&trace).unwrap();
        assert_eq!(end.counters, marking);
        assert!(disjunct.is_witnessed_by(&net, &marking).unwrap());
        assert!(marking.get(completed(&net, "R", "saw_G1")) >= 1);
    }

    #[test]
    fn node_budget_is_reported() {
        let net = PetriNet::from_network_system(&minimal_system());
        let options = BuilderOptions {
            max_nodes: 2,
            ..BuilderOptions::default()
        };
        let build = build(&net, None, &options, None).unwrap();
        assert!(matches!(build.outcome, BuildOutcome::Exhausted { .. }));
    }

    #[test]
    fn past_deadline_stops_the_search() {
        let net = PetriNet::from_network_system(&minimal_system());
        let past = Instant::now() - std::time::Duration::from_secs(1);
        let build = build(&net, None, &BuilderOptions::default(), Some(past)).unwrap();
        let BuildOutcome::Exhausted { reason } = build.outcome else {
            panic!("expected exhaustion");
        };
        assert!(reason.contains("deadline"));
    }

    #[test]
    fn disjunct_queries_pin_in_flight_places() {
        let (net, analysis) = analysis_of(&minimal_system());
        let query = analysis.disjuncts[0].query(&net).unwrap().unwrap();
        let in_flight: BTreeSet<PlaceId> = net.in_flight_places().map(|p| p.id).collect();
        assert!(in_flight.is_subset(&forced_zero(&query)));
    }

    #[test]
    fn nonnegative_difference_requires_growth() {
        let a = BTreeMap::from([(PlaceId(1), 2), (PlaceId(2), 1)]);
        let b = BTreeMap::from([(PlaceId(1), 1)]);
        let d = nonnegative_difference(&a, &b).unwrap();
        assert_eq!(d.get(PlaceId(1)), 1);
        assert_eq!(d.get(PlaceId(2)), 1);
        assert!(nonnegative_difference(&b, &a).is_none());
        assert!(nonnegative_difference(&a, &a).is_none());
    }
}
