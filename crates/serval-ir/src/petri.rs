//! Petri-net encoding of a network system.
//!
//! Places are request-tagged so that concurrently running instances of the
//! same request type, and the responses they eventually produce, are
//! tracked separately:
//!
//! - `Global(g)` holds the single global-state token,
//! - `InFlight(req, l)` counts instances of `req` currently at local `l`,
//! - `Completed(req, resp)` counts instances of `req` that answered `resp`.
//!
//! Every transition moves at most one request token and at most one global
//! token, which [`Transition`] encodes structurally.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ns::NetworkSystem;
use crate::vector::SparseVector;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlaceId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TransitionId(pub u32);

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaceKind {
    Global { global: String },
    InFlight { request: String, local: String },
    Completed { request: String, response: String },
}

impl fmt::Display for PlaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceKind::Global { global } => write!(f, "G[{global}]"),
            PlaceKind::InFlight { request, local } => write!(f, "{request}@{local}"),
            PlaceKind::Completed { request, response } => write!(f, "{request}/{response}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub kind: PlaceKind,
}

impl Place {
    pub fn is_global(&self) -> bool {
        matches!(self.kind, PlaceKind::Global { .. })
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.kind, PlaceKind::InFlight { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.kind, PlaceKind::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    /// A new instance of `request` arrives.
    Spawn { request: String },
    /// One atomic step of an in-flight instance.
    Step {
        request: String,
        from_local: String,
        from_global: String,
        to_local: String,
        to_global: String,
    },
    /// An instance answers with `response`.
    Respond {
        request: String,
        local: String,
        response: String,
    },
}

impl TransitionKind {
    pub fn request(&self) -> &str {
        match self {
            TransitionKind::Spawn { request }
            | TransitionKind::Step { request, .. }
            | TransitionKind::Respond { request, .. } => request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub kind: TransitionKind,
    /// Global place that must hold the token (consumed).
    pub guard: Option<PlaceId>,
    /// Global place receiving the token.
    pub update: Option<PlaceId>,
    /// Request place losing one token.
    pub consume: Option<PlaceId>,
    /// Request place gaining one token.
    pub produce: Option<PlaceId>,
}

impl Transition {
    pub fn inputs(&self) -> impl Iterator<Item = PlaceId> + '_ {
        self.guard.into_iter().chain(self.consume)
    }

    pub fn outputs(&self) -> impl Iterator<Item = PlaceId> + '_ {
        self.update.into_iter().chain(self.produce)
    }

    /// Firing leaves every marking unchanged.
    pub fn is_identity(&self) -> bool {
        self.guard == self.update && self.consume == self.produce
    }

    /// Enabled at global `g` as far as the global token is concerned.
    pub fn enabled_at_global(&self, global: PlaceId) -> bool {
        self.guard.map_or(true, |g| g == global)
    }

    /// Global after firing from `global`.
    pub fn next_global(&self, global: PlaceId) -> PlaceId {
        self.update.unwrap_or(global)
    }

    /// Apply the request-token effect to a counter vector.
    pub fn apply_counters(&self, counters: &SparseVector) -> Option<SparseVector> {
        let mut out = counters.clone();
        if let Some(p) = self.consume {
            out.sub_at(p, 1)?;
        }
        if let Some(p) = self.produce {
            out.add_at(p, 1);
        }
        Some(out)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FiringError {
    #[error("transition {0} does not exist in this net")]
    UnknownTransition(TransitionId),
    #[error("transition {transition} needs global {needed} but the global token is at {actual}")]
    WrongGlobal {
        transition: TransitionId,
        needed: PlaceId,
        actual: PlaceId,
    },
    #[error("transition {transition} needs a token in {place}")]
    MissingToken {
        transition: TransitionId,
        place: PlaceId,
    },
}

/// A concrete marking: where the global token is plus request-token counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Marking {
    pub global: PlaceId,
    pub counters: SparseVector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetriNet {
    places: Vec<Place>,
    transitions: Vec<Transition>,
    initial_global: PlaceId,
    #[serde(skip)]
    index: HashMap<PlaceKind, PlaceId>,
}

impl PetriNet {
    /// Translate a network system into its Petri net.
    ///
    /// Place and transition ids are assigned deterministically from the
    /// declaration order of the input, so the same system always yields a
    /// byte-identical net.
    pub fn from_network_system(ns: &NetworkSystem) -> Self {
        let mut builder = NetBuilder::default();
        let initial_global = builder.place(PlaceKind::Global {
            global: ns.initial_global.clone(),
        });
        for g in ns.globals() {
            builder.place(PlaceKind::Global { global: g.into() });
        }
        let requests = ns.request_names();
        for req in &requests {
            for l in ns.locals() {
                builder.place(PlaceKind::InFlight {
                    request: (*req).into(),
                    local: l.into(),
                });
            }
            for resp in ns.response_names() {
                builder.place(PlaceKind::Completed {
                    request: (*req).into(),
                    response: resp.into(),
                });
            }
        }

        for entry in &ns.requests {
            let produce = builder.place(PlaceKind::InFlight {
                request: entry.name.clone(),
                local: entry.local.clone(),
            });
            builder.transition(
                TransitionKind::Spawn {
                    request: entry.name.clone(),
                },
                None,
                None,
                None,
                Some(produce),
            );
        }
        for req in &requests {
            for t in &ns.transitions {
                let guard = builder.place(PlaceKind::Global {
                    global: t.from_global.clone(),
                });
                let update = builder.place(PlaceKind::Global {
                    global: t.to_global.clone(),
                });
                let consume = builder.place(PlaceKind::InFlight {
                    request: (*req).into(),
                    local: t.from_local.clone(),
                });
                let produce = builder.place(PlaceKind::InFlight {
                    request: (*req).into(),
                    local: t.to_local.clone(),
                });
                builder.transition(
                    TransitionKind::Step {
                        request: (*req).into(),
                        from_local: t.from_local.clone(),
                        from_global: t.from_global.clone(),
                        to_local: t.to_local.clone(),
                        to_global: t.to_global.clone(),
                    },
                    Some(guard),
                    Some(update),
                    Some(consume),
                    Some(produce),
                );
            }
            for r in &ns.responses {
                let consume = builder.place(PlaceKind::InFlight {
                    request: (*req).into(),
                    local: r.local.clone(),
                });
                let produce = builder.place(PlaceKind::Completed {
                    request: (*req).into(),
                    response: r.name.clone(),
                });
                builder.transition(
                    TransitionKind::Respond {
                        request: (*req).into(),
                        local: r.local.clone(),
                        response: r.name.clone(),
                    },
                    None,
                    None,
                    Some(consume),
                    Some(produce),
                );
            }
        }

        PetriNet {
            places: builder.places,
            transitions: builder.transitions,
            initial_global,
            index: builder.index,
        }
    }

    /// Rebuild the lookup index after deserialization.
    pub fn reindexed(mut self) -> Self {
        self.index = self
            .places
            .iter()
            .map(|p| (p.kind.clone(), p.id))
            .collect();
        self
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    pub fn place(&self, id: PlaceId) -> Option<&Place> {
        self.places.get(id.0 as usize)
    }

    pub fn place_id(&self, kind: &PlaceKind) -> Option<PlaceId> {
        self.index.get(kind).copied()
    }

    pub fn place_name(&self, id: PlaceId) -> String {
        self.place(id)
            .map(|p| p.kind.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        // Ids are increasing; reduced nets keep a sorted subset.
        self.transitions
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.transitions[i])
    }

    pub fn transition_ids(&self) -> BTreeSet<TransitionId> {
        self.transitions.iter().map(|t| t.id).collect()
    }

    pub fn initial_global(&self) -> PlaceId {
        self.initial_global
    }

    pub fn initial_marking(&self) -> Marking {
        Marking {
            global: self.initial_global,
            counters: SparseVector::new(),
        }
    }

    pub fn global_places(&self) -> impl Iterator<Item = &Place> + '_ {
        self.places.iter().filter(|p| p.is_global())
    }

    pub fn in_flight_places(&self) -> impl Iterator<Item = &Place> + '_ {
        self.places.iter().filter(|p| p.is_in_flight())
    }

    pub fn completed_places(&self) -> impl Iterator<Item = &Place> + '_ {
        self.places.iter().filter(|p| p.is_completed())
    }

    /// Places touched by a remaining transition, plus the initial global.
    pub fn live_places(&self) -> BTreeSet<PlaceId> {
        let mut live: BTreeSet<PlaceId> = self
            .transitions
            .iter()
            .flat_map(|t| t.inputs().chain(t.outputs()).collect::<Vec<_>>())
            .collect();
        live.insert(self.initial_global);
        live
    }

    /// Places that can ever hold a token: the forward closure from the
    /// initial global, ignoring token counts. Every other place is zero in
    /// every reachable marking.
    pub fn coverable_places(&self) -> BTreeSet<PlaceId> {
        let mut marked = BTreeSet::from([self.initial_global]);
        loop {
            let before = marked.len();
            for t in &self.transitions {
                if t.inputs().all(|p| marked.contains(&p)) {
                    marked.extend(t.outputs());
                }
            }
            if marked.len() == before {
                return marked;
            }
        }
    }

    /// Same place table, only the transitions in `keep`.
    pub fn restricted_to(&self, keep: &BTreeSet<TransitionId>) -> PetriNet {
        PetriNet {
            places: self.places.clone(),
            transitions: self
                .transitions
                .iter()
                .filter(|t| keep.contains(&t.id))
                .cloned()
                .collect(),
            initial_global: self.initial_global,
            index: self.index.clone(),
        }
    }

    /// Fire one transition.
    pub fn fire(&self, marking: &Marking, id: TransitionId) -> Result<Marking, FiringError> {
        let t = self
            .transition(id)
            .ok_or(FiringError::UnknownTransition(id))?;
        if let Some(needed) = t.guard {
            if needed != marking.global {
                return Err(FiringError::WrongGlobal {
                    transition: id,
                    needed,
                    actual: marking.global,
                });
            }
        }
        let counters = t.apply_counters(&marking.counters).ok_or_else(|| {
            FiringError::MissingToken {
                transition: id,
                place: t.consume.unwrap_or(PlaceId(u32::MAX)),
            }
        })?;
        Ok(Marking {
            global: t.next_global(marking.global),
            counters,
        })
    }

    /// Fire a whole sequence from the initial marking.
    pub fn replay(&self, trace: &[TransitionId]) -> Result<Marking, (usize, FiringError)> {
        let mut marking = self.initial_marking();
        for (i, id) in trace.iter().enumerate() {
            marking = self.fire(&marking, *id).map_err(|e| (i, e))?;
        }
        Ok(marking)
    }

    /// Transitions enabled in `marking`.
    pub fn enabled<'a>(&'a self, marking: &'a Marking) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions.iter().filter(move |t| {
            t.enabled_at_global(marking.global)
                && t.consume.map_or(true, |p| marking.counters.get(p) >= 1)
        })
    }
}

#[derive(Default)]
struct NetBuilder {
    places: Vec<Place>,
    transitions: Vec<Transition>,
    index: HashMap<PlaceKind, PlaceId>,
}

impl NetBuilder {
    fn place(&mut self, kind: PlaceKind) -> PlaceId {
        if let Some(id) = self.index.get(&kind) {
            return *id;
        }
        let id = PlaceId(self.places.len() as u32);
        self.index.insert(kind.clone(), id);
        self.places.push(Place { id, kind });
        id
    }

    fn transition(
        &mut self,
        kind: TransitionKind,
        guard: Option<PlaceId>,
        update: Option<PlaceId>,
        consume: Option<PlaceId>,
        produce: Option<PlaceId>,
    ) {
        let id = TransitionId(self.transitions.len() as u32);
        self.transitions.push(Transition {
            id,
            kind,
            guard,
            update,
            consume,
            produce,
        });
    }
}
