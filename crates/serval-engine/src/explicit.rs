//! In-process reachability oracle.
//!
//! Breadth-first search over concrete markings finds short witnesses and
//! decides nets with finitely many reachable markings. When the search
//! budget runs out, the semilinear builder is asked to prove the query
//! unreachable; if it cannot, the answer is a timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serval_ir::petri::{Marking, PetriNet, TransitionId};
use serval_ir::presburger::Conjunct;
use serval_ir::vector::SparseVector;
use serval_oracle::{capped_timeout, OracleError, OracleStats, OracleVerdict, ReachabilityOracle};

use crate::builder::{self, BuildOutcome, BuilderOptions};
use crate::pipeline::timeout::deadline_exceeded;

pub const DEFAULT_MAX_MARKINGS: usize = 50_000;
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplicitConfig {
    /// Distinct markings the search may store.
    pub max_markings: usize,
    /// Longest firing sequence explored, and so the longest trace returned.
    pub max_depth: usize,
    /// Wall-clock limit per query, search and builder together.
    pub timeout: Option<Duration>,
    pub builder: BuilderOptions,
}

impl Default for ExplicitConfig {
    fn default() -> Self {
        Self {
            max_markings: DEFAULT_MAX_MARKINGS,
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: None,
            builder: BuilderOptions::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExplicitOracle {
    config: ExplicitConfig,
    calls: AtomicU64,
    timeouts: AtomicU64,
}

enum Search {
    Found(Vec<TransitionId>),
    /// Every reachable marking was visited.
    Complete,
    Truncated,
    TimedOut,
}

impl ExplicitOracle {
    pub fn new(config: ExplicitConfig) -> Self {
        Self {
            config,
            calls: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ExplicitConfig {
        &self.config
    }

    fn search(
        &self,
        net: &PetriNet,
        query: &Conjunct,
        deadline: Option<Instant>,
    ) -> Result<Search, OracleError> {
        let holds = |m: &Marking| query.holds(&m.counters.plus(&SparseVector::unit(m.global)));

        let initial = net.initial_marking();
        if holds(&initial)? {
            return Ok(Search::Found(Vec::new()));
        }
        // Each entry: marking, depth, and the (parent, transition) it came from.
        let mut seen: HashMap<Marking, usize> = HashMap::from([(initial.clone(), 0)]);
        let mut entries: Vec<(usize, Option<(usize, TransitionId)>)> = vec![(0, None)];
        let mut queue = VecDeque::from([(initial, 0usize)]);
        let mut truncated = false;

        while let Some((marking, idx)) = queue.pop_front() {
            if deadline_exceeded(deadline) {
                return Ok(Search::TimedOut);
            }
            let depth = entries[idx].0;
            if depth >= self.config.max_depth {
                truncated = true;
                continue;
            }
            for t in net.enabled(&marking) {
                if t.is_identity() {
                    continue;
                }
                let Ok(next) = net.fire(&marking, t.id) else {
                    continue;
                };
                if seen.contains_key(&next) {
                    continue;
                }
                if seen.len() >= self.config.max_markings {
                    return Ok(Search::Truncated);
                }
                let next_idx = entries.len();
                entries.push((depth + 1, Some((idx, t.id))));
                seen.insert(next.clone(), next_idx);
                if holds(&next)? {
                    return Ok(Search::Found(path_to(&entries, next_idx)));
                }
                queue.push_back((next, next_idx));
            }
        }
        Ok(if truncated {
            Search::Truncated
        } else {
            Search::Complete
        })
    }
}

fn path_to(entries: &[(usize, Option<(usize, TransitionId)>)], mut idx: usize) -> Vec<TransitionId> {
    let mut path = Vec::new();
    while let Some((parent, t)) = entries[idx].1 {
        path.push(t);
        idx = parent;
    }
    path.reverse();
    path
}

impl ReachabilityOracle for ExplicitOracle {
    fn name(&self) -> &str {
        "explicit"
    }

    fn query(&self, net: &PetriNet, query: &Conjunct) -> Result<OracleVerdict, OracleError> {
        self.query_with_limit(net, query, None)
    }

    fn query_with_limit(
        &self,
        net: &PetriNet,
        query: &Conjunct,
        limit_secs: Option<u64>,
    ) -> Result<OracleVerdict, OracleError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let deadline =
            capped_timeout(self.config.timeout, limit_secs).and_then(|t| Instant::now().checked_add(t));
        match self.search(net, query, deadline)? {
            Search::Found(trace) => {
                tracing::debug!(steps = trace.len(), "explicit search found a witness");
                return Ok(OracleVerdict::Reachable { trace });
            }
            Search::Complete => return Ok(OracleVerdict::Unreachable),
            Search::Truncated => {}
            Search::TimedOut => {
                tracing::debug!("explicit search ran out of time");
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                return Ok(OracleVerdict::Timeout);
            }
        }

        // The builder reads queries over request places only.
        let mentions_global = query
            .places()
            .iter()
            .any(|p| net.place(*p).is_some_and(|p| p.is_global()));
        if !mentions_global {
            let build = builder::build(net, Some(query), &self.config.builder, deadline)?;
            match build.outcome {
                BuildOutcome::Invariant(_) => return Ok(OracleVerdict::Unreachable),
                BuildOutcome::Reachable { trace, .. } => {
                    return Ok(OracleVerdict::Reachable { trace })
                }
                BuildOutcome::Exhausted { reason } => {
                    tracing::debug!(%reason, "explicit oracle gave up");
                }
            }
        }
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        Ok(OracleVerdict::Timeout)
    }

    fn stats(&self) -> OracleStats {
        OracleStats {
            calls: self.calls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            ..OracleStats::default()
        }
    }
}
