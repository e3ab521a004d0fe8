//! The oracle interface shared by every backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use serval_ir::petri::{PetriNet, TransitionId};
use serval_ir::presburger::{Conjunct, PresburgerError};

use crate::smpt::SmptError;

/// Answer to "can a marking satisfying the query be reached?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum OracleVerdict {
    /// Reachable; `trace` fires from the initial marking to a witness.
    /// Backends that cannot produce traces return an empty one.
    Reachable { trace: Vec<TransitionId> },
    Unreachable,
    /// The backend gave up before deciding.
    Timeout,
}

impl OracleVerdict {
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, OracleVerdict::Timeout)
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, OracleVerdict::Reachable { .. })
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error(transparent)]
    Smpt(#[from] SmptError),
    #[error("query cannot be encoded: {0}")]
    Presburger(#[from] PresburgerError),
    #[error("oracle `{oracle}` failed: {message}")]
    Backend { oracle: String, message: String },
}

/// Call counters reported in the stats output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleStats {
    pub calls: u64,
    pub timeouts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl OracleStats {
    pub fn merged(self, other: OracleStats) -> OracleStats {
        OracleStats {
            calls: self.calls + other.calls,
            timeouts: self.timeouts + other.timeouts,
            cache_hits: self.cache_hits + other.cache_hits,
            cache_misses: self.cache_misses + other.cache_misses,
        }
    }
}

/// A decision procedure for reachability of a Presburger-constrained
/// marking. Implementations are shared between worker threads.
pub trait ReachabilityOracle: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    fn query(&self, net: &PetriNet, query: &Conjunct) -> Result<OracleVerdict, OracleError>;

    /// [`query`](Self::query) with the backend's own timeout capped at
    /// `limit_secs`. Backends without a timeout ignore the cap.
    fn query_with_limit(
        &self,
        net: &PetriNet,
        query: &Conjunct,
        limit_secs: Option<u64>,
    ) -> Result<OracleVerdict, OracleError> {
        let _ = limit_secs;
        self.query(net, query)
    }

    fn stats(&self) -> OracleStats {
        OracleStats::default()
    }
}

/// The shorter of a backend timeout and an outside limit in seconds.
pub fn capped_timeout(own: Option<Duration>, limit_secs: Option<u64>) -> Option<Duration> {
    match (own, limit_secs.map(Duration::from_secs)) {
        (Some(own), Some(limit)) => Some(own.min(limit)),
        (own, limit) => own.or(limit),
    }
}

impl<T: ReachabilityOracle + ?Sized> ReachabilityOracle for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn query(&self, net: &PetriNet, query: &Conjunct) -> Result<OracleVerdict, OracleError> {
        (**self).query(net, query)
    }

    fn query_with_limit(
        &self,
        net: &PetriNet,
        query: &Conjunct,
        limit_secs: Option<u64>,
    ) -> Result<OracleVerdict, OracleError> {
        (**self).query_with_limit(net, query, limit_secs)
    }

    fn stats(&self) -> OracleStats {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_merge_adds_fieldwise() {
        let a = OracleStats {
            calls: 2,
            timeouts: 1,
            cache_hits: 0,
            cache_misses: 2,
        };
        let b = OracleStats {
            calls: 1,
            timeouts: 0,
            cache_hits: 1,
            cache_misses: 0,
        };
        assert_eq!(
            a.merged(b),
            OracleStats {
                calls: 3,
                timeouts: 1,
                cache_hits: 1,
                cache_misses: 2,
            }
        );
    }

    #[test]
    fn verdict_json_is_tagged() {
        let v = OracleVerdict::Reachable {
            trace: vec![TransitionId(3), TransitionId(0)],
        };
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"verdict":"reachable","trace":[3,0]}"#);
        assert!(!OracleVerdict::Timeout.is_conclusive());
        assert!(OracleVerdict::Unreachable.is_conclusive());
    }

    #[test]
    fn capped_timeout_takes_the_shorter_limit() {
        let secs = Duration::from_secs;
        assert_eq!(capped_timeout(None, None), None);
        assert_eq!(capped_timeout(Some(secs(300)), None), Some(secs(300)));
        assert_eq!(capped_timeout(None, Some(4)), Some(secs(4)));
        assert_eq!(capped_timeout(Some(secs(300)), Some(4)), Some(secs(4)));
        assert_eq!(capped_timeout(Some(secs(2)), Some(4)), Some(secs(2)));
    }
}
