#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serval_engine::explicit::ExplicitOracle;
use serval_engine::pipeline::{PipelineOptions, Strategy};
use serval_ir::ns::NetworkSystem;
use serval_ir::petri::PetriNet;
use serval_ir::presburger::Conjunct;
use serval_oracle::{OracleError, OracleStats, OracleVerdict, ReachabilityOracle};

pub fn load_model(name: &str) -> String {
    let path = format!("{}/../../models/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {path}: {e}"))
}

pub fn load_system(name: &str) -> NetworkSystem {
    serval_engine::parse_system(&load_model(name), name)
        .unwrap_or_else(|e| panic!("Failed to parse {name}: {e}"))
}

/// Options with budgets small enough for test runs.
pub fn quick_options(strategy: Strategy) -> PipelineOptions {
    PipelineOptions {
        strategy,
        max_trace_len: 16,
        max_markings: 2_000,
        max_nodes: 500,
        ..PipelineOptions::default()
    }
}

pub fn explicit_oracle(options: &PipelineOptions) -> ExplicitOracle {
    ExplicitOracle::new(options.explicit_config())
}

type Reply = Result<OracleVerdict, String>;

/// Oracle replaying a fixed script, one reply per call. Once the script
/// runs out the last reply repeats.
pub struct ScriptedOracle {
    replies: Mutex<Vec<Reply>>,
    last: Mutex<Option<Reply>>,
    calls: AtomicU64,
    timeouts: AtomicU64,
}

impl ScriptedOracle {
    pub fn new(mut replies: Vec<Reply>) -> Self {
        replies.reverse();
        ScriptedOracle {
            replies: Mutex::new(replies),
            last: Mutex::new(None),
            calls: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn always(verdict: OracleVerdict) -> Self {
        Self::new(vec![Ok(verdict)])
    }

    pub fn failing(message: &str) -> Self {
        Self::new(vec![Err(message.to_string())])
    }
}

impl ReachabilityOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn query(&self, _net: &PetriNet, _query: &Conjunct) -> Result<OracleVerdict, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = replies.pop() {
                *last = Some(next.clone());
                next
            } else {
                last.clone().unwrap_or(Ok(OracleVerdict::Timeout))
            }
        };
        if reply == Ok(OracleVerdict::Timeout) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
        reply.map_err(|message| OracleError::Backend {
            oracle: "scripted".into(),
            message,
        })
    }

    fn stats(&self) -> OracleStats {
        OracleStats {
            calls: self.calls.load(Ordering::SeqCst),
            timeouts: self.timeouts.load(Ordering::SeqCst),
            ..OracleStats::default()
        }
    }
}
