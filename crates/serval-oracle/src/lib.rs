#![doc = include_str!("../README.md")]

//! Reachability questions over request-tagged Petri nets.
//!
//! A query asks whether some reachable marking satisfies a Presburger
//! conjunct. Backends answer with a witnessing firing sequence, a proof of
//! unreachability, or give up with a timeout.

pub mod cache;
pub mod oracle;
pub mod smpt;

pub use oracle::{capped_timeout, OracleError, OracleStats, OracleVerdict, ReachabilityOracle};
pub use smpt::{SmptConfig, SmptOracle};
