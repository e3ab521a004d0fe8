#![doc = include_str!("../README.md")]

//! serval decision engine.
//!
//! This crate runs the serializability check: structural reduction of the
//! Petri net per disjunct, the semilinear reachability builder, witness
//! confirmation, the in-process explicit oracle, the per-disjunct state
//! machine and worker pool, and result reporting.

pub mod builder;
pub mod explicit;
pub mod pipeline;
pub mod reduction;
pub mod result;
pub mod witness;

pub use pipeline::{check, check_source, parse_system, Method, PipelineError, PipelineOptions, Strategy};
pub use result::{CheckOutcome, StatsReport, Validity, Verdict};
