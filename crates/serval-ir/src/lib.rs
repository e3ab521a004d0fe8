#![doc = include_str!("../README.md")]

//! Network systems and the symbolic machinery around them.
//!
//! This crate defines the network-system model and its JSON format, the
//! lowering from `.ser` programs, the Petri-net encoding, semilinear sets,
//! Kleene state elimination, the serial automaton, exact Presburger
//! arithmetic and the construction of disjuncts from the non-serializable
//! region.

#[cfg(test)]
mod fixtures;
pub mod kleene;
pub mod lowering;
pub mod ns;
pub mod petri;
pub mod presburger;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod region;
pub mod semilinear;
pub mod serial;
pub mod vector;
