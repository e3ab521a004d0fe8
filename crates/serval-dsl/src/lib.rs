#![doc = include_str!("../README.md")]

//! Front end for the `.ser` request language.
//!
//! A `.ser` file describes a server as a set of request handlers written in
//! a tiny imperative language with `yield` points; `serval-ir` lowers the
//! parsed [`ast::Program`] into a network system.

pub mod ast;
pub mod errors;
pub mod parser;

pub use parser::parse;
