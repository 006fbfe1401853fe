//! Tiller Core - Strongly-typed identifiers for the Tiller consensus stack.
//!
//! This crate provides the identifier types shared by every Tiller crate.
//! It deliberately contains no I/O, no clock, and no randomness - those are
//! collaborators injected at the edges.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up `NodeId` with `LogIndex`
//! - **Explicit types**: Use u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod types;

pub use types::{LogIndex, NodeId, TermId};
