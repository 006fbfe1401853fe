//! Tiller Raft - deterministic Raft consensus core.
//!
//! This crate implements the algorithmic heart of a replicated state
//! machine: the per-replica role state machine, leader election, log
//! replication, and the tick-driven timers, all as a pure state machine
//! with no I/O of its own.
//!
//! # Design Principles
//!
//! - **Reactive**: the replica only changes state inside `tick` and `step`
//! - **Deterministic**: all randomness comes from a seeded RNG
//! - **Driver-owned I/O**: the outbound buffer, hard state, and unstable
//!   entries are drained and persisted by the caller
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod log;
mod message;
mod progress;
mod state;
mod storage;

pub use config::{ConfigError, RaftConfig};
pub use error::{RaftError, RaftResult};
pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendRequest, AppendResponse, HeartbeatRequest, HeartbeatResponse, Message, ProposeRequest,
    SnapshotRequest, VoteRequest, VoteResponse,
};
pub use progress::Progress;
pub use state::{RaftNode, RaftState, SoftState};
pub use storage::{ConfState, HardState, MemoryStorage, Storage, StorageError, StorageResult};

/// Raft configuration limits and defaults.
pub mod limits {
    /// Default election tick (number of ticks before election timeout).
    ///
    /// The actual timeout is randomized in \[`election_tick`, 2 * `election_tick`).
    /// With a 100ms tick interval, this gives a 1-2 second election timeout.
    pub const ELECTION_TICK_DEFAULT: u32 = 10;

    /// Default heartbeat tick (number of ticks between heartbeats).
    /// With a 100ms tick interval, this gives a 100ms heartbeat.
    pub const HEARTBEAT_TICK_DEFAULT: u32 = 1;

    /// Minimum election tick (must be > heartbeat tick).
    pub const ELECTION_TICK_MIN: u32 = 2;

    /// Maximum election tick.
    pub const ELECTION_TICK_MAX: u32 = 100;

    /// Maximum number of replicas in a cluster.
    pub const CLUSTER_SIZE_MAX: usize = 7;
}
