//! Replica configuration.

use thiserror::Error;
use tiller_core::{LogIndex, NodeId};

use crate::limits::{ELECTION_TICK_DEFAULT, HEARTBEAT_TICK_DEFAULT};

/// Errors from configuration validation.
///
/// One distinct variant per violated rule, surfaced at construction.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The local id is the reserved zero value.
    #[error("cannot use zero as id")]
    InvalidId,

    /// The heartbeat tick count is zero.
    #[error("heartbeat tick must be greater than 0")]
    InvalidHeartbeatTick,

    /// The election tick count does not exceed the heartbeat tick count.
    #[error("election tick must be greater than heartbeat tick")]
    InvalidElectionTick,
}

/// Configuration for a Raft replica.
///
/// The storage collaborator is passed to `RaftNode::new` alongside this,
/// so "storage must be present" is enforced by the type system rather
/// than a validation rule.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// The identity of the local replica. Cannot be zero.
    pub id: NodeId,

    /// IDs of all replicas (including self) when bootstrapping a new
    /// cluster. Left empty on restart; the peer set then comes from the
    /// storage's configuration state.
    pub peers: Vec<NodeId>,

    /// Number of `tick` calls between elections. A follower that hears
    /// nothing from a leader for a randomized timeout in
    /// `[election_tick, 2 * election_tick)` starts an election. Must be
    /// greater than `heartbeat_tick`.
    pub election_tick: u32,

    /// Number of `tick` calls between leader heartbeats.
    pub heartbeat_tick: u32,

    /// The last applied index. Set only when restarting, so the replica
    /// does not re-surface entries the application already consumed.
    pub applied: LogIndex,

    /// Seed for the election-timeout jitter. Defaults to the local id so
    /// replicas de-synchronize; tests pin it for full determinism.
    pub random_seed: u64,
}

impl RaftConfig {
    /// Creates a configuration with default tick counts.
    #[must_use]
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            peers: Vec::new(),
            election_tick: ELECTION_TICK_DEFAULT,
            heartbeat_tick: HEARTBEAT_TICK_DEFAULT,
            applied: LogIndex::new(0),
            random_seed: id.get(),
        }
    }

    /// Sets the bootstrap peer list.
    #[must_use]
    pub fn with_peers(mut self, peers: Vec<NodeId>) -> Self {
        self.peers = peers;
        self
    }

    /// Sets custom tick counts.
    #[must_use]
    pub const fn with_tick_config(mut self, election_tick: u32, heartbeat_tick: u32) -> Self {
        self.election_tick = election_tick;
        self.heartbeat_tick = heartbeat_tick;
        self
    }

    /// Sets the restart applied watermark.
    #[must_use]
    pub const fn with_applied(mut self, applied: LogIndex) -> Self {
        self.applied = applied;
        self
    }

    /// Sets the jitter seed.
    #[must_use]
    pub const fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.get() == 0 {
            return Err(ConfigError::InvalidId);
        }
        if self.heartbeat_tick == 0 {
            return Err(ConfigError::InvalidHeartbeatTick);
        }
        if self.election_tick <= self.heartbeat_tick {
            return Err(ConfigError::InvalidElectionTick);
        }
        Ok(())
    }
}
