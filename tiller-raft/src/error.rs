//! Raft error types.
//!
//! All errors are explicit and typed. No string errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Result type for Raft operations.
pub type RaftResult<T> = Result<T, RaftError>;

/// Errors surfaced by the Raft replica.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RaftError {
    /// The proposal was ignored: the replica is not the leader, or a
    /// configuration change is still pending. The proposer should fail
    /// fast and retry against the current leader.
    #[error("raft proposal dropped")]
    ProposalDropped,

    /// The configuration failed validation at construction.
    #[error("invalid raft configuration: {0}")]
    Config(#[from] ConfigError),

    /// The storage collaborator failed a read the replica depends on.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
