//! Raft persistent storage abstraction.
//!
//! The replica never writes durable state itself. It reads the initial
//! hard state, the cluster configuration, and historic entries out of a
//! [`Storage`] collaborator at construction, and the driver persists new
//! hard state and unstable entries after each `tick`/`step`. The key
//! persistent state in Raft:
//!
//! - **term**: the latest term the replica has seen
//! - **vote**: the candidate that received our vote in the current term
//! - **commit**: the highest committed log index
//! - **log\[\]**: the entries themselves
//!
//! # Design
//!
//! Keeping storage behind a trait keeps the core a pure state machine:
//! `RaftNode` remains deterministic given its inputs, and tests drive it
//! against [`MemoryStorage`].

use thiserror::Error;
use tiller_core::{LogIndex, NodeId, TermId};

use crate::log::LogEntry;

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the storage collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O error during a storage operation.
    #[error("storage I/O error during {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error description.
        message: String,
    },

    /// Data corruption detected.
    #[error("storage corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The requested entry is not present in storage.
    #[error("entry unavailable at {index}")]
    Unavailable {
        /// The index that was requested.
        index: LogIndex,
    },
}

/// Durable per-replica state that must survive restarts.
///
/// The driver persists this before dispatching any outbound message that
/// depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardState {
    /// Latest term the replica has seen.
    pub term: TermId,
    /// Peer voted for in the current term, if any.
    pub vote: Option<NodeId>,
    /// Highest committed log index.
    pub commit: LogIndex,
}

impl HardState {
    /// Creates a hard state with the given values.
    #[must_use]
    pub const fn new(term: TermId, vote: Option<NodeId>, commit: LogIndex) -> Self {
        Self { term, vote, commit }
    }
}

/// Durable cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfState {
    /// IDs of all replicas in the cluster, including the local one.
    pub nodes: Vec<NodeId>,
}

impl ConfState {
    /// Creates a configuration state over the given node set.
    #[must_use]
    pub const fn new(nodes: Vec<NodeId>) -> Self {
        Self { nodes }
    }
}

/// Trait for the replica's read-only view of durable storage.
///
/// Implementations own durability and snapshotting; the replica only reads.
pub trait Storage {
    /// Returns the persisted hard state and cluster configuration.
    ///
    /// # Errors
    /// Returns an error if the state cannot be loaded.
    fn initial_state(&self) -> StorageResult<(HardState, ConfState)>;

    /// Returns the term of the entry at `index`.
    ///
    /// Index zero is the empty-log sentinel and always has term zero.
    ///
    /// # Errors
    /// Returns `Unavailable` if the entry is not in storage.
    fn term(&self, index: LogIndex) -> StorageResult<TermId>;

    /// Returns the first log index in storage, or 0 if empty.
    fn first_index(&self) -> LogIndex;

    /// Returns the last log index in storage, or 0 if empty.
    fn last_index(&self) -> LogIndex;

    /// Returns the entries in `[low, high]`, clamped to what storage holds.
    ///
    /// # Errors
    /// Returns an error if the entries cannot be read.
    fn entries(&self, low: LogIndex, high: LogIndex) -> StorageResult<Vec<LogEntry>>;
}

/// In-memory storage implementation.
///
/// Provides NO durability. Used by unit tests and simulation harnesses
/// where persistence is not the property under test.
///
/// Entries are contiguous, so the index range is read straight off the
/// ends of the entry list; no separate bookkeeping.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// Persisted hard state.
    hard_state: HardState,
    /// Persisted cluster configuration.
    conf_state: ConfState,
    /// Log entries.
    entries: Vec<LogEntry>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory storage whose configuration names `nodes`.
    #[must_use]
    pub fn with_nodes(nodes: Vec<NodeId>) -> Self {
        Self {
            conf_state: ConfState::new(nodes),
            ..Self::default()
        }
    }

    /// Overwrites the persisted hard state.
    pub fn set_hard_state(&mut self, hard_state: HardState) {
        self.hard_state = hard_state;
    }

    /// Overwrites the persisted cluster configuration.
    pub fn set_conf_state(&mut self, conf_state: ConfState) {
        self.conf_state = conf_state;
    }

    /// Appends entries to the stored log.
    ///
    /// # Errors
    /// Returns `Corruption` if the entries would leave a gap.
    pub fn append(&mut self, entries: &[LogEntry]) -> StorageResult<()> {
        for entry in entries {
            if let Some(tail) = self.entries.last() {
                if entry.index != tail.index.next() {
                    return Err(StorageError::Corruption {
                        message: format!(
                            "appending {} after {} leaves a gap",
                            entry.index, tail.index
                        ),
                    });
                }
            }
            self.entries.push(entry.clone());
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn initial_state(&self) -> StorageResult<(HardState, ConfState)> {
        Ok((self.hard_state, self.conf_state.clone()))
    }

    fn term(&self, index: LogIndex) -> StorageResult<TermId> {
        if index.get() == 0 {
            return Ok(TermId::new(0));
        }
        self.entries
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| entry.term)
            .ok_or(StorageError::Unavailable { index })
    }

    fn first_index(&self) -> LogIndex {
        self.entries
            .first()
            .map_or(LogIndex::new(0), |entry| entry.index)
    }

    fn last_index(&self) -> LogIndex {
        self.entries
            .last()
            .map_or(LogIndex::new(0), |entry| entry.index)
    }

    fn entries(&self, low: LogIndex, high: LogIndex) -> StorageResult<Vec<LogEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.index >= low && entry.index <= high)
            .cloned()
            .collect())
    }
}
