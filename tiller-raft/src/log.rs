//! Log entries and the in-memory tail view over storage.
//!
//! [`RaftLog`] holds every entry the replica knows about: the historic
//! entries loaded from [`Storage`] at construction plus the unstable tail
//! appended since. Three watermarks order the driver's work:
//!
//! ```text
//!   applied <= committed <= last_index
//!   stabled           <= last_index
//! ```
//!
//! `stabled` is the highest index the storage collaborator has durably
//! persisted; everything above it is returned by
//! [`RaftLog::unstable_entries`] for the driver to write down. Entries in
//! `(applied, committed]` are returned by
//! [`RaftLog::next_committed_entries`] for the application to consume.

use bytes::Bytes;
use tiller_core::{LogIndex, TermId};

use crate::storage::{Storage, StorageResult};

/// A single entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The term when this entry was created.
    pub term: TermId,
    /// The log index of this entry. 1-origin, contiguous.
    pub index: LogIndex,
    /// The command payload.
    pub data: Bytes,
}

impl LogEntry {
    /// Creates a new log entry.
    #[must_use]
    pub const fn new(term: TermId, index: LogIndex, data: Bytes) -> Self {
        Self { term, index, data }
    }

    /// Creates the empty entry a new leader appends for its term.
    #[must_use]
    pub const fn noop(term: TermId, index: LogIndex) -> Self {
        Self::new(term, index, Bytes::new())
    }
}

/// In-memory log view over a storage collaborator.
#[derive(Debug)]
pub struct RaftLog<S: Storage> {
    /// The storage the historic entries came from.
    storage: S,
    /// All entries the replica holds, oldest first.
    entries: Vec<LogEntry>,
    /// Highest index known to be committed by a quorum.
    committed: LogIndex,
    /// Highest index handed to the application.
    applied: LogIndex,
    /// Highest index known to be durably persisted.
    stabled: LogIndex,
}

impl<S: Storage> RaftLog<S> {
    /// Builds the log view from storage: loads the historic entries and
    /// the committed watermark, and marks everything in storage stable.
    ///
    /// # Errors
    /// Propagates storage failures from `initial_state` or the entry scan.
    pub fn new(storage: S) -> StorageResult<Self> {
        let (hard_state, _conf_state) = storage.initial_state()?;
        let first = storage.first_index();
        let last = storage.last_index();

        let entries = if first.get() > 0 && last >= first {
            storage.entries(first, last)?
        } else {
            Vec::new()
        };

        Ok(Self {
            storage,
            entries,
            committed: hard_state.commit,
            applied: LogIndex::new(first.get().saturating_sub(1)),
            stabled: last,
        })
    }

    /// Returns the storage collaborator.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the commit watermark.
    #[must_use]
    pub const fn committed(&self) -> LogIndex {
        self.committed
    }

    /// Returns the applied watermark.
    #[must_use]
    pub const fn applied(&self) -> LogIndex {
        self.applied
    }

    /// Returns the stable watermark.
    #[must_use]
    pub const fn stabled(&self) -> LogIndex {
        self.stabled
    }

    /// Returns every entry the replica holds.
    #[must_use]
    pub fn all_entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns the first log index, or 0 if the log is empty.
    #[must_use]
    pub fn first_index(&self) -> LogIndex {
        self.entries
            .first()
            .map_or_else(|| self.storage.first_index(), |e| e.index)
    }

    /// Returns the last log index, or 0 if the log is empty.
    #[must_use]
    pub fn last_index(&self) -> LogIndex {
        self.entries
            .last()
            .map_or_else(|| self.storage.last_index(), |e| e.index)
    }

    /// Returns the term of the last entry, or 0 if the log is empty.
    #[must_use]
    pub fn last_term(&self) -> TermId {
        self.entries.last().map_or(TermId::new(0), |e| e.term)
    }

    /// Returns the term of the entry at `index`.
    ///
    /// Index zero is the empty-log sentinel with term zero. Indices inside
    /// the in-memory tail are answered from it; anything older falls
    /// through to storage.
    ///
    /// # Errors
    /// Propagates `Unavailable` from storage for indices it does not hold.
    pub fn term(&self, index: LogIndex) -> StorageResult<TermId> {
        if index.get() == 0 {
            return Ok(TermId::new(0));
        }
        if let Some(first) = self.entries.first() {
            if index >= first.index && index <= self.last_index() {
                return Ok(self.entries[self.to_slice_index(index)].term);
            }
        }
        self.storage.term(index)
    }

    /// Maps a logical log index to an offset into the in-memory tail.
    ///
    /// # Panics
    /// Panics if the log is empty or `index` precedes the first held entry.
    #[must_use]
    pub fn to_slice_index(&self, index: LogIndex) -> usize {
        let first = self.entries[0].index;
        assert!(
            index >= first,
            "index {index} precedes first held entry {first}"
        );
        // Safe cast: the offset is bounded by entries.len() which fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let offset = (index.get() - first.get()) as usize;
        offset
    }

    /// Returns clones of the entries from `start` to the end of the log.
    #[must_use]
    pub fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        if self.entries.is_empty() || start > self.last_index() {
            return Vec::new();
        }
        let start = start.max(self.entries[0].index);
        self.entries[self.to_slice_index(start)..].to_vec()
    }

    /// Returns the entries above the stable watermark, for the driver to
    /// persist.
    #[must_use]
    pub fn unstable_entries(&self) -> &[LogEntry] {
        if self.entries.is_empty() || self.stabled >= self.last_index() {
            return &[];
        }
        let start = self.stabled.next().max(self.entries[0].index);
        &self.entries[self.to_slice_index(start)..]
    }

    /// Returns the committed-but-unapplied entries, for the application to
    /// consume.
    #[must_use]
    pub fn next_committed_entries(&self) -> &[LogEntry] {
        if self.entries.is_empty() || self.committed <= self.applied {
            return &[];
        }
        let low = self.to_slice_index(self.applied.next());
        let high = self.to_slice_index(self.committed) + 1;
        &self.entries[low..high]
    }

    /// Records that the driver has persisted entries up to `index`.
    ///
    /// # Panics
    /// Panics (debug builds) if `index` exceeds the last log index.
    pub fn stable_to(&mut self, index: LogIndex) {
        debug_assert!(index <= self.last_index());
        self.stabled = index;
    }

    /// Records that the application has consumed entries up to `index`.
    ///
    /// # Panics
    /// Panics (debug builds) if `index` exceeds the commit watermark.
    pub fn applied_to(&mut self, index: LogIndex) {
        if index.get() == 0 {
            return;
        }
        debug_assert!(index <= self.committed && index >= self.applied);
        self.applied = index;
    }

    /// Appends an entry to the tail.
    ///
    /// # Panics
    /// Panics if the entry index is not sequential.
    pub(crate) fn append(&mut self, entry: LogEntry) {
        let expected = self.last_index().next();
        assert_eq!(
            entry.index, expected,
            "log entry index must be sequential: expected {expected}, got {}",
            entry.index
        );
        self.entries.push(entry);
    }

    /// Discards `index` and everything after it from the tail.
    pub(crate) fn truncate_from(&mut self, index: LogIndex) {
        if self.entries.is_empty() || index > self.last_index() {
            return;
        }
        let offset = self.to_slice_index(index);
        self.entries.truncate(offset);
    }

    /// Advances the commit watermark to `index`, never backwards.
    ///
    /// # Panics
    /// Panics (debug builds) if `index` exceeds the last log index.
    pub(crate) fn commit_to(&mut self, index: LogIndex) {
        debug_assert!(index <= self.last_index());
        self.committed = self.committed.max(index);
    }

    /// Lowers the stable watermark after a tail truncation. The watermark
    /// cannot exceed the common prefix with the leader.
    pub(crate) fn clamp_stabled(&mut self, upper: LogIndex) {
        self.stabled = self.stabled.min(upper);
    }

    /// Restores the applied watermark on restart.
    pub(crate) fn restore_applied(&mut self, index: LogIndex) {
        self.applied = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tiller_core::NodeId;

    fn make_entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(
            TermId::new(term),
            LogIndex::new(index),
            Bytes::from(format!("entry-{index}")),
        )
    }

    fn log_with(entries: &[LogEntry]) -> RaftLog<MemoryStorage> {
        let mut storage = MemoryStorage::new();
        storage.append(entries).unwrap();
        RaftLog::new(storage).unwrap()
    }

    #[test]
    fn test_empty_log() {
        let log = RaftLog::new(MemoryStorage::new()).unwrap();

        assert_eq!(log.first_index().get(), 0);
        assert_eq!(log.last_index().get(), 0);
        assert_eq!(log.last_term().get(), 0);
        assert_eq!(log.committed().get(), 0);
        assert_eq!(log.applied().get(), 0);
        assert_eq!(log.stabled().get(), 0);
        assert_eq!(log.term(LogIndex::new(0)).unwrap(), TermId::new(0));
    }

    #[test]
    fn test_loads_storage_tail() {
        let log = log_with(&[make_entry(1, 1), make_entry(1, 2), make_entry(2, 3)]);

        assert_eq!(log.first_index().get(), 1);
        assert_eq!(log.last_index().get(), 3);
        assert_eq!(log.last_term().get(), 2);
        // Everything already in storage is stable.
        assert_eq!(log.stabled().get(), 3);
        assert_eq!(log.term(LogIndex::new(2)).unwrap(), TermId::new(1));
    }

    #[test]
    fn test_committed_restored_from_hard_state() {
        let mut storage = MemoryStorage::new();
        storage.append(&[make_entry(1, 1), make_entry(1, 2)]).unwrap();
        storage.set_hard_state(crate::storage::HardState::new(
            TermId::new(1),
            Some(NodeId::new(2)),
            LogIndex::new(2),
        ));

        let log = RaftLog::new(storage).unwrap();
        assert_eq!(log.committed().get(), 2);
    }

    #[test]
    fn test_to_slice_index() {
        let log = log_with(&[make_entry(1, 1), make_entry(1, 2), make_entry(2, 3)]);

        assert_eq!(log.to_slice_index(LogIndex::new(1)), 0);
        assert_eq!(log.to_slice_index(LogIndex::new(3)), 2);
    }

    #[test]
    fn test_append_and_truncate() {
        let mut log = log_with(&[make_entry(1, 1), make_entry(1, 2)]);

        log.append(make_entry(2, 3));
        assert_eq!(log.last_index().get(), 3);

        log.truncate_from(LogIndex::new(2));
        assert_eq!(log.last_index().get(), 1);

        // Truncating past the end is a no-op.
        log.truncate_from(LogIndex::new(9));
        assert_eq!(log.last_index().get(), 1);
    }

    #[test]
    #[should_panic(expected = "sequential")]
    fn test_append_non_sequential_panics() {
        let mut log = log_with(&[make_entry(1, 1)]);
        log.append(make_entry(1, 5));
    }

    #[test]
    fn test_commit_never_moves_backwards() {
        let mut log = log_with(&[make_entry(1, 1), make_entry(1, 2), make_entry(1, 3)]);

        log.commit_to(LogIndex::new(2));
        assert_eq!(log.committed().get(), 2);

        log.commit_to(LogIndex::new(1));
        assert_eq!(log.committed().get(), 2);

        log.commit_to(LogIndex::new(3));
        assert_eq!(log.committed().get(), 3);
    }

    #[test]
    fn test_clamp_stabled_only_lowers() {
        let mut log = log_with(&[make_entry(1, 1), make_entry(1, 2), make_entry(1, 3)]);
        assert_eq!(log.stabled().get(), 3);

        log.clamp_stabled(LogIndex::new(1));
        assert_eq!(log.stabled().get(), 1);

        log.clamp_stabled(LogIndex::new(2));
        assert_eq!(log.stabled().get(), 1);
    }

    #[test]
    fn test_unstable_entries() {
        let mut log = log_with(&[make_entry(1, 1), make_entry(1, 2)]);
        assert!(log.unstable_entries().is_empty());

        log.append(make_entry(2, 3));
        log.append(make_entry(2, 4));

        let unstable = log.unstable_entries();
        assert_eq!(unstable.len(), 2);
        assert_eq!(unstable[0].index.get(), 3);

        log.stable_to(LogIndex::new(4));
        assert!(log.unstable_entries().is_empty());
    }

    #[test]
    fn test_next_committed_entries() {
        let mut log = log_with(&[make_entry(1, 1), make_entry(1, 2), make_entry(1, 3)]);
        assert!(log.next_committed_entries().is_empty());

        log.commit_to(LogIndex::new(2));
        let ready = log.next_committed_entries();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].index.get(), 1);
        assert_eq!(ready[1].index.get(), 2);

        log.applied_to(LogIndex::new(2));
        assert!(log.next_committed_entries().is_empty());
    }

    #[test]
    fn test_entries_from() {
        let log = log_with(&[make_entry(1, 1), make_entry(1, 2), make_entry(2, 3)]);

        let tail = log.entries_from(LogIndex::new(2));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].index.get(), 2);

        assert!(log.entries_from(LogIndex::new(4)).is_empty());
    }
}
