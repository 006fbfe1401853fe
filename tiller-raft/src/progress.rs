//! Per-peer replication progress, maintained by the leader.

use tiller_core::LogIndex;

/// A follower's replication progress in the view of the leader.
///
/// The leader ships entries starting at `next` and counts `matched`
/// toward quorum when advancing the commit watermark. The invariant
/// `matched < next` holds at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Highest log index known to be replicated on the peer.
    pub matched: LogIndex,
    /// Index of the next entry to send to the peer.
    pub next: LogIndex,
}

impl Progress {
    /// Creates progress for a peer whose log state is unknown: nothing
    /// matched yet, replication starts at `next`.
    #[must_use]
    pub const fn new(next: LogIndex) -> Self {
        Self {
            matched: LogIndex::new(0),
            next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_progress() {
        let pr = Progress::new(LogIndex::new(4));

        assert_eq!(pr.matched.get(), 0);
        assert_eq!(pr.next.get(), 4);
        assert!(pr.matched < pr.next);
    }
}
