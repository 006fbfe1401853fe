//! Raft message types.
//!
//! Every interaction with the replica is a [`Message`] fed to `step`.
//! `Hup`, `Beat`, and `Propose` are local: the first two are injected by
//! the tick driver, the third by a client. The remaining kinds travel
//! between peers and always carry a term; the local kinds have none,
//! which is what makes a term-zero message from a peer unrepresentable.

use bytes::Bytes;
use tiller_core::{LogIndex, NodeId, TermId};

use crate::log::LogEntry;

/// A message the replica can receive or emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Internal: the election timer fired; start an election.
    Hup,
    /// Internal: the heartbeat timer fired; broadcast heartbeats.
    Beat,
    /// A client write submission.
    Propose(ProposeRequest),
    /// Vote solicitation from a candidate.
    RequestVote(VoteRequest),
    /// Reply to a vote solicitation.
    RequestVoteResponse(VoteResponse),
    /// Log replication (and its empty-entries heartbeat-repair form).
    Append(AppendRequest),
    /// Reply to an append.
    AppendResponse(AppendResponse),
    /// Leader liveness probe. Carries no entries and no commit.
    Heartbeat(HeartbeatRequest),
    /// Reply to a heartbeat.
    HeartbeatResponse(HeartbeatResponse),
    /// Snapshot installation. Accepted and ignored; snapshot transfer is
    /// owned by the storage layer.
    Snapshot(SnapshotRequest),
}

impl Message {
    /// Returns the sender, or `None` for locally-injected messages.
    #[must_use]
    pub const fn from(&self) -> Option<NodeId> {
        match self {
            Self::Hup | Self::Beat | Self::Propose(_) => None,
            Self::RequestVote(m) => Some(m.from),
            Self::RequestVoteResponse(m) => Some(m.from),
            Self::Append(m) => Some(m.from),
            Self::AppendResponse(m) => Some(m.from),
            Self::Heartbeat(m) => Some(m.from),
            Self::HeartbeatResponse(m) => Some(m.from),
            Self::Snapshot(m) => Some(m.from),
        }
    }

    /// Returns the destination, or `None` for locally-injected messages.
    #[must_use]
    pub const fn to(&self) -> Option<NodeId> {
        match self {
            Self::Hup | Self::Beat | Self::Propose(_) => None,
            Self::RequestVote(m) => Some(m.to),
            Self::RequestVoteResponse(m) => Some(m.to),
            Self::Append(m) => Some(m.to),
            Self::AppendResponse(m) => Some(m.to),
            Self::Heartbeat(m) => Some(m.to),
            Self::HeartbeatResponse(m) => Some(m.to),
            Self::Snapshot(m) => Some(m.to),
        }
    }

    /// Returns the term, or `None` for locally-injected messages.
    #[must_use]
    pub const fn term(&self) -> Option<TermId> {
        match self {
            Self::Hup | Self::Beat | Self::Propose(_) => None,
            Self::RequestVote(m) => Some(m.term),
            Self::RequestVoteResponse(m) => Some(m.term),
            Self::Append(m) => Some(m.term),
            Self::AppendResponse(m) => Some(m.term),
            Self::Heartbeat(m) => Some(m.term),
            Self::HeartbeatResponse(m) => Some(m.term),
            Self::Snapshot(m) => Some(m.term),
        }
    }
}

/// A client write: payloads to replicate. The leader assigns term and
/// index on acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeRequest {
    /// The command payloads, in submission order.
    pub entries: Vec<Bytes>,
}

impl ProposeRequest {
    /// Creates a proposal carrying the given payloads.
    #[must_use]
    pub const fn new(entries: Vec<Bytes>) -> Self {
        Self { entries }
    }

    /// Creates a proposal carrying a single payload.
    #[must_use]
    pub fn single(data: Bytes) -> Self {
        Self::new(vec![data])
    }
}

/// Vote solicitation sent by a candidate to every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    /// Candidate's term.
    pub term: TermId,
    /// The candidate requesting the vote.
    pub from: NodeId,
    /// Target peer.
    pub to: NodeId,
    /// Index of the candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_log_term: TermId,
}

impl VoteRequest {
    /// Creates a new vote request.
    #[must_use]
    pub const fn new(
        term: TermId,
        from: NodeId,
        to: NodeId,
        last_log_index: LogIndex,
        last_log_term: TermId,
    ) -> Self {
        Self {
            term,
            from,
            to,
            last_log_index,
            last_log_term,
        }
    }
}

/// Reply to a vote solicitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteResponse {
    /// The voter's current term.
    pub term: TermId,
    /// The voter.
    pub from: NodeId,
    /// The candidate that asked.
    pub to: NodeId,
    /// True if the vote was denied.
    pub reject: bool,
}

impl VoteResponse {
    /// Creates a new vote response.
    #[must_use]
    pub const fn new(term: TermId, from: NodeId, to: NodeId, reject: bool) -> Self {
        Self {
            term,
            from,
            to,
            reject,
        }
    }
}

/// Log replication request from the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Leader's term.
    pub term: TermId,
    /// The leader.
    pub from: NodeId,
    /// Target follower.
    pub to: NodeId,
    /// Index of the entry immediately preceding the shipped ones.
    pub prev_log_index: LogIndex,
    /// Term of the entry at `prev_log_index`.
    pub prev_log_term: TermId,
    /// Entries to store.
    pub entries: Vec<LogEntry>,
    /// Leader's commit watermark.
    pub commit: LogIndex,
}

impl AppendRequest {
    /// Creates a new append request.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        term: TermId,
        from: NodeId,
        to: NodeId,
        prev_log_index: LogIndex,
        prev_log_term: TermId,
        entries: Vec<LogEntry>,
        commit: LogIndex,
    ) -> Self {
        Self {
            term,
            from,
            to,
            prev_log_index,
            prev_log_term,
            entries,
            commit,
        }
    }
}

/// Reply to an append request.
///
/// On acceptance `index` is the responder's resulting last log index; on
/// rejection it is the conflict index the leader should retry from, or
/// zero when the request was rejected for a stale term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResponse {
    /// The responder's current term.
    pub term: TermId,
    /// The responder.
    pub from: NodeId,
    /// The leader that sent the append.
    pub to: NodeId,
    /// True if the append was refused.
    pub reject: bool,
    /// Last log index on acceptance; conflict index on rejection.
    pub index: LogIndex,
    /// The responder's commit watermark.
    pub commit: LogIndex,
}

impl AppendResponse {
    /// Creates a new append response.
    #[must_use]
    pub const fn new(
        term: TermId,
        from: NodeId,
        to: NodeId,
        reject: bool,
        index: LogIndex,
        commit: LogIndex,
    ) -> Self {
        Self {
            term,
            from,
            to,
            reject,
            index,
            commit,
        }
    }
}

/// Leader liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRequest {
    /// Leader's term.
    pub term: TermId,
    /// The leader.
    pub from: NodeId,
    /// Target peer.
    pub to: NodeId,
}

impl HeartbeatRequest {
    /// Creates a new heartbeat.
    #[must_use]
    pub const fn new(term: TermId, from: NodeId, to: NodeId) -> Self {
        Self { term, from, to }
    }
}

/// Reply to a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// The responder's current term.
    pub term: TermId,
    /// The responder.
    pub from: NodeId,
    /// The leader that sent the heartbeat.
    pub to: NodeId,
    /// True if the heartbeat came from a stale term.
    pub reject: bool,
}

impl HeartbeatResponse {
    /// Creates a new heartbeat response.
    #[must_use]
    pub const fn new(term: TermId, from: NodeId, to: NodeId, reject: bool) -> Self {
        Self {
            term,
            from,
            to,
            reject,
        }
    }
}

/// Snapshot installation request. Structural only; the replica ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Sender's term.
    pub term: TermId,
    /// The sender.
    pub from: NodeId,
    /// Target peer.
    pub to: NodeId,
}

impl SnapshotRequest {
    /// Creates a new snapshot request.
    #[must_use]
    pub const fn new(term: TermId, from: NodeId, to: NodeId) -> Self {
        Self { term, from, to }
    }
}
