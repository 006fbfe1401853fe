//! The Raft replica state machine.
//!
//! [`RaftNode`] is a pure state machine: the driver advances it with
//! [`RaftNode::tick`] and [`RaftNode::step`], then drains the outbound
//! buffer with [`RaftNode::take_messages`] and persists whatever
//! [`RaftNode::hard_state`] and the log's unstable tail report. No I/O
//! happens inside, which is what makes the core deterministic and
//! simulation-testable.
//!
//! Term handling is centralized: `step` applies the "higher term wins"
//! rule once, before role dispatch, so every message kind observes it
//! uniformly.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use tiller_core::{LogIndex, NodeId, TermId};

use crate::config::RaftConfig;
use crate::error::{RaftError, RaftResult};
use crate::log::{LogEntry, RaftLog};
use crate::message::{
    AppendRequest, AppendResponse, HeartbeatRequest, HeartbeatResponse, Message, ProposeRequest,
    VoteRequest, VoteResponse,
};
use crate::progress::Progress;
use crate::storage::{HardState, Storage, StorageError};

/// Replica role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaftState {
    /// Passive: responds to RPCs, waits out the election timer.
    #[default]
    Follower,
    /// Actively soliciting votes.
    Candidate,
    /// Handles proposals, replicates the log, sends heartbeats.
    Leader,
}

/// Volatile state the driver may want to observe but never persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftState {
    /// The believed leader for the current term, if any.
    pub lead: Option<NodeId>,
    /// The replica's current role.
    pub state: RaftState,
}

/// A Raft consensus replica.
///
/// Created from a validated [`RaftConfig`] plus the storage's initial
/// state; mutated only by `tick` and `step`; never accessed concurrently.
#[derive(Debug)]
pub struct RaftNode<S: Storage> {
    /// The local replica id.
    id: NodeId,

    /// Latest term this replica has seen. Never decreases.
    term: TermId,
    /// Peer voted for in the current term.
    vote: Option<NodeId>,

    /// The log view.
    raft_log: RaftLog<S>,

    /// Replication progress per peer, maintained while leader.
    prs: HashMap<NodeId, Progress>,

    /// Current role.
    state: RaftState,

    /// Ballots received in the current election, maintained while
    /// candidate. `true` means granted.
    votes: HashMap<NodeId, bool>,

    /// Outbound messages awaiting the driver's drain. FIFO.
    msgs: Vec<Message>,

    /// The believed leader for the current term.
    lead: Option<NodeId>,

    /// Ticks between leader heartbeats.
    heartbeat_tick: u32,
    /// Baseline ticks between elections.
    election_tick: u32,
    /// Ticks since the last heartbeat broadcast. Leader only.
    heartbeat_elapsed: u32,
    /// Ticks since the last election timeout or valid leader contact.
    election_elapsed: u32,
    /// The current randomized election timeout, re-rolled on every reset.
    randomized_election_timeout: u32,

    /// Index at or above which a configuration change is pending.
    /// Proposals are dropped until the applied index passes it.
    pending_conf_index: LogIndex,

    /// Seeded jitter source for election timeouts.
    rng: ChaCha8Rng,
}

impl<S: Storage> RaftNode<S> {
    /// Creates a replica from a configuration and its storage.
    ///
    /// Reads hard state and the peer set out of storage, starts as a
    /// follower with no known leader, and rolls the first randomized
    /// election timeout.
    ///
    /// # Errors
    /// Returns a [`ConfigError`](crate::ConfigError) wrapped in
    /// [`RaftError::Config`] for an invalid configuration, or
    /// [`RaftError::Storage`] if the initial state cannot be read.
    pub fn new(config: RaftConfig, storage: S) -> RaftResult<Self> {
        config.validate()?;

        let (hard_state, conf_state) = storage.initial_state()?;
        let mut raft_log = RaftLog::new(storage)?;

        let RaftConfig {
            id,
            peers,
            election_tick,
            heartbeat_tick,
            applied,
            random_seed,
        } = config;

        if applied.get() > 0 {
            raft_log.restore_applied(applied);
        }

        let peers = if peers.is_empty() {
            conf_state.nodes
        } else {
            peers
        };

        let next = raft_log.last_index().next();
        let mut prs = HashMap::with_capacity(peers.len());
        for peer in peers {
            prs.insert(peer, Progress::new(next));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(random_seed);
        let randomized_election_timeout = election_tick + rng.gen_range(0..election_tick);

        Ok(Self {
            id,
            term: hard_state.term,
            vote: hard_state.vote,
            raft_log,
            prs,
            state: RaftState::Follower,
            votes: HashMap::new(),
            msgs: Vec::new(),
            lead: None,
            heartbeat_tick,
            election_tick,
            heartbeat_elapsed: 0,
            election_elapsed: 0,
            randomized_election_timeout,
            pending_conf_index: LogIndex::new(0),
            rng,
        })
    }

    /// Returns this replica's id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the current term.
    #[must_use]
    pub const fn term(&self) -> TermId {
        self.term
    }

    /// Returns the vote cast in the current term, if any.
    #[must_use]
    pub const fn vote(&self) -> Option<NodeId> {
        self.vote
    }

    /// Returns the current role.
    #[must_use]
    pub const fn state(&self) -> RaftState {
        self.state
    }

    /// Returns true if this replica believes it is the leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state == RaftState::Leader
    }

    /// Returns the believed leader for the current term, if any.
    #[must_use]
    pub const fn lead(&self) -> Option<NodeId> {
        self.lead
    }

    /// Returns the log view.
    #[must_use]
    pub const fn raft_log(&self) -> &RaftLog<S> {
        &self.raft_log
    }

    /// Returns the log view mutably, for the driver's watermark
    /// advancement (`stable_to`, `applied_to`).
    pub fn raft_log_mut(&mut self) -> &mut RaftLog<S> {
        &mut self.raft_log
    }

    /// Returns the replication progress for `peer`, while leader.
    #[must_use]
    pub fn progress(&self, peer: NodeId) -> Option<&Progress> {
        self.prs.get(&peer)
    }

    /// Returns the volatile state the driver may observe.
    #[must_use]
    pub const fn soft_state(&self) -> SoftState {
        SoftState {
            lead: self.lead,
            state: self.state,
        }
    }

    /// Returns the durable state the driver must persist before
    /// dispatching dependent messages.
    #[must_use]
    pub const fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.raft_log.committed(),
        }
    }

    /// Drains the outbound buffer, in generation order.
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.msgs)
    }

    /// Advances the logical clock by a single tick.
    ///
    /// # Errors
    /// Propagates storage failures from the election or heartbeat paths.
    pub fn tick(&mut self) -> RaftResult<()> {
        match self.state {
            RaftState::Follower | RaftState::Candidate => self.tick_election(),
            RaftState::Leader => self.tick_heartbeat(),
        }
    }

    fn tick_election(&mut self) -> RaftResult<()> {
        self.election_elapsed += 1;
        if self.election_elapsed >= self.randomized_election_timeout {
            self.election_elapsed = 0;
            self.step(Message::Hup)?;
        }
        Ok(())
    }

    fn tick_heartbeat(&mut self) -> RaftResult<()> {
        self.heartbeat_elapsed += 1;
        if self.heartbeat_elapsed >= self.heartbeat_tick {
            self.heartbeat_elapsed = 0;
            self.step(Message::Beat)?;
        }
        Ok(())
    }

    /// Routes an inbound message to the handler for the current role.
    ///
    /// A message from a higher term first steps this replica down to
    /// follower at that term; stale and inapplicable messages are
    /// silently ignored.
    ///
    /// # Errors
    /// Returns [`RaftError::ProposalDropped`] for a proposal this replica
    /// cannot accept, and [`RaftError::Storage`] if a log read fails.
    pub fn step(&mut self, message: Message) -> RaftResult<()> {
        if let Some(term) = message.term() {
            if term > self.term {
                self.become_follower(term, None);
            }
        }

        match self.state {
            RaftState::Follower => self.step_follower(message),
            RaftState::Candidate => self.step_candidate(message),
            RaftState::Leader => self.step_leader(message),
        }
    }

    fn step_follower(&mut self, message: Message) -> RaftResult<()> {
        match message {
            Message::Hup => self.do_election(),
            Message::Propose(_) => {
                debug!(id = %self.id, "proposal dropped: not the leader");
                Err(RaftError::ProposalDropped)
            }
            Message::RequestVote(req) => self.handle_request_vote(&req),
            Message::Append(req) => self.handle_append_entries(req),
            Message::Heartbeat(req) => self.handle_heartbeat(&req),
            _ => Ok(()),
        }
    }

    fn step_candidate(&mut self, message: Message) -> RaftResult<()> {
        match message {
            Message::Hup => self.do_election(),
            Message::Propose(_) => {
                debug!(id = %self.id, "proposal dropped: not the leader");
                Err(RaftError::ProposalDropped)
            }
            Message::RequestVote(req) => self.handle_request_vote(&req),
            Message::RequestVoteResponse(resp) => self.handle_request_vote_response(&resp),
            Message::Append(req) => {
                if req.term >= self.term {
                    self.become_follower(req.term, None);
                }
                self.handle_append_entries(req)
            }
            Message::Heartbeat(req) => self.handle_heartbeat(&req),
            _ => Ok(()),
        }
    }

    fn step_leader(&mut self, message: Message) -> RaftResult<()> {
        match message {
            Message::Beat => self.broadcast_heartbeat(),
            Message::Propose(req) => self.handle_propose(req),
            Message::RequestVote(req) => self.handle_request_vote(&req),
            Message::Append(req) => self.handle_append_entries(req),
            Message::AppendResponse(resp) => self.handle_append_entries_response(&resp),
            Message::Heartbeat(req) => self.handle_heartbeat(&req),
            Message::HeartbeatResponse(resp) => self.send_append(resp.from),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Role transitions
    // ------------------------------------------------------------------

    fn become_follower(&mut self, term: TermId, lead: Option<NodeId>) {
        self.state = RaftState::Follower;
        self.term = term;
        self.lead = lead;
        self.vote = None;
        debug!(id = %self.id, term = %term, "became follower");
    }

    fn become_candidate(&mut self) {
        self.state = RaftState::Candidate;
        self.lead = None;
        self.term = self.term.next();
        self.vote = Some(self.id);
        self.votes.clear();
        self.votes.insert(self.id, true);
        self.reset_election_timer();
        debug!(id = %self.id, term = %self.term, "became candidate");
    }

    fn become_leader(&mut self) -> RaftResult<()> {
        debug_assert!(self.state == RaftState::Candidate);

        self.state = RaftState::Leader;
        self.lead = Some(self.id);
        self.heartbeat_elapsed = 0;
        self.votes.clear();

        let last_index = self.raft_log.last_index();
        for (&peer, pr) in &mut self.prs {
            if peer == self.id {
                pr.matched = last_index.next();
                pr.next = pr.matched.next();
            } else {
                pr.next = last_index.next();
            }
        }

        // The no-op seals this term: earlier entries become committable
        // once it replicates (the commit restriction).
        self.raft_log
            .append(LogEntry::noop(self.term, last_index.next()));
        if self.prs.len() == 1 {
            let last = self.raft_log.last_index();
            self.raft_log.commit_to(last);
        }

        debug_assert!(self.prs.values().all(|pr| pr.matched < pr.next));
        info!(id = %self.id, term = %self.term, "became leader");

        self.broadcast_append()
    }

    // ------------------------------------------------------------------
    // Elections
    // ------------------------------------------------------------------

    fn do_election(&mut self) -> RaftResult<()> {
        self.become_candidate();

        if self.prs.len() == 1 {
            return self.become_leader();
        }

        let last_log_index = self.raft_log.last_index();
        let last_log_term = self.raft_log.last_term();
        for peer in self.peer_ids() {
            self.msgs.push(Message::RequestVote(VoteRequest::new(
                self.term,
                self.id,
                peer,
                last_log_index,
                last_log_term,
            )));
        }
        Ok(())
    }

    fn handle_request_vote(&mut self, req: &VoteRequest) -> RaftResult<()> {
        if req.term < self.term
            || (req.term == self.term && self.vote.is_some_and(|v| v != req.from))
        {
            self.send_request_vote_response(req.from, true);
            return Ok(());
        }

        let last_log_index = self.raft_log.last_index();
        let last_log_term = self.raft_log.last_term();
        if req.last_log_term < last_log_term
            || (req.last_log_term == last_log_term && req.last_log_index < last_log_index)
        {
            debug!(id = %self.id, candidate = %req.from, "vote rejected: candidate log not up to date");
            self.send_request_vote_response(req.from, true);
            return Ok(());
        }

        self.reset_election_timer();
        self.term = req.term;
        self.vote = Some(req.from);
        debug!(id = %self.id, candidate = %req.from, term = %self.term, "vote granted");
        self.send_request_vote_response(req.from, false);
        Ok(())
    }

    fn handle_request_vote_response(&mut self, resp: &VoteResponse) -> RaftResult<()> {
        self.votes.insert(resp.from, !resp.reject);

        let granted = self.votes.values().filter(|&&granted| granted).count();
        let denied = self.votes.len() - granted;
        let quorum = self.quorum();

        if granted >= quorum {
            return self.become_leader();
        }
        if denied >= quorum {
            // The election is lost; the term stays put, a higher-term
            // response would already have stepped us down in `step`.
            self.become_follower(self.term, None);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Log replication
    // ------------------------------------------------------------------

    fn handle_append_entries(&mut self, req: AppendRequest) -> RaftResult<()> {
        if req.term < self.term {
            self.send_append_response(req.from, true, LogIndex::new(0));
            return Ok(());
        }

        self.become_follower(req.term, Some(req.from));
        self.reset_election_timer();

        let mut last_index = self.raft_log.last_index();
        if req.prev_log_index > last_index {
            self.send_append_response(req.from, true, req.prev_log_index);
            return Ok(());
        }
        if self.raft_log.term(req.prev_log_index)? != req.prev_log_term {
            self.send_append_response(req.from, true, req.prev_log_index);
            return Ok(());
        }

        // Safe cast: a single request never carries more entries than fit in memory.
        #[allow(clippy::cast_possible_truncation)]
        let entry_count = req.entries.len() as u64;
        for entry in req.entries {
            if entry.index <= last_index {
                if self.raft_log.term(entry.index)? == entry.term {
                    continue;
                }
                // Same index, different term: discard the conflicting
                // suffix. Entries above the common prefix can no longer
                // be trusted as stable.
                self.raft_log.truncate_from(entry.index);
                self.raft_log.clamp_stabled(req.prev_log_index);
                self.raft_log.append(entry);
                last_index = self.raft_log.last_index();
            } else {
                self.raft_log.append(entry);
            }
        }

        if req.commit > self.raft_log.committed() {
            let commit = req
                .commit
                .min(LogIndex::new(req.prev_log_index.get() + entry_count))
                .min(self.raft_log.last_index());
            self.raft_log.commit_to(commit);
        }

        let last = self.raft_log.last_index();
        self.send_append_response(req.from, false, last);
        Ok(())
    }

    fn handle_append_entries_response(&mut self, resp: &AppendResponse) -> RaftResult<()> {
        let Some(pr) = self.prs.get(&resp.from).copied() else {
            return Ok(());
        };

        if resp.reject && resp.index.get() + 1 == pr.next.get() {
            if pr.next.get() > 1 {
                if let Some(pr) = self.prs.get_mut(&resp.from) {
                    pr.next = LogIndex::new(pr.next.get() - 1);
                }
                self.send_append(resp.from)?;
            }
            return Ok(());
        }

        if resp.index < pr.next || self.term_or_zero(resp.index)? != self.term {
            return Ok(());
        }

        if let Some(pr) = self.prs.get_mut(&resp.from) {
            pr.matched = resp.index;
            pr.next = resp.index.next();
            debug_assert!(pr.matched < pr.next);
        }

        self.maybe_commit()
    }

    /// Scans for the highest index a quorum has replicated and, if it is
    /// from the current term, commits it and propagates the new commit.
    fn maybe_commit(&mut self) -> RaftResult<()> {
        let first = self.raft_log.first_index().get();
        let last = self.raft_log.last_index().get();
        let quorum = self.quorum();

        for n in (first..=last).rev() {
            let index = LogIndex::new(n);
            let mut replicated = 1;
            for (&peer, pr) in &self.prs {
                if peer != self.id && pr.matched >= index {
                    replicated += 1;
                }
            }

            if replicated >= quorum
                && self.raft_log.term(index)? == self.term
                && index > self.raft_log.committed()
            {
                self.raft_log.commit_to(index);
                debug!(id = %self.id, committed = %index, "commit advanced");
                self.broadcast_append()?;
                break;
            }
        }
        Ok(())
    }

    fn handle_propose(&mut self, req: ProposeRequest) -> RaftResult<()> {
        if self.pending_conf_index > self.raft_log.applied() {
            warn!(id = %self.id, "proposal dropped: configuration change pending");
            return Err(RaftError::ProposalDropped);
        }

        let mut index = self.raft_log.last_index();
        for data in req.entries {
            index = index.next();
            self.raft_log.append(LogEntry::new(self.term, index, data));
        }

        let last = self.raft_log.last_index();
        if let Some(pr) = self.prs.get_mut(&self.id) {
            pr.matched = last;
            pr.next = last.next();
        }

        self.broadcast_append()?;
        if self.prs.len() == 1 {
            self.raft_log.commit_to(last);
        }
        Ok(())
    }

    fn send_append(&mut self, to: NodeId) -> RaftResult<()> {
        let Some(pr) = self.prs.get(&to) else {
            return Ok(());
        };
        let prev_log_index = LogIndex::new(pr.next.get() - 1);
        let prev_log_term = self.raft_log.term(prev_log_index)?;
        let entries = self.raft_log.entries_from(prev_log_index.next());

        self.msgs.push(Message::Append(AppendRequest::new(
            self.term,
            self.id,
            to,
            prev_log_index,
            prev_log_term,
            entries,
            self.raft_log.committed(),
        )));
        Ok(())
    }

    fn broadcast_append(&mut self) -> RaftResult<()> {
        for peer in self.peer_ids() {
            self.send_append(peer)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------

    fn broadcast_heartbeat(&mut self) -> RaftResult<()> {
        for peer in self.peer_ids() {
            self.msgs.push(Message::Heartbeat(HeartbeatRequest::new(
                self.term, self.id, peer,
            )));
        }
        Ok(())
    }

    fn handle_heartbeat(&mut self, req: &HeartbeatRequest) -> RaftResult<()> {
        if req.term < self.term {
            self.send_heartbeat_response(req.from, true);
            return Ok(());
        }

        self.lead = Some(req.from);
        self.reset_election_timer();
        self.send_heartbeat_response(req.from, false);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound responses
    // ------------------------------------------------------------------

    fn send_request_vote_response(&mut self, to: NodeId, reject: bool) {
        self.msgs.push(Message::RequestVoteResponse(VoteResponse::new(
            self.term, self.id, to, reject,
        )));
    }

    fn send_append_response(&mut self, to: NodeId, reject: bool, index: LogIndex) {
        self.msgs.push(Message::AppendResponse(AppendResponse::new(
            self.term,
            self.id,
            to,
            reject,
            index,
            self.raft_log.committed(),
        )));
    }

    fn send_heartbeat_response(&mut self, to: NodeId, reject: bool) {
        self.msgs
            .push(Message::HeartbeatResponse(HeartbeatResponse::new(
                self.term, self.id, to, reject,
            )));
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn quorum(&self) -> usize {
        self.prs.len() / 2 + 1
    }

    /// Peer ids excluding self, in stable order so the outbound buffer is
    /// deterministic.
    fn peer_ids(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .prs
            .keys()
            .copied()
            .filter(|&peer| peer != self.id)
            .collect();
        peers.sort_unstable();
        peers
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.randomized_election_timeout =
            self.election_tick + self.rng.gen_range(0..self.election_tick);
    }

    /// Term lookup that treats an index the log does not hold as term
    /// zero; a message pointing past our log is stale, not a failure.
    fn term_or_zero(&self, index: LogIndex) -> RaftResult<TermId> {
        match self.raft_log.term(index) {
            Ok(term) => Ok(term),
            Err(StorageError::Unavailable { .. }) => Ok(TermId::new(0)),
            Err(err) => Err(err.into()),
        }
    }
}
