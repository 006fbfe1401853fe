//! Cluster scenario tests.
//!
//! These drive a small in-process cluster by hand-delivering drained
//! messages, and verify the Raft safety properties hold at every step:
//! term monotonicity, at most one leader per term, watermark ordering,
//! and the match/next progress invariant.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use tiller_core::{LogIndex, NodeId};
use tiller_raft::{
    MemoryStorage, Message, ProposeRequest, RaftConfig, RaftNode, RaftState,
};

/// A hand-driven cluster of replicas with a safety-property checker.
struct Cluster {
    size: u64,
    nodes: BTreeMap<u64, RaftNode<MemoryStorage>>,
    /// Leaders observed in each term across the whole run.
    leaders_by_term: BTreeMap<u64, BTreeSet<u64>>,
    /// Last observed term per replica, for monotonicity checking.
    last_terms: BTreeMap<u64, u64>,
}

impl Cluster {
    fn new(size: u64) -> Self {
        let storages = (1..=size).map(|id| (id, MemoryStorage::new())).collect();
        Self::with_storages(size, storages)
    }

    fn with_storages(size: u64, mut storages: BTreeMap<u64, MemoryStorage>) -> Self {
        let peer_ids: Vec<NodeId> = (1..=size).map(NodeId::new).collect();
        let mut nodes = BTreeMap::new();
        for id in 1..=size {
            let config = RaftConfig::new(NodeId::new(id))
                .with_peers(peer_ids.clone())
                .with_tick_config(10, 1)
                .with_random_seed(id);
            let storage = storages.remove(&id).unwrap();
            nodes.insert(id, RaftNode::new(config, storage).unwrap());
        }
        Self {
            size,
            nodes,
            leaders_by_term: BTreeMap::new(),
            last_terms: BTreeMap::new(),
        }
    }

    fn node(&self, id: u64) -> &RaftNode<MemoryStorage> {
        &self.nodes[&id]
    }

    fn tick(&mut self, id: u64) {
        self.nodes.get_mut(&id).unwrap().tick().unwrap();
        self.check_invariants();
    }

    /// Ticks `id` until `condition` holds, with an upper bound.
    fn tick_until<F>(&mut self, id: u64, max_ticks: u32, condition: F)
    where
        F: Fn(&RaftNode<MemoryStorage>) -> bool,
    {
        for _ in 0..max_ticks {
            self.tick(id);
            if condition(self.node(id)) {
                return;
            }
        }
        panic!("condition not reached within {max_ticks} ticks");
    }

    fn propose(&mut self, id: u64, data: &'static str) {
        self.nodes
            .get_mut(&id)
            .unwrap()
            .step(Message::Propose(ProposeRequest::single(Bytes::from(data))))
            .unwrap();
        self.check_invariants();
    }

    /// One drain-and-deliver pass. Messages addressed to `drop_to` are
    /// discarded, simulating a lossy link. Returns the delivered count.
    fn deliver_round(&mut self, drop_to: Option<u64>) -> usize {
        let mut inflight = Vec::new();
        for node in self.nodes.values_mut() {
            inflight.extend(node.take_messages());
        }

        let mut delivered = 0;
        for message in inflight {
            let to = message
                .to()
                .expect("peer messages carry a destination")
                .get();
            if Some(to) == drop_to {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&to) {
                node.step(message).unwrap();
                delivered += 1;
            }
            self.check_invariants();
        }
        delivered
    }

    /// Delivers messages until every outbound buffer is empty.
    fn settle(&mut self) {
        while self.deliver_round(None) > 0 {}
    }

    /// Delivers until quiescent, dropping everything sent to `drop_to`.
    fn settle_without(&mut self, drop_to: u64) {
        while self.deliver_round(Some(drop_to)) > 0 {}
    }

    fn leader_id(&self) -> Option<u64> {
        self.nodes
            .iter()
            .find(|(_, node)| node.state() == RaftState::Leader)
            .map(|(&id, _)| id)
    }

    fn check_invariants(&mut self) {
        for (&id, node) in &self.nodes {
            let term = node.term().get();
            let last_term = self.last_terms.entry(id).or_insert(0);
            assert!(
                term >= *last_term,
                "term moved backwards on node {id}: {last_term} -> {term}"
            );
            *last_term = term;

            let log = node.raft_log();
            assert!(log.committed() <= log.last_index());
            assert!(log.applied() <= log.committed());
            assert!(log.stabled() <= log.last_index());

            if node.state() == RaftState::Leader {
                self.leaders_by_term.entry(term).or_default().insert(id);
                for peer in 1..=self.size {
                    if let Some(pr) = node.progress(NodeId::new(peer)) {
                        assert!(
                            pr.matched < pr.next,
                            "progress invariant violated on node {id} for peer {peer}"
                        );
                    }
                }
            }
        }

        for (term, leaders) in &self.leaders_by_term {
            assert!(
                leaders.len() <= 1,
                "multiple leaders in term {term}: {leaders:?}"
            );
        }
    }

    fn assert_logs_converged(&self, expected_last: u64) {
        let reference: Vec<_> = self.node(1).raft_log().all_entries().to_vec();
        assert_eq!(reference.last().unwrap().index.get(), expected_last);
        for id in 2..=self.size {
            assert_eq!(
                self.node(id).raft_log().all_entries(),
                &reference[..],
                "log on node {id} diverges from node 1"
            );
        }
    }
}

fn make_entry(term: u64, index: u64) -> tiller_raft::LogEntry {
    tiller_raft::LogEntry::new(
        tiller_core::TermId::new(term),
        LogIndex::new(index),
        Bytes::from(format!("entry-{index}")),
    )
}

#[test]
fn test_single_node_cluster_elects_itself() {
    let mut cluster = Cluster::new(1);

    cluster.tick_until(1, 20, RaftNode::is_leader);

    let node = cluster.node(1);
    assert_eq!(node.term().get(), 1);
    assert_eq!(node.raft_log().last_index().get(), 1);
    assert_eq!(node.raft_log().committed().get(), 1);
}

#[test]
fn test_three_node_election() {
    let mut cluster = Cluster::new(3);

    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();

    assert_eq!(cluster.leader_id(), Some(1));
    for id in 2..=3 {
        let node = cluster.node(id);
        assert_eq!(node.state(), RaftState::Follower);
        assert_eq!(node.lead(), Some(NodeId::new(1)));
    }

    // The leader's no-op replicated and committed everywhere.
    cluster.assert_logs_converged(1);
    for id in 1..=3 {
        assert_eq!(cluster.node(id).raft_log().committed().get(), 1);
    }
}

#[test]
fn test_proposal_replicates_to_all() {
    let mut cluster = Cluster::new(3);
    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();

    cluster.propose(1, "alpha");
    cluster.settle();
    cluster.propose(1, "beta");
    cluster.settle();

    cluster.assert_logs_converged(3);
    for id in 1..=3 {
        assert_eq!(cluster.node(id).raft_log().committed().get(), 3);
    }
}

#[test]
fn test_divergent_follower_converges() {
    // Node 1 has four term-1 entries; node 2 diverges at index 3 with a
    // term-2 entry; node 3 is empty. Node 1 wins the election (node 3's
    // grant is enough) and walks node 2 back to the common prefix.
    let mut storages = BTreeMap::new();

    let mut s1 = MemoryStorage::new();
    s1.append(&[
        make_entry(1, 1),
        make_entry(1, 2),
        make_entry(1, 3),
        make_entry(1, 4),
    ])
    .unwrap();
    s1.set_hard_state(tiller_raft::HardState::new(
        tiller_core::TermId::new(2),
        None,
        LogIndex::new(0),
    ));
    storages.insert(1, s1);

    let mut s2 = MemoryStorage::new();
    s2.append(&[make_entry(1, 1), make_entry(1, 2), make_entry(2, 3)])
        .unwrap();
    s2.set_hard_state(tiller_raft::HardState::new(
        tiller_core::TermId::new(2),
        None,
        LogIndex::new(0),
    ));
    storages.insert(2, s2);

    storages.insert(3, MemoryStorage::new());

    let mut cluster = Cluster::with_storages(3, storages);
    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();

    assert_eq!(cluster.leader_id(), Some(1));
    assert_eq!(cluster.node(1).term().get(), 3);

    // Everyone ends with node 1's four entries plus the term-3 no-op.
    cluster.assert_logs_converged(5);
    for id in 1..=3 {
        let log = cluster.node(id).raft_log();
        assert_eq!(log.committed().get(), 5);
        assert_eq!(log.term(LogIndex::new(3)).unwrap().get(), 1);
        assert_eq!(log.term(LogIndex::new(5)).unwrap().get(), 3);
    }
}

#[test]
fn test_heartbeat_repairs_dropped_append() {
    let mut cluster = Cluster::new(3);
    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();

    // Node 3 misses the proposal entirely.
    cluster.propose(1, "alpha");
    cluster.settle_without(3);
    assert_eq!(cluster.node(1).raft_log().committed().get(), 2);
    assert_eq!(cluster.node(3).raft_log().last_index().get(), 1);

    // The next heartbeat round trip repairs it: the response triggers an
    // append carrying everything node 3 is missing.
    cluster.tick(1);
    cluster.settle();

    cluster.assert_logs_converged(2);
    assert_eq!(cluster.node(3).raft_log().committed().get(), 2);
}

#[test]
fn test_leadership_changes_hands() {
    let mut cluster = Cluster::new(3);
    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();
    assert_eq!(cluster.leader_id(), Some(1));
    let first_term = cluster.node(1).term().get();

    // Node 2 times out and takes over at a higher term; node 1 steps
    // down when it sees the new term.
    cluster.tick_until(2, 40, |n| n.state() != RaftState::Follower);
    cluster.settle();

    assert_eq!(cluster.leader_id(), Some(2));
    assert_eq!(cluster.node(1).state(), RaftState::Follower);
    let second_term = cluster.node(2).term().get();
    assert!(second_term > first_term);

    // The new leader still accepts writes.
    cluster.propose(2, "gamma");
    cluster.settle();
    for id in 1..=3 {
        let log = cluster.node(id).raft_log();
        assert_eq!(log.committed(), log.last_index());
    }
}

#[test]
fn test_duplicate_append_delivery_is_idempotent() {
    let mut cluster = Cluster::new(3);
    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();

    cluster.propose(1, "alpha");

    // Capture the append to node 2 and deliver it twice.
    let mut messages = Vec::new();
    for node in cluster.nodes.values_mut() {
        messages.extend(node.take_messages());
    }
    let append_to_2 = messages
        .iter()
        .find(|m| matches!(m, Message::Append(req) if req.to == NodeId::new(2)))
        .cloned()
        .unwrap();

    let node2 = cluster.nodes.get_mut(&2).unwrap();
    node2.step(append_to_2.clone()).unwrap();
    let entries_after_first = node2.raft_log().all_entries().to_vec();
    node2.step(append_to_2).unwrap();

    assert_eq!(cluster.node(2).raft_log().all_entries(), &entries_after_first[..]);
}

#[test]
fn test_driver_watermark_flow() {
    // The driver persists unstable entries and applies committed ones
    // through the log's watermark API.
    let mut cluster = Cluster::new(3);
    cluster.tick_until(1, 20, |n| n.state() != RaftState::Follower);
    cluster.settle();
    cluster.propose(1, "alpha");
    cluster.settle();

    let node = cluster.nodes.get_mut(&1).unwrap();
    let log = node.raft_log_mut();

    let unstable: Vec<_> = log.unstable_entries().to_vec();
    assert_eq!(unstable.len(), 2);
    let last = unstable.last().unwrap().index;
    log.stable_to(last);
    assert!(log.unstable_entries().is_empty());

    let ready: Vec<_> = log.next_committed_entries().to_vec();
    assert_eq!(ready.len(), 2);
    let committed = log.committed();
    log.applied_to(committed);
    assert!(log.next_committed_entries().is_empty());
}
