//! Direct leader election.
//!
//! Every node floods a hop-limited candidacy carrying its centrality. A node
//! adopts a candidate only when `centrality × perceived trust` strictly beats
//! its current leader score, so the local leader score never decreases.
//! Followers keep in touch with their leader through heartbeats relayed by
//! any node in between.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Election, ElectionInput, ElectionReport, LeaderElecting, Outbox, Relayable, SeenSet};
use crate::config::NodeConfig;
use crate::trust::TrustView;
use crate::types::{ExchangeContext, IdSequence, NodeId, Timestamp};

/// A flooded, hop-limited leadership bid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeaderCandidacy {
    pub node_id: NodeId,
    pub centrality: f64,
    pub hop_count: u32,
    pub timestamp: Timestamp,
}

impl LeaderCandidacy {
    /// The copy a receiver stores, or `None` when the flood TTL is exhausted.
    pub fn relayed(&self) -> Option<Self> {
        let hop_count = self.hop_count.checked_sub(1).filter(|&h| h > 0)?;
        Some(Self { hop_count, ..*self })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatKind {
    Request,
    Response,
    ChangedLeader,
}

/// Heartbeat exchanged between a follower and its leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderMessage {
    pub id: u64,
    pub source_id: NodeId,
    pub destination_id: NodeId,
    pub kind: HeartbeatKind,
    pub timestamp: Timestamp,
    /// Origination time of the request a response answers.
    pub request_time: Option<Timestamp>,
    pub hop_count_per_node: BTreeMap<NodeId, u32>,
}

impl Relayable for LeaderMessage {
    fn id(&self) -> u64 {
        self.id
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn hop_count_per_node(&self) -> &BTreeMap<NodeId, u32> {
        &self.hop_count_per_node
    }

    fn hop_count_per_node_mut(&mut self) -> &mut BTreeMap<NodeId, u32> {
        &mut self.hop_count_per_node
    }
}

/// Direct election state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectElection {
    owner: NodeId,
    max_hop: u32,
    heartbeat_period: u64,
    leader_node_id: NodeId,
    leader_score: f64,
    /// Latest candidacy known per candidate, this node's own included.
    candidacies: BTreeMap<NodeId, LeaderCandidacy>,
    /// Follower -> time of its last confirmed request.
    leader_community: BTreeMap<NodeId, Timestamp>,
    heartbeats: Outbox<LeaderMessage>,
    seen: SeenSet,
    response_times: Vec<u64>,
    response_hops: Vec<u32>,
    last_generation: Option<Timestamp>,
    leader_changes: u32,
}

impl DirectElection {
    pub fn new(owner: NodeId, config: &NodeConfig) -> Self {
        Self {
            owner,
            max_hop: config.community_max_hop,
            heartbeat_period: config.heartbeat_generation_time,
            leader_node_id: owner,
            leader_score: 0.0,
            candidacies: BTreeMap::new(),
            leader_community: BTreeMap::new(),
            heartbeats: Outbox::new(config.relay_buffer_size, config.relay_lifetime),
            seen: SeenSet::new(config.relay_lifetime),
            response_times: Vec::new(),
            response_hops: Vec::new(),
            last_generation: None,
            leader_changes: 0,
        }
    }

    pub fn candidacies(&self) -> &BTreeMap<NodeId, LeaderCandidacy> {
        &self.candidacies
    }

    pub fn leader_community(&self) -> &BTreeMap<NodeId, Timestamp> {
        &self.leader_community
    }

    pub fn heartbeats(&self) -> impl Iterator<Item = &LeaderMessage> {
        self.heartbeats.iter()
    }

    /// Round-trip latencies of answered requests.
    pub fn response_times(&self) -> &[u64] {
        &self.response_times
    }

    /// Path lengths of received responses.
    pub fn response_hops(&self) -> &[u32] {
        &self.response_hops
    }

    pub fn leader_changes(&self) -> u32 {
        self.leader_changes
    }

    /// Replace this node's own candidacy with a fresh one.
    pub fn generate_candidacy(&mut self, centrality: f64, now: Timestamp) -> LeaderCandidacy {
        let candidacy = LeaderCandidacy {
            node_id: self.owner,
            centrality,
            hop_count: self.max_hop,
            timestamp: now,
        };
        self.candidacies.insert(self.owner, candidacy);
        candidacy
    }

    /// Merge a peer's candidacies. Returns the ones admitted or refreshed.
    ///
    /// Each peer entry loses one hop; exhausted entries are dropped. For a
    /// known candidate the more recent timestamp wins, ties keep ours.
    pub fn exchange_candidacies<'a>(
        &mut self,
        peer_candidacies: impl Iterator<Item = &'a LeaderCandidacy>,
    ) -> Vec<LeaderCandidacy> {
        let mut admitted = Vec::new();
        for candidacy in peer_candidacies {
            if candidacy.node_id == self.owner {
                continue;
            }
            let Some(copy) = candidacy.relayed() else {
                continue;
            };
            if let Some(existing) = self.candidacies.get(&copy.node_id) {
                if existing.timestamp >= copy.timestamp {
                    continue;
                }
            }
            self.candidacies.insert(copy.node_id, copy);
            admitted.push(copy);
        }
        admitted
    }

    /// Score a candidacy and switch leader on strict improvement.
    ///
    /// While no leader has a positive score, a zero-centrality candidate that
    /// is not distrusted is adopted, so a leader exists before any contact
    /// history does.
    pub fn add_candidacy(
        &mut self,
        candidacy: &LeaderCandidacy,
        trust: &dyn TrustView,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> bool {
        let trust_value = trust.trust_of(candidacy.node_id);
        let score = candidacy.centrality * trust_value;

        if candidacy.node_id == self.leader_node_id {
            if score > self.leader_score {
                self.leader_score = score;
            }
            return false;
        }

        let bootstrap = self.leader_score == 0.0 && candidacy.centrality == 0.0 && trust_value > 0.0;
        if bootstrap || score > self.leader_score {
            self.change_leader(candidacy.node_id, score.max(self.leader_score), now, ids);
            return true;
        }
        false
    }

    /// Tell the previous leader goodbye and the new one hello.
    pub fn change_leader(
        &mut self,
        new_leader: NodeId,
        score: f64,
        now: Timestamp,
        ids: &mut IdSequence,
    ) {
        let previous = self.leader_node_id;
        if previous != self.owner {
            self.emit(previous, HeartbeatKind::ChangedLeader, None, now, ids);
        }
        self.leader_node_id = new_leader;
        self.leader_score = score;
        self.leader_changes += 1;
        if new_leader != self.owner {
            self.emit(new_leader, HeartbeatKind::Request, None, now, ids);
        }
        debug!(node = self.owner, previous, leader = new_leader, score, "leader changed");
    }

    /// Refresh the candidacy and ping the leader once per heartbeat period.
    fn maybe_generate(
        &mut self,
        centrality: f64,
        trust: &dyn TrustView,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> bool {
        let due = self
            .last_generation
            .map_or(true, |last| now.saturating_sub(last) >= self.heartbeat_period);
        if !due {
            return false;
        }
        self.last_generation = Some(now);
        let own = self.generate_candidacy(centrality, now);
        let changed = self.add_candidacy(&own, trust, now, ids);
        if !changed && self.leader_node_id != self.owner {
            let leader = self.leader_node_id;
            self.emit(leader, HeartbeatKind::Request, None, now, ids);
        }
        changed
    }

    fn emit(
        &mut self,
        destination: NodeId,
        kind: HeartbeatKind,
        request_time: Option<Timestamp>,
        now: Timestamp,
        ids: &mut IdSequence,
    ) {
        let message = LeaderMessage {
            id: ids.next_protocol_id(),
            source_id: self.owner,
            destination_id: destination,
            kind,
            timestamp: now,
            request_time,
            hop_count_per_node: BTreeMap::new(),
        };
        self.seen.first_sight(message.id, message.timestamp);
        self.heartbeats.push(message);
    }

    /// Handle or relay every heartbeat in the peer's outbox not seen before.
    pub fn process_heartbeats<'a>(
        &mut self,
        peer_heartbeats: impl Iterator<Item = &'a LeaderMessage>,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> (usize, usize) {
        let mut handled = 0;
        let mut relayed = 0;
        for heartbeat in peer_heartbeats {
            if self.seen.is_expired(heartbeat.timestamp, now)
                || !self.seen.first_sight(heartbeat.id, heartbeat.timestamp)
            {
                continue;
            }
            if heartbeat.destination_id == self.owner {
                self.handle(heartbeat, now, ids);
                handled += 1;
            } else if heartbeat.source_id != self.owner {
                let mut copy = heartbeat.clone();
                copy.transfer(self.owner);
                self.heartbeats.push(copy);
                relayed += 1;
            }
        }
        (handled, relayed)
    }

    fn handle(&mut self, heartbeat: &LeaderMessage, now: Timestamp, ids: &mut IdSequence) {
        let sender = heartbeat.source_id;
        match heartbeat.kind {
            HeartbeatKind::Request => {
                self.leader_community
                    .entry(sender)
                    .and_modify(|t| *t = (*t).max(heartbeat.timestamp))
                    .or_insert(heartbeat.timestamp);
                self.emit(
                    sender,
                    HeartbeatKind::Response,
                    Some(heartbeat.timestamp),
                    now,
                    ids,
                );
                trace!(node = self.owner, follower = sender, "request answered");
            }
            HeartbeatKind::Response => {
                let requested = heartbeat.request_time.unwrap_or(heartbeat.timestamp);
                self.response_times.push(now.saturating_sub(requested));
                self.response_hops.push(heartbeat.hops());
            }
            HeartbeatKind::ChangedLeader => {
                if let Some(&confirmed) = self.leader_community.get(&sender) {
                    if heartbeat.timestamp >= confirmed {
                        self.leader_community.remove(&sender);
                    }
                }
            }
        }
    }
}

impl LeaderElecting for DirectElection {
    fn leader(&self) -> NodeId {
        self.leader_node_id
    }

    fn leader_score(&self) -> f64 {
        self.leader_score
    }

    fn leader_community_members(&self) -> Vec<NodeId> {
        self.leader_community.keys().copied().collect()
    }

    fn exchange(
        &mut self,
        input: &ElectionInput<'_>,
        peer: &Election,
        ctx: &mut ExchangeContext<'_>,
    ) -> ElectionReport {
        let now = ctx.now;
        let mut report = ElectionReport::default();
        self.heartbeats.prune(now);
        self.seen.prune(now);

        if self.maybe_generate(input.announced_centrality, input.trust, now, ctx.ids) {
            report.leader_changed = true;
        }

        let Some(peer) = peer.as_direct() else {
            return report;
        };

        for candidacy in self.exchange_candidacies(peer.candidacies.values()) {
            if self.add_candidacy(&candidacy, input.trust, now, ctx.ids) {
                report.leader_changed = true;
            }
        }

        let (handled, relayed) = self.process_heartbeats(peer.heartbeats.iter(), now, ctx.ids);
        report.handled = handled;
        report.relayed = relayed;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{FullTrust, TrustEngine};
    use crate::types::MessageId;

    fn election(owner: NodeId) -> DirectElection {
        DirectElection::new(owner, &NodeConfig::default())
    }

    fn candidacy(node_id: NodeId, centrality: f64, hop_count: u32, timestamp: u64) -> LeaderCandidacy {
        LeaderCandidacy {
            node_id,
            centrality,
            hop_count,
            timestamp,
        }
    }

    #[test]
    fn test_own_candidacy_replaced_not_accumulated() {
        let mut e = election(0);
        e.generate_candidacy(0.1, 10);
        e.generate_candidacy(0.2, 20);
        assert_eq!(e.candidacies().len(), 1);
        assert_eq!(e.candidacies()[&0].timestamp, 20);
    }

    #[test]
    fn test_candidacy_hop_decay_and_drop() {
        let mut e = election(0);
        let peer = [candidacy(1, 0.5, 3, 10), candidacy(2, 0.5, 1, 10)];
        let admitted = e.exchange_candidacies(peer.iter());
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].node_id, 1);
        assert_eq!(admitted[0].hop_count, 2);
        assert!(!e.candidacies().contains_key(&2));
    }

    #[test]
    fn test_candidacy_freshness_wins_and_ties_keep_existing() {
        let mut e = election(0);
        e.exchange_candidacies([candidacy(1, 0.5, 5, 10)].iter());
        assert!(e.exchange_candidacies([candidacy(1, 0.9, 5, 10)].iter()).is_empty());
        assert_eq!(e.candidacies()[&1].centrality, 0.5);
        assert!(e.exchange_candidacies([candidacy(1, 0.1, 5, 5)].iter()).is_empty());
        let fresher = e.exchange_candidacies([candidacy(1, 0.1, 5, 11)].iter());
        assert_eq!(fresher.len(), 1);
        assert_eq!(e.candidacies()[&1].centrality, 0.1);
    }

    #[test]
    fn test_bootstrap_accepts_zero_centrality_trusted_candidate() {
        let mut ids = IdSequence::new();
        let mut trust = TrustEngine::new(1);
        trust.set_own_opinion(0, MessageId(1), 0.8, 0);
        let mut e = election(1);
        assert!(e.add_candidacy(&candidacy(0, 0.0, 5, 0), &trust, 0, &mut ids));
        assert_eq!(e.leader(), 0);
        assert_eq!(e.leader_score(), 0.0);
    }

    #[test]
    fn test_bootstrap_refuses_fully_distrusted_candidate() {
        let mut ids = IdSequence::new();
        let mut trust = TrustEngine::new(1);
        trust.set_own_opinion(0, MessageId(1), 0.0, 0);
        let mut e = election(1);
        assert!(!e.add_candidacy(&candidacy(0, 0.0, 5, 0), &trust, 0, &mut ids));
        assert_eq!(e.leader(), 1);
    }

    #[test]
    fn test_strict_improvement_only() {
        let mut ids = IdSequence::new();
        let mut e = election(0);
        assert!(e.add_candidacy(&candidacy(1, 0.5, 5, 0), &FullTrust, 0, &mut ids));
        assert!(!e.add_candidacy(&candidacy(2, 0.5, 5, 0), &FullTrust, 0, &mut ids));
        assert!(!e.add_candidacy(&candidacy(3, 0.4, 5, 0), &FullTrust, 0, &mut ids));
        assert!(e.add_candidacy(&candidacy(3, 0.6, 5, 1), &FullTrust, 1, &mut ids));
        assert_eq!(e.leader(), 3);
        assert_eq!(e.leader_score(), 0.6);
    }

    #[test]
    fn test_change_leader_emits_goodbye_and_request() {
        let mut ids = IdSequence::new();
        let mut e = election(0);
        e.change_leader(1, 0.5, 0, &mut ids);
        e.change_leader(2, 0.7, 5, &mut ids);
        let kinds: Vec<_> = e
            .heartbeats()
            .map(|h| (h.kind, h.destination_id))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (HeartbeatKind::Request, 1),
                (HeartbeatKind::ChangedLeader, 1),
                (HeartbeatKind::Request, 2),
            ]
        );
    }

    #[test]
    fn test_request_handled_once_across_relay_paths() {
        let mut ids = IdSequence::new();
        let mut follower = election(0);
        follower.change_leader(2, 0.5, 0, &mut ids);

        // two relays carry the same request
        let mut relay_a = election(5);
        let mut relay_b = election(6);
        relay_a.process_heartbeats(follower.heartbeats(), 0, &mut ids);
        relay_b.process_heartbeats(follower.heartbeats(), 0, &mut ids);

        let mut leader = election(2);
        let (handled_a, _) = leader.process_heartbeats(relay_a.heartbeats(), 10, &mut ids);
        let (handled_b, _) = leader.process_heartbeats(relay_b.heartbeats(), 10, &mut ids);
        assert_eq!(handled_a + handled_b, 1);
        assert_eq!(leader.leader_community_members(), vec![0]);
        let responses = leader
            .heartbeats()
            .filter(|h| h.kind == HeartbeatKind::Response)
            .count();
        assert_eq!(responses, 1);
    }

    #[test]
    fn test_response_records_round_trip() {
        let mut ids = IdSequence::new();
        let mut follower = election(0);
        follower.change_leader(1, 0.5, 100, &mut ids);
        let mut leader = election(1);
        leader.process_heartbeats(follower.heartbeats(), 150, &mut ids);
        let leader_out: Vec<LeaderMessage> = leader.heartbeats().cloned().collect();
        follower.process_heartbeats(leader_out.iter(), 400, &mut ids);
        assert_eq!(follower.response_times(), &[300]);
    }

    #[test]
    fn test_changed_leader_removes_follower() {
        let mut ids = IdSequence::new();
        let mut follower = election(0);
        follower.change_leader(1, 0.5, 100, &mut ids);
        let mut leader = election(1);
        leader.process_heartbeats(follower.heartbeats(), 100, &mut ids);
        assert_eq!(leader.leader_community_members(), vec![0]);

        follower.change_leader(2, 0.9, 200, &mut ids);
        leader.process_heartbeats(follower.heartbeats(), 200, &mut ids);
        assert!(leader.leader_community_members().is_empty());
    }

    #[test]
    fn test_expired_heartbeat_ignored() {
        let mut ids = IdSequence::new();
        let mut follower = election(0);
        follower.change_leader(3, 0.4, 0, &mut ids);
        let lifetime = NodeConfig::default().relay_lifetime;

        let mut late = election(3);
        let (handled, relayed) = late.process_heartbeats(follower.heartbeats(), lifetime + 1, &mut ids);
        assert_eq!((handled, relayed), (0, 0));
        assert!(late.leader_community_members().is_empty());

        let mut leader = election(3);
        let (handled, _) = leader.process_heartbeats(follower.heartbeats(), lifetime, &mut ids);
        assert_eq!(handled, 1);
        assert_eq!(leader.leader_community_members(), vec![0]);
    }
}
