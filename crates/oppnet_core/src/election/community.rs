//! Community-based leader election.
//!
//! Two nodes that sit in each other's local community try to merge their
//! leader communities. Admission of each new member needs a quorum of
//! confirmations from the current members; after an admission every node
//! proposes the member with the best `centrality × trust`, and once enough
//! proposals are in, the candidate with the best average proposed score is
//! elected.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    best_by_score, Election, ElectionInput, ElectionReport, LeaderElecting, Outbox, Relayable,
    SeenSet,
};
use crate::config::NodeConfig;
use crate::trust::TrustView;
use crate::types::{ExchangeContext, IdSequence, NodeId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunityMessageKind {
    AddRequest,
    AddResponse,
    AddedNode,
    LeaderProposal,
    LeaderElected,
    RemoveRequest,
    RemovedNode,
}

/// Message of the community election protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityMessage {
    pub id: u64,
    pub source_id: NodeId,
    pub destination_id: NodeId,
    /// Node the message is about (candidate member, proposed leader...).
    pub target_id: NodeId,
    pub kind: CommunityMessageKind,
    pub score: Option<f64>,
    pub target_centrality: Option<f64>,
    pub timestamp: Timestamp,
    /// Relays left before the message is dropped.
    pub hops_left: u32,
    pub hop_count_per_node: BTreeMap<NodeId, u32>,
}

impl Relayable for CommunityMessage {
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

impl CommunityMessage {
    /// Copy for further relay by `node`, or `None` once the budget is spent.
    pub fn relayed_by(&self, node: NodeId) -> Option<Self> {
        let hops_left = self.hops_left.checked_sub(1).filter(|&h| h > 0)?;
        let mut copy = self.clone();
        copy.hops_left = hops_left;
        copy.transfer(node);
        Some(copy)
    }
}

/// Confirmations gathered for one candidate member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingAdmission {
    centrality: f64,
    responders: BTreeSet<NodeId>,
    requested_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Proposal {
    candidate: NodeId,
    score: f64,
    timestamp: Timestamp,
}

/// Community election state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityElection {
    owner: NodeId,
    max_hop: u32,
    community_threshold: f64,
    proposals_threshold: f64,
    admission_trust: f64,
    /// Age after which requests and seen ids are forgotten.
    relay_lifetime: u64,
    leader_node_id: NodeId,
    leader_score: f64,
    last_election: Timestamp,
    /// Member -> last known centrality. Always contains the owner.
    leader_community: BTreeMap<NodeId, f64>,
    /// Admissions waiting for a quorum; dropped after the relay lifetime.
    pending: BTreeMap<NodeId, PendingAdmission>,
    /// Latest proposal per proposer.
    proposals: BTreeMap<NodeId, Proposal>,
    /// Member -> time its removal was requested.
    removal_requested: BTreeMap<NodeId, Timestamp>,
    outbox: Outbox<CommunityMessage>,
    seen: SeenSet,
    leader_changes: u32,
}

impl CommunityElection {
    pub fn new(owner: NodeId, config: &NodeConfig) -> Self {
        Self {
            owner,
            max_hop: config.community_max_hop,
            community_threshold: config.leader_community_threshold,
            proposals_threshold: config.leader_proposals_threshold,
            admission_trust: config.admission_trust_threshold,
            relay_lifetime: config.relay_lifetime,
            leader_node_id: owner,
            leader_score: 0.0,
            last_election: 0,
            leader_community: BTreeMap::from([(owner, 0.0)]),
            pending: BTreeMap::new(),
            proposals: BTreeMap::new(),
            removal_requested: BTreeMap::new(),
            outbox: Outbox::new(config.relay_buffer_size, config.relay_lifetime),
            seen: SeenSet::new(config.relay_lifetime),
            leader_changes: 0,
        }
    }

    pub fn leader_community(&self) -> &BTreeMap<NodeId, f64> {
        &self.leader_community
    }

    pub fn outbox(&self) -> impl Iterator<Item = &CommunityMessage> {
        self.outbox.iter()
    }

    pub fn last_election(&self) -> Timestamp {
        self.last_election
    }

    pub fn leader_changes(&self) -> u32 {
        self.leader_changes
    }

    /// Confirmations so far for a pending candidate, the requester's own included.
    pub fn confirmations(&self, target: NodeId) -> usize {
        self.pending.get(&target).map_or(0, |p| p.responders.len())
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    fn quorum_reached(&self, count: usize, threshold: f64) -> bool {
        count as f64 > threshold * self.leader_community.len() as f64
    }

    /// Forget unanswered admissions, removal requests and seen ids older
    /// than the relay lifetime, so lost requests can be sent again.
    fn expire(&mut self, now: Timestamp) {
        let lifetime = self.relay_lifetime;
        let owner = self.owner;
        self.pending.retain(|&target, p| {
            let alive = now.saturating_sub(p.requested_at) <= lifetime;
            if !alive {
                trace!(node = owner, target, "admission request expired");
            }
            alive
        });
        self.removal_requested
            .retain(|_, &mut at| now.saturating_sub(at) <= lifetime);
        self.seen.prune(now);
    }

    fn members_except_owner(&self) -> Vec<NodeId> {
        self.leader_community
            .keys()
            .copied()
            .filter(|&m| m != self.owner)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &mut self,
        destination: NodeId,
        target: NodeId,
        kind: CommunityMessageKind,
        score: Option<f64>,
        target_centrality: Option<f64>,
        now: Timestamp,
        ids: &mut IdSequence,
    ) {
        let message = CommunityMessage {
            id: ids.next_protocol_id(),
            source_id: self.owner,
            destination_id: destination,
            target_id: target,
            kind,
            score,
            target_centrality,
            timestamp: now,
            hops_left: self.max_hop,
            hop_count_per_node: BTreeMap::new(),
        };
        self.seen.first_sight(message.id, message.timestamp);
        self.outbox.push(message);
    }

    fn broadcast(
        &mut self,
        target: NodeId,
        kind: CommunityMessageKind,
        score: Option<f64>,
        target_centrality: Option<f64>,
        now: Timestamp,
        ids: &mut IdSequence,
    ) {
        for member in self.members_except_owner() {
            self.send(member, target, kind, score, target_centrality, now, ids);
        }
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Ask to bring every member of the peer's leader community into ours.
    ///
    /// A single-member community merges directly; otherwise each newcomer
    /// goes through an `AddRequest` vote. Distrusted newcomers are skipped.
    /// Returns true if members were added.
    pub fn request_merge(
        &mut self,
        peer_community: &BTreeMap<NodeId, f64>,
        trust: &dyn TrustView,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> bool {
        self.expire(now);
        let newcomers: Vec<(NodeId, f64)> = peer_community
            .iter()
            .filter(|&(m, _)| !self.leader_community.contains_key(m))
            .filter(|&(m, _)| !self.pending.contains_key(m))
            .filter(|&(&m, _)| trust.trust_of(m) >= self.admission_trust)
            .map(|(&m, &c)| (m, c))
            .collect();
        if newcomers.is_empty() {
            return false;
        }

        if self.leader_community.len() <= 1 {
            for (member, centrality) in newcomers {
                self.leader_community.insert(member, centrality);
                debug!(node = self.owner, member, "leader community merged directly");
            }
            self.propose_leader(trust, now, ids);
            return true;
        }

        for (member, centrality) in newcomers {
            self.pending.insert(
                member,
                PendingAdmission {
                    centrality,
                    responders: BTreeSet::from([self.owner]),
                    requested_at: now,
                },
            );
            self.broadcast(
                member,
                CommunityMessageKind::AddRequest,
                None,
                Some(centrality),
                now,
                ids,
            );
        }
        // a community of one other member may already be at quorum
        let ready: Vec<NodeId> = self
            .pending
            .iter()
            .filter(|(_, p)| self.quorum_reached(p.responders.len(), self.community_threshold))
            .map(|(&t, _)| t)
            .collect();
        let admitted = !ready.is_empty();
        for target in ready {
            self.admit(target, trust, now, ids);
        }
        admitted
    }

    fn record_response(
        &mut self,
        target: NodeId,
        responder: NodeId,
        trust: &dyn TrustView,
        now: Timestamp,
        ids: &mut IdSequence,
    ) {
        let Some(pending) = self.pending.get_mut(&target) else {
            return;
        };
        pending.responders.insert(responder);
        let count = pending.responders.len();
        if self.quorum_reached(count, self.community_threshold) {
            self.admit(target, trust, now, ids);
        }
    }

    fn admit(&mut self, target: NodeId, trust: &dyn TrustView, now: Timestamp, ids: &mut IdSequence) {
        let Some(pending) = self.pending.remove(&target) else {
            return;
        };
        self.broadcast(
            target,
            CommunityMessageKind::AddedNode,
            None,
            Some(pending.centrality),
            now,
            ids,
        );
        self.leader_community.insert(target, pending.centrality);
        debug!(
            node = self.owner,
            member = target,
            confirmations = pending.responders.len(),
            "leader community admitted member"
        );
        self.propose_leader(trust, now, ids);
    }

    // -------------------------------------------------------------------------
    // Election
    // -------------------------------------------------------------------------

    /// Propose the member with the best `centrality × trust` to everyone.
    pub fn propose_leader(&mut self, trust: &dyn TrustView, now: Timestamp, ids: &mut IdSequence) -> bool {
        let Some((candidate, score)) = best_by_score(
            self.leader_community
                .iter()
                .map(|(&m, &c)| (m, c * trust.trust_of(m))),
        ) else {
            return false;
        };
        self.proposals.insert(
            self.owner,
            Proposal {
                candidate,
                score,
                timestamp: now,
            },
        );
        self.broadcast(
            candidate,
            CommunityMessageKind::LeaderProposal,
            Some(score),
            None,
            now,
            ids,
        );
        self.maybe_elect(now, ids)
    }

    /// Elect the best average proposal once enough proposals are in.
    fn maybe_elect(&mut self, now: Timestamp, ids: &mut IdSequence) -> bool {
        if !self.quorum_reached(self.proposals.len(), self.proposals_threshold) {
            return false;
        }
        let mut sums: BTreeMap<NodeId, (f64, usize)> = BTreeMap::new();
        for proposal in self.proposals.values() {
            let entry = sums.entry(proposal.candidate).or_insert((0.0, 0));
            entry.0 += proposal.score;
            entry.1 += 1;
        }
        let Some((elected, average)) = best_by_score(
            sums.into_iter()
                .map(|(id, (sum, n))| (id, sum / n as f64)),
        ) else {
            return false;
        };
        if elected == self.leader_node_id {
            self.leader_score = average;
            return false;
        }
        let previous = self.leader_node_id;
        self.leader_node_id = elected;
        self.leader_score = average;
        self.last_election = now;
        self.leader_changes += 1;
        self.broadcast(
            elected,
            CommunityMessageKind::LeaderElected,
            Some(average),
            None,
            now,
            ids,
        );
        debug!(node = self.owner, previous, leader = elected, average, "leader elected");
        true
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Ask the community to expel members this node no longer trusts.
    fn request_removals(&mut self, trust: &dyn TrustView, now: Timestamp, ids: &mut IdSequence) {
        let distrusted: Vec<NodeId> = self
            .members_except_owner()
            .into_iter()
            .filter(|&m| trust.trust_of(m) < self.admission_trust)
            .filter(|m| !self.removal_requested.contains_key(m))
            .collect();
        for member in distrusted {
            self.removal_requested.insert(member, now);
            self.remove_member(member);
            self.broadcast(member, CommunityMessageKind::RemoveRequest, None, None, now, ids);
        }
    }

    fn remove_member(&mut self, member: NodeId) {
        if member == self.owner {
            return;
        }
        if self.leader_community.remove(&member).is_some() {
            debug!(node = self.owner, member, "leader community removed member");
        }
        self.proposals.remove(&member);
        self.proposals.retain(|_, p| p.candidate != member);
        if self.leader_node_id == member {
            self.leader_node_id = self.owner;
            self.leader_score = 0.0;
        }
    }

    // -------------------------------------------------------------------------
    // Message handling
    // -------------------------------------------------------------------------

    /// Handle or relay every message in the peer's outbox not seen before.
    pub fn process_messages<'a>(
        &mut self,
        messages: impl Iterator<Item = &'a CommunityMessage>,
        trust: &dyn TrustView,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> (usize, usize, bool) {
        let mut handled = 0;
        let mut relayed = 0;
        let mut changed = false;
        for message in messages {
            if self.seen.is_expired(message.timestamp, now)
                || !self.seen.first_sight(message.id, message.timestamp)
            {
                continue;
            }
            if message.destination_id == self.owner {
                changed |= self.handle(message, trust, now, ids);
                handled += 1;
            } else if message.source_id != self.owner {
                if let Some(copy) = message.relayed_by(self.owner) {
                    self.outbox.push(copy);
                    relayed += 1;
                } else {
                    trace!(node = self.owner, id = message.id, "hop budget exhausted");
                }
            }
        }
        (handled, relayed, changed)
    }

    fn handle(
        &mut self,
        message: &CommunityMessage,
        trust: &dyn TrustView,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> bool {
        let target = message.target_id;
        match message.kind {
            CommunityMessageKind::AddRequest => {
                if trust.trust_of(target) >= self.admission_trust {
                    self.send(
                        message.source_id,
                        target,
                        CommunityMessageKind::AddResponse,
                        None,
                        message.target_centrality,
                        now,
                        ids,
                    );
                }
                false
            }
            CommunityMessageKind::AddResponse => {
                let before = self.leader_node_id;
                self.record_response(target, message.source_id, trust, now, ids);
                before != self.leader_node_id
            }
            CommunityMessageKind::AddedNode => {
                if target != self.owner {
                    let centrality = message.target_centrality.unwrap_or(0.0);
                    self.leader_community.insert(target, centrality);
                }
                // the sender is a member of the community we now share
                self.leader_community.entry(message.source_id).or_insert(0.0);
                false
            }
            CommunityMessageKind::LeaderProposal => {
                let incoming = Proposal {
                    candidate: target,
                    score: message.score.unwrap_or(0.0),
                    timestamp: message.timestamp,
                };
                let newer = self
                    .proposals
                    .get(&message.source_id)
                    .map_or(true, |p| p.timestamp <= incoming.timestamp);
                if newer {
                    self.proposals.insert(message.source_id, incoming);
                }
                self.maybe_elect(now, ids)
            }
            CommunityMessageKind::LeaderElected => {
                if message.timestamp < self.last_election || target == self.leader_node_id {
                    return false;
                }
                self.leader_node_id = target;
                self.leader_score = message.score.unwrap_or(self.leader_score);
                self.last_election = message.timestamp;
                self.leader_changes += 1;
                debug!(node = self.owner, leader = target, "leader adopted from election");
                true
            }
            CommunityMessageKind::RemoveRequest => {
                if trust.trust_of(target) < self.admission_trust
                    && self.leader_community.contains_key(&target)
                {
                    let was_leader = self.leader_node_id == target;
                    self.remove_member(target);
                    self.broadcast(target, CommunityMessageKind::RemovedNode, None, None, now, ids);
                    return was_leader;
                }
                false
            }
            CommunityMessageKind::RemovedNode => {
                let was_leader = self.leader_node_id == target;
                self.remove_member(target);
                was_leader
            }
        }
    }
}

impl LeaderElecting for CommunityElection {
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
        self.outbox.prune(now);
        self.expire(now);
        self.leader_community
            .insert(self.owner, input.announced_centrality);

        let Some(peer) = peer.as_community() else {
            return report;
        };

        let (handled, relayed, changed) =
            self.process_messages(peer.outbox.iter(), input.trust, now, ctx.ids);
        report.handled = handled;
        report.relayed = relayed;
        report.leader_changed |= changed;

        self.request_removals(input.trust, now, ctx.ids);

        let mutual = input.local_community.contains(&input.peer_id)
            && input.peer_local_community.contains(&input.own_id);
        if mutual {
            let before = self.leader_node_id;
            self.request_merge(&peer.leader_community, input.trust, now, ctx.ids);
            report.leader_changed |= before != self.leader_node_id;
        }
        report
    }
}
