//! Node Protocol Engine
//!
//! A [`Node`] owns its whole protocol state. One contact exchange mutates
//! only the observing node and reads a snapshot of the observed peer, in
//! this order:
//!
//! 1. community and centrality update;
//! 2. data pull (dissemination or routing);
//! 3. leader election step, if the node elects;
//! 4. opinion gossip, if the node keeps a trust engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::community::CommunityState;
use crate::config::{ElectionMode, ExchangeMode, NodeConfig};
use crate::context::{InterestContext, SocialNetwork, TopicId};
use crate::election::{
    CommunityElection, DirectElection, Election, ElectionInput, ElectionReport, LeaderElecting,
};
use crate::memory::{DataMemory, ExchangeHistory, InsertOutcome};
use crate::message::{Delivery, Message};
use crate::routing::{ForwardingUtility, RetentionPolicy};
use crate::trust::{FullTrust, TrustEngine, TrustView};
use crate::types::{ExchangeContext, IdSequence, MessageId, NodeId, Timestamp};

/// Centrality a malicious node adds on top of its real value when it
/// announces a candidacy.
pub const MALICIOUS_CENTRALITY_BOOST: f64 = 1.0;

// =============================================================================
// Capabilities
// =============================================================================

/// Read access to the social view of a node.
pub trait CommunityAware {
    fn familiar_set(&self) -> &BTreeSet<NodeId>;
    fn local_community(&self) -> &BTreeSet<NodeId>;
    fn centrality(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    #[default]
    Honest,
    /// Corrupts every copy it hands over and inflates its announced centrality.
    Malicious,
}

// =============================================================================
// Exchange report
// =============================================================================

/// What one contact-start exchange did to the observer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeReport {
    /// Messages copied into the observer's data memory.
    pub pulled: Vec<MessageId>,
    /// First arrivals at this node as destination.
    pub deliveries: Vec<Delivery>,
    /// Copies that reached this node after it already had the message.
    pub duplicate_deliveries: usize,
    pub evicted: Vec<MessageId>,
    /// Copies dropped because the memory held only better messages.
    pub rejected: usize,
    /// Routing copies taken out of the peer's spreading budget, to be settled
    /// on the peer with [`Node::settle_handovers`].
    pub spent: Vec<MessageId>,
    pub opinions_merged: usize,
    pub election: Option<ElectionReport>,
}

// =============================================================================
// Node
// =============================================================================

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    config: Arc<NodeConfig>,
    behavior: Behavior,
    context: InterestContext,
    social: SocialNetwork,
    community: CommunityState,
    memory: DataMemory,
    history: ExchangeHistory,
    /// Messages that reached this node as their destination.
    delivered: BTreeMap<MessageId, Delivery>,
    election: Option<Election>,
    trust: Option<TrustEngine>,
}

impl Node {
    pub fn new(id: NodeId, config: Arc<NodeConfig>) -> Self {
        let community = CommunityState::new(
            id,
            config.familiar_threshold,
            config.community_k,
            config.encounter_window_hours,
            config.centrality,
        );
        let election = match config.election {
            ElectionMode::None => None,
            ElectionMode::Direct => Some(Election::Direct(DirectElection::new(id, &config))),
            ElectionMode::Community => {
                Some(Election::Community(CommunityElection::new(id, &config)))
            }
        };
        let trust = config.trust_enabled.then(|| TrustEngine::new(id));
        Self {
            id,
            behavior: Behavior::Honest,
            context: InterestContext::new(),
            social: SocialNetwork::default(),
            community,
            memory: DataMemory::new(config.data_memory_size),
            history: ExchangeHistory::new(config.exchange_history_size),
            delivered: BTreeMap::new(),
            election,
            trust,
            config,
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_context(mut self, context: InterestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_social_network(mut self, social: SocialNetwork) -> Self {
        self.social = social;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn context(&self) -> &InterestContext {
        &self.context
    }

    pub fn social_network(&self) -> &SocialNetwork {
        &self.social
    }

    pub fn community(&self) -> &CommunityState {
        &self.community
    }

    pub fn memory(&self) -> &DataMemory {
        &self.memory
    }

    pub fn history(&self) -> &ExchangeHistory {
        &self.history
    }

    /// Deliveries received as destination, one per message id.
    pub fn deliveries(&self) -> impl Iterator<Item = &Delivery> {
        self.delivered.values()
    }

    pub fn has_received(&self, message: MessageId) -> bool {
        self.delivered.contains_key(&message)
    }

    pub fn election(&self) -> Option<&Election> {
        self.election.as_ref()
    }

    pub fn trust(&self) -> Option<&TrustEngine> {
        self.trust.as_ref()
    }

    pub fn as_community_aware(&self) -> &dyn CommunityAware {
        &self.community
    }

    pub fn as_leader_electing(&self) -> Option<&dyn LeaderElecting> {
        self.election.as_ref().map(|e| e as &dyn LeaderElecting)
    }

    pub fn as_trust_aware(&self) -> Option<&dyn TrustView> {
        self.trust.as_ref().map(|t| t as &dyn TrustView)
    }

    /// Perceived trust, [`FullTrust`] when the engine is disabled.
    pub fn trust_view(&self) -> &dyn TrustView {
        match &self.trust {
            Some(engine) => engine,
            None => &FullTrust,
        }
    }

    /// Current leader, if the node runs an election protocol.
    pub fn leader(&self) -> Option<NodeId> {
        self.as_leader_electing().map(|e| e.leader())
    }

    /// Centrality the node puts in its candidacies.
    pub fn announced_centrality(&self) -> f64 {
        match self.behavior {
            Behavior::Honest => self.community.centrality(),
            Behavior::Malicious => self.community.centrality() + MALICIOUS_CENTRALITY_BOOST,
        }
    }

    // -------------------------------------------------------------------------
    // Message creation
    // -------------------------------------------------------------------------

    /// Create a message at this node and store it directly in its memory.
    ///
    /// Returns `None` when `destination` is the node itself.
    pub fn create_message(
        &mut self,
        destination: NodeId,
        topic: Option<TopicId>,
        now: Timestamp,
        ids: &mut IdSequence,
    ) -> Option<Message> {
        if destination == self.id {
            return None;
        }
        let mut message = Message::new(
            ids.next_message_id(),
            self.id,
            destination,
            now,
            self.config.initial_copies,
        );
        message.topic = topic;
        self.insert_own_message(message.clone(), now);
        Some(message)
    }

    /// Store a self-generated message without going through an exchange.
    pub fn insert_own_message(&mut self, message: Message, now: Timestamp) -> InsertOutcome {
        let utility = self.config.retention.retention(&message, &self.context, now);
        let outcome = self.memory.insert(message, utility);
        if let InsertOutcome::Evicted(victim) = outcome {
            debug!(node = self.id, evicted = %victim, "own message evicted a resident");
        }
        outcome
    }

    // -------------------------------------------------------------------------
    // Contact hooks
    // -------------------------------------------------------------------------

    /// Per-tick update for an active contact with `peer`.
    pub fn on_contact_tick(&mut self, peer: NodeId, dt: u64, elapsed: u64) {
        self.community.update_contact_duration(peer, dt);
        self.community.check_threshold(peer);
        self.community.update_centrality(elapsed);
    }

    /// Full exchange at the start of a contact with `peer`.
    pub fn on_contact_start(
        &mut self,
        peer: &Node,
        contact_duration: u64,
        ctx: &mut ExchangeContext<'_>,
    ) -> ExchangeReport {
        self.community
            .on_contact_start(peer.id, &peer.community, contact_duration, ctx.now);
        self.community.update_centrality(ctx.elapsed);

        let mut report = self.exchange_data(peer, ctx.now);

        let announced = self.announced_centrality();
        if let (Some(election), Some(peer_election)) =
            (self.election.as_mut(), peer.election.as_ref())
        {
            let trust: &dyn TrustView = match &self.trust {
                Some(engine) => engine,
                None => &FullTrust,
            };
            let input = ElectionInput {
                own_id: self.id,
                announced_centrality: announced,
                local_community: self.community.local_community(),
                peer_id: peer.id,
                peer_local_community: peer.community.local_community(),
                trust,
            };
            let step = election.exchange(&input, peer_election, ctx);
            if step.leader_changed {
                debug!(node = self.id, leader = election.leader(), "leader changed");
            }
            report.election = Some(step);
        }

        if let (Some(engine), Some(peer_engine)) = (self.trust.as_mut(), peer.trust.as_ref()) {
            report.opinions_merged = engine.exchange(peer_engine.all_opinions());
        }
        report
    }

    /// Pull from the peer's data memory what this node should carry or receive.
    pub fn exchange_data(&mut self, peer: &Node, now: Timestamp) -> ExchangeReport {
        let mut report = ExchangeReport::default();

        // transfers the peer already recorded with us
        for &(other, message) in peer.history.iter() {
            if other == self.id {
                self.history.record(peer.id, message);
            }
        }

        let routing = self.config.exchange_mode == ExchangeMode::Routing;
        let tamper = peer.behavior == Behavior::Malicious;

        for message in peer.memory.iter() {
            if message.source == self.id
                || self.memory.contains(message.id)
                || self.history.contains(peer.id, message.id)
            {
                continue;
            }

            if message.destination == self.id {
                let copy = message.handed_over(false, tamper);
                self.judge(peer.id, message, &copy, now);
                self.history.record(peer.id, copy.id);
                if self.delivered.contains_key(&copy.id) {
                    report.duplicate_deliveries += 1;
                    trace!(node = self.id, message = %copy.id, "duplicate delivery discarded");
                    continue;
                }
                let delivery = Delivery {
                    message: copy.id,
                    destination: self.id,
                    from: peer.id,
                    at: now,
                    hops: copy.hops,
                    corrupted: copy.corrupted,
                };
                self.delivered.insert(copy.id, delivery);
                report.deliveries.push(delivery);
                continue;
            }

            if self.delivered.contains_key(&message.id) {
                continue;
            }
            if routing && !self.should_carry(peer, message) {
                continue;
            }

            let copy = message.handed_over(routing, tamper);
            self.judge(peer.id, message, &copy, now);
            let utility = self.config.retention.retention(&copy, &self.context, now);
            let id = copy.id;
            let outcome = self.memory.insert(copy, utility);
            match outcome {
                InsertOutcome::Inserted => report.pulled.push(id),
                InsertOutcome::Evicted(victim) => {
                    report.pulled.push(id);
                    report.evicted.push(victim);
                }
                InsertOutcome::Rejected => report.rejected += 1,
                InsertOutcome::Duplicate => {}
            }
            // a refused copy stays on offer for a later contact
            if outcome.stored() {
                self.history.record(peer.id, id);
                if routing {
                    report.spent.push(id);
                }
                trace!(node = self.id, peer = peer.id, message = %id, "message pulled");
            }
        }
        report
    }

    /// Pay for the routing copies `taker` pulled out of this node's memory.
    ///
    /// An exchange only mutates its observer, so the copies it took are
    /// reported in [`ExchangeReport::spent`] and settled here on the node it
    /// pulled from. Returns the number of copies actually spent.
    pub fn settle_handovers(&mut self, taker: NodeId, spent: &[MessageId]) -> usize {
        let mut settled = 0;
        for &id in spent {
            if self.memory.spend_copy(id) {
                settled += 1;
                trace!(node = self.id, taker, message = %id, "copy handed over");
            }
        }
        settled
    }

    /// Routing rule: spread only spare copies, and only to a better carrier.
    fn should_carry(&self, peer: &Node, message: &Message) -> bool {
        if !message.can_spread() {
            return false;
        }
        let forwarding = self.config.forwarding;
        let mine = forwarding.utility(&self.community, &self.social, message.destination);
        let theirs = forwarding.utility(&peer.community, &peer.social, message.destination);
        mine > theirs
    }

    /// First-hand opinion about the peer: it is blamed only for damage done
    /// on its own hop.
    fn judge(&mut self, peer: NodeId, held: &Message, copy: &Message, now: Timestamp) {
        if let Some(engine) = self.trust.as_mut() {
            let value = if copy.corrupted && !held.corrupted { 0.0 } else { 1.0 };
            engine.set_own_opinion(peer, copy.id, value, now);
        }
    }
}
