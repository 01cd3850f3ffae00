//! Leader Election Engine
//!
//! Two gossip-propagated variants share the relay machinery in this module:
//!
//! - [`direct`]: flooded candidacies, point-to-point heartbeats;
//! - [`community`]: quorum-confirmed leader community, averaged proposals.
//!
//! Protocol messages travel by being copied out of a peer's outbox during an
//! exchange. Every node keeps a seen-set of message ids, so a message that
//! reaches it along several relay paths is handled exactly once.

pub mod community;
pub mod direct;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::trust::TrustView;
use crate::types::{ExchangeContext, NodeId, Timestamp};

pub use community::{CommunityElection, CommunityMessage, CommunityMessageKind};
pub use direct::{DirectElection, HeartbeatKind, LeaderCandidacy, LeaderMessage};

// =============================================================================
// Capability interface
// =============================================================================

/// What the election engines need to know about the exchanging pair.
pub struct ElectionInput<'a> {
    pub own_id: NodeId,
    /// Centrality this node announces (inflated for malicious nodes).
    pub announced_centrality: f64,
    pub local_community: &'a BTreeSet<NodeId>,
    pub peer_id: NodeId,
    pub peer_local_community: &'a BTreeSet<NodeId>,
    pub trust: &'a dyn TrustView,
}

/// Outcome of one election exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElectionReport {
    pub leader_changed: bool,
    /// Messages addressed to this node and handled.
    pub handled: usize,
    /// Messages copied into this node's outbox for further relay.
    pub relayed: usize,
}

/// A node able to elect a leader.
pub trait LeaderElecting {
    fn leader(&self) -> NodeId;

    fn leader_score(&self) -> f64;

    /// Members of the node's leader community, in id order.
    fn leader_community_members(&self) -> Vec<NodeId>;

    /// Run one exchange step against the peer's election state.
    fn exchange(
        &mut self,
        input: &ElectionInput<'_>,
        peer: &Election,
        ctx: &mut ExchangeContext<'_>,
    ) -> ElectionReport;
}

/// Election state of a node, one variant per protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Election {
    Direct(DirectElection),
    Community(CommunityElection),
}

impl Election {
    pub fn as_direct(&self) -> Option<&DirectElection> {
        match self {
            Election::Direct(d) => Some(d),
            Election::Community(_) => None,
        }
    }

    pub fn as_community(&self) -> Option<&CommunityElection> {
        match self {
            Election::Community(c) => Some(c),
            Election::Direct(_) => None,
        }
    }
}

impl LeaderElecting for Election {
    fn leader(&self) -> NodeId {
        match self {
            Election::Direct(d) => d.leader(),
            Election::Community(c) => c.leader(),
        }
    }

    fn leader_score(&self) -> f64 {
        match self {
            Election::Direct(d) => d.leader_score(),
            Election::Community(c) => c.leader_score(),
        }
    }

    fn leader_community_members(&self) -> Vec<NodeId> {
        match self {
            Election::Direct(d) => d.leader_community_members(),
            Election::Community(c) => c.leader_community_members(),
        }
    }

    fn exchange(
        &mut self,
        input: &ElectionInput<'_>,
        peer: &Election,
        ctx: &mut ExchangeContext<'_>,
    ) -> ElectionReport {
        match self {
            Election::Direct(d) => d.exchange(input, peer, ctx),
            Election::Community(c) => c.exchange(input, peer, ctx),
        }
    }
}

// =============================================================================
// Relay machinery
// =============================================================================

/// Protocol message that can sit in an outbox.
pub trait Relayable: Clone {
    fn id(&self) -> u64;
    fn timestamp(&self) -> Timestamp;
    fn hop_count_per_node(&self) -> &BTreeMap<NodeId, u32>;
    fn hop_count_per_node_mut(&mut self) -> &mut BTreeMap<NodeId, u32>;

    /// Hops travelled so far.
    fn hops(&self) -> u32 {
        self.hop_count_per_node().values().copied().max().unwrap_or(0)
    }

    /// Stamp the relay hop of `node`.
    fn transfer(&mut self, node: NodeId) {
        let hop = self.hops() + 1;
        self.hop_count_per_node_mut().insert(node, hop);
    }
}

/// Bounded outbox of protocol messages offered to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbox<M> {
    capacity: usize,
    lifetime: u64,
    messages: VecDeque<M>,
}

impl<M: Relayable> Outbox<M> {
    pub fn new(capacity: usize, lifetime: u64) -> Self {
        Self {
            capacity,
            lifetime,
            messages: VecDeque::new(),
        }
    }

    /// Queue a message, dropping the oldest when over capacity.
    pub fn push(&mut self, message: M) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Drop messages older than the lifetime.
    pub fn prune(&mut self, now: Timestamp) {
        let lifetime = self.lifetime;
        self.messages
            .retain(|m| now.saturating_sub(m.timestamp()) <= lifetime);
    }

    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Ids of protocol messages a node has already handled or relayed.
///
/// An id is remembered for the relay lifetime of its message. Older
/// messages are refused outright, so forgetting their ids is safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenSet {
    lifetime: u64,
    /// Id -> timestamp of the message.
    ids: HashMap<u64, Timestamp>,
}

impl SeenSet {
    pub fn new(lifetime: u64) -> Self {
        Self {
            lifetime,
            ids: HashMap::new(),
        }
    }

    /// Mark `id` as seen; returns true the first time.
    pub fn first_sight(&mut self, id: u64, timestamp: Timestamp) -> bool {
        match self.ids.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(timestamp);
                true
            }
        }
    }

    /// Whether a message stamped `timestamp` is past its relay lifetime.
    pub fn is_expired(&self, timestamp: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(timestamp) > self.lifetime
    }

    /// Forget ids of messages past their relay lifetime.
    pub fn prune(&mut self, now: Timestamp) {
        let lifetime = self.lifetime;
        self.ids
            .retain(|_, &mut timestamp| now.saturating_sub(timestamp) <= lifetime);
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Pick the highest score, lowest node id on ties.
pub(crate) fn best_by_score(scores: impl Iterator<Item = (NodeId, f64)>) -> Option<(NodeId, f64)> {
    scores.fold(None, |best, (id, score)| match best {
        Some((best_id, best_score)) if score < best_score || (score == best_score && id > best_id) => {
            Some((best_id, best_score))
        }
        _ => Some((id, score)),
    })
}
