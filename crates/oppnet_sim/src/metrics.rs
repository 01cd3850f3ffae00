//! Run metrics and results.

use oppnet_core::{Delivery, Message, MessageId, Node, NodeId, Timestamp};
use serde::{Deserialize, Serialize};

/// Fate of one generated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub source: NodeId,
    pub destination: NodeId,
    pub created_at: Timestamp,
    pub delivered: bool,
    pub delivered_at: Option<Timestamp>,
    /// Hops of the copy that arrived first.
    pub hops: Option<u32>,
    /// Whether the copy that arrived first had been tampered with.
    pub corrupted: bool,
    /// Carriers that stored a copy, the source excluded.
    pub copies: usize,
}

impl MessageRecord {
    pub fn new(message: &Message) -> Self {
        Self {
            id: message.id,
            source: message.source,
            destination: message.destination,
            created_at: message.created_at,
            delivered: false,
            delivered_at: None,
            hops: None,
            corrupted: false,
            copies: 0,
        }
    }

    pub fn latency(&self) -> Option<u64> {
        self.delivered_at
            .map(|at| at.saturating_sub(self.created_at))
    }

    /// Record an arrival. Returns false if the message was already delivered.
    pub(crate) fn deliver(&mut self, delivery: &Delivery) -> bool {
        if self.delivered {
            return false;
        }
        self.delivered = true;
        self.delivered_at = Some(delivery.at);
        self.hops = Some(delivery.hops);
        self.corrupted = delivery.corrupted;
        true
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimMetrics {
    pub ticks: u64,
    pub contacts_started: u64,
    /// Exchanges skipped because the observer's battery was depleted.
    pub exchanges_skipped: u64,
    pub generation_days: u32,
    pub messages_generated: u64,
    pub deliveries: u64,
    /// Copies that reached a destination after the first one.
    pub duplicate_deliveries: u64,
    pub evictions: u64,
    pub rejected_copies: u64,
    pub leader_changes: u64,
    pub protocol_messages_handled: u64,
    pub protocol_messages_relayed: u64,
    pub opinions_merged: u64,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Everything a run hands back to statistics collectors.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub end_time: Timestamp,
    /// Generated messages in id order.
    pub messages: Vec<MessageRecord>,
    /// Final state of every node.
    pub nodes: Vec<Node>,
    pub metrics: SimMetrics,
}

impl SimulationOutput {
    /// Fraction of generated messages that reached their destination.
    pub fn hit_rate(&self) -> f64 {
        if self.messages.is_empty() {
            return 0.0;
        }
        let delivered = self.messages.iter().filter(|m| m.delivered).count();
        delivered as f64 / self.messages.len() as f64
    }

    /// Mean delivery latency over delivered messages.
    pub fn mean_latency(&self) -> Option<f64> {
        let latencies: Vec<u64> = self.messages.iter().filter_map(MessageRecord::latency).collect();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
    }

    /// Leader of each node, `None` for nodes without an election protocol.
    pub fn leaders(&self) -> Vec<Option<NodeId>> {
        self.nodes.iter().map(Node::leader).collect()
    }
}
