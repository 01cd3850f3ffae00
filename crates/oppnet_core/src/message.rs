//! Application messages carried through the network.

use serde::{Deserialize, Serialize};

use crate::context::TopicId;
use crate::types::{MessageId, NodeId, Timestamp};

/// One carrier's copy of an application message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub source: NodeId,
    pub destination: NodeId,
    /// Interest topic the message is about, if any.
    pub topic: Option<TopicId>,
    pub payload: Vec<u8>,
    pub created_at: Timestamp,
    /// Further carriers this copy may still be handed to (routing mode).
    pub copies_remaining: u32,
    /// Relays this copy went through since the source.
    pub hops: u32,
    /// Set once any carrier on the path tampered with the copy.
    pub corrupted: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        source: NodeId,
        destination: NodeId,
        created_at: Timestamp,
        copies: u32,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            topic: None,
            payload: Vec::new(),
            created_at,
            copies_remaining: copies,
            hops: 0,
            corrupted: false,
        }
    }

    pub fn with_topic(mut self, topic: TopicId) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Whether this copy may be handed to a carrier other than the destination.
    pub fn can_spread(&self) -> bool {
        self.copies_remaining > 0
    }

    /// The copy a new carrier receives.
    pub(crate) fn handed_over(&self, spend_copy: bool, tamper: bool) -> Self {
        let mut copy = self.clone();
        copy.hops += 1;
        if spend_copy {
            copy.copies_remaining = copy.copies_remaining.saturating_sub(1);
        }
        copy.corrupted |= tamper;
        copy
    }
}

/// Arrival of a message at its destination, reported once per destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message: MessageId,
    pub destination: NodeId,
    /// Node the destination received it from.
    pub from: NodeId,
    pub at: Timestamp,
    pub hops: u32,
    pub corrupted: bool,
}
