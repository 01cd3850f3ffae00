//! Bounded data memory and exchange history.
//!
//! Both structures enforce their capacity on every insert: the data memory
//! evicts its lowest-utility resident (oldest first on ties) or refuses the
//! newcomer, the exchange history forgets its oldest entries.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::message::Message;
use crate::types::{MessageId, NodeId};

/// Result of [`DataMemory::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Inserted after evicting the given resident.
    Evicted(MessageId),
    /// Already resident; nothing changed.
    Duplicate,
    /// Worth less than every resident of a full memory; dropped.
    Rejected,
}

impl InsertOutcome {
    pub fn stored(self) -> bool {
        matches!(self, InsertOutcome::Inserted | InsertOutcome::Evicted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Resident {
    message: Message,
    utility: f64,
}

/// Message store with capacity `M`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMemory {
    capacity: usize,
    messages: BTreeMap<MessageId, Resident>,
    evictions: u64,
}

impl DataMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: BTreeMap::new(),
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.contains_key(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id).map(|r| &r.message)
    }

    /// Messages in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values().map(|r| &r.message)
    }

    /// Total evictions over the memory's lifetime.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Insert `message` valued at `utility`, making room if full.
    pub fn insert(&mut self, message: Message, utility: f64) -> InsertOutcome {
        if self.messages.contains_key(&message.id) {
            return InsertOutcome::Duplicate;
        }
        if self.capacity == 0 {
            return InsertOutcome::Rejected;
        }

        let mut outcome = InsertOutcome::Inserted;
        if self.is_full() {
            let Some((victim, victim_utility, victim_created)) = self.lowest() else {
                return InsertOutcome::Rejected;
            };
            let newcomer_wins = utility
                .total_cmp(&victim_utility)
                .then(message.created_at.cmp(&victim_created))
                .is_gt();
            if !newcomer_wins {
                trace!(message = %message.id, "dropped: below every resident");
                return InsertOutcome::Rejected;
            }
            self.messages.remove(&victim);
            self.evictions += 1;
            trace!(evicted = %victim, message = %message.id, "memory full, evicted");
            outcome = InsertOutcome::Evicted(victim);
        }

        self.messages.insert(message.id, Resident { message, utility });
        outcome
    }

    /// Take one copy out of a resident's spreading budget. False when the
    /// message is absent or has no copies left.
    pub fn spend_copy(&mut self, id: MessageId) -> bool {
        match self.messages.get_mut(&id) {
            Some(resident) if resident.message.copies_remaining > 0 => {
                resident.message.copies_remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop a message regardless of its utility.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        self.messages.remove(&id).map(|r| r.message)
    }

    /// Resident with the lowest utility, oldest first on ties.
    fn lowest(&self) -> Option<(MessageId, f64, u64)> {
        self.messages
            .values()
            .min_by(|a, b| {
                a.utility
                    .total_cmp(&b.utility)
                    .then(a.message.created_at.cmp(&b.message.created_at))
                    .then(a.message.id.cmp(&b.message.id))
            })
            .map(|r| (r.message.id, r.utility, r.message.created_at))
    }
}

/// Recent `(peer, message)` transfers with capacity `H`, FIFO eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeHistory {
    capacity: usize,
    order: VecDeque<(NodeId, MessageId)>,
    index: HashSet<(NodeId, MessageId)>,
}

impl ExchangeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            index: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, peer: NodeId, message: MessageId) -> bool {
        self.index.contains(&(peer, message))
    }

    /// Record a transfer; returns false if it was already recorded.
    pub fn record(&mut self, peer: NodeId, message: MessageId) -> bool {
        if self.capacity == 0 || !self.index.insert((peer, message)) {
            return false;
        }
        self.order.push_back((peer, message));
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.index.remove(&old);
            }
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NodeId, MessageId)> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u64, created_at: u64) -> Message {
        Message::new(MessageId(id), 0, 1, created_at, 1)
    }

    #[test]
    fn test_full_memory_evicts_lowest_utility() {
        let mut memory = DataMemory::new(2);
        assert_eq!(memory.insert(msg(1, 0), 5.0), InsertOutcome::Inserted);
        assert_eq!(memory.insert(msg(2, 0), 3.0), InsertOutcome::Inserted);

        let outcome = memory.insert(msg(3, 0), 4.0);
        assert_eq!(outcome, InsertOutcome::Evicted(MessageId(2)));
        assert!(memory.contains(MessageId(1)));
        assert!(memory.contains(MessageId(3)));
        assert!(!memory.contains(MessageId(2)));
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.evictions(), 1);
    }

    #[test]
    fn test_newcomer_below_all_residents_is_dropped() {
        let mut memory = DataMemory::new(2);
        memory.insert(msg(1, 0), 5.0);
        memory.insert(msg(2, 0), 3.0);
        assert_eq!(memory.insert(msg(3, 0), 1.0), InsertOutcome::Rejected);
        assert!(!memory.contains(MessageId(3)));
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn test_equal_utility_evicts_oldest() {
        let mut memory = DataMemory::new(2);
        memory.insert(msg(1, 100), 1.0);
        memory.insert(msg(2, 50), 1.0);
        assert_eq!(
            memory.insert(msg(3, 200), 1.0),
            InsertOutcome::Evicted(MessageId(2))
        );
        // an even older newcomer loses the tie
        assert_eq!(memory.insert(msg(4, 10), 1.0), InsertOutcome::Rejected);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut memory = DataMemory::new(1);
        memory.insert(msg(1, 0), 1.0);
        assert_eq!(memory.insert(msg(1, 0), 9.0), InsertOutcome::Duplicate);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_spend_copy_stops_at_zero() {
        let mut memory = DataMemory::new(2);
        memory.insert(msg(1, 0), 1.0);
        assert!(memory.spend_copy(MessageId(1)));
        assert!(!memory.spend_copy(MessageId(1)));
        assert!(!memory.spend_copy(MessageId(5)));
        assert_eq!(memory.get(MessageId(1)).map(|m| m.copies_remaining), Some(0));
    }

    #[test]
    fn test_history_forgets_oldest() {
        let mut history = ExchangeHistory::new(2);
        assert!(history.record(1, MessageId(1)));
        assert!(history.record(1, MessageId(2)));
        assert!(!history.record(1, MessageId(2)));
        assert!(history.record(2, MessageId(1)));
        assert_eq!(history.len(), 2);
        assert!(!history.contains(1, MessageId(1)));
        assert!(history.contains(1, MessageId(2)));
        assert!(history.contains(2, MessageId(1)));
    }
}
