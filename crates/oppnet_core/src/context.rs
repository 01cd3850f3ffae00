//! Per-node social context: interest topics and the declared friendship prior.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Timestamp};

/// Interest topic identifier.
pub type TopicId = u32;

/// Interest topics of one node, each with the time it was acquired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestContext {
    topics: BTreeMap<TopicId, Timestamp>,
}

impl InterestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest in `topic`. An earlier acquisition time is kept.
    pub fn add_topic(&mut self, topic: TopicId, acquired_at: Timestamp) {
        self.topics
            .entry(topic)
            .and_modify(|t| *t = (*t).min(acquired_at))
            .or_insert(acquired_at);
    }

    /// Whether the node is interested in `topic` at time `now`.
    pub fn has_topic(&self, topic: TopicId, now: Timestamp) -> bool {
        self.topics.get(&topic).is_some_and(|&t| t <= now)
    }

    /// Topics shared with `other` that both nodes had acquired by `now`.
    pub fn common_topics(&self, other: &InterestContext, now: Timestamp) -> usize {
        self.topics
            .iter()
            .filter(|(&topic, &t)| t <= now && other.has_topic(topic, now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TopicId, Timestamp)> + '_ {
        self.topics.iter().map(|(&k, &v)| (k, v))
    }
}

impl FromIterator<(TopicId, Timestamp)> for InterestContext {
    fn from_iter<I: IntoIterator<Item = (TopicId, Timestamp)>>(iter: I) -> Self {
        let mut ctx = InterestContext::new();
        for (topic, at) in iter {
            ctx.add_topic(topic, at);
        }
        ctx
    }
}

/// Declared friendship row of one node: `row[j]` is true when `j` is a friend.
///
/// Immutable after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialNetwork {
    row: Vec<bool>,
}

impl SocialNetwork {
    pub fn new(row: Vec<bool>) -> Self {
        Self { row }
    }

    /// A row with no friends for a network of `nodes` nodes.
    pub fn empty(nodes: usize) -> Self {
        Self {
            row: vec![false; nodes],
        }
    }

    pub fn is_friend(&self, peer: NodeId) -> bool {
        self.row.get(peer).copied().unwrap_or(false)
    }

    pub fn friend_count(&self) -> usize {
        self.row.iter().filter(|&&f| f).count()
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_respect_acquisition_time() {
        let ctx: InterestContext = [(1, 100), (2, 500)].into_iter().collect();
        assert!(ctx.has_topic(1, 100));
        assert!(!ctx.has_topic(2, 499));
        assert!(ctx.has_topic(2, 500));
    }

    #[test]
    fn test_common_topics() {
        let a: InterestContext = [(1, 0), (2, 0), (3, 1000)].into_iter().collect();
        let b: InterestContext = [(2, 0), (3, 0), (4, 0)].into_iter().collect();
        assert_eq!(a.common_topics(&b, 0), 1);
        assert_eq!(a.common_topics(&b, 1000), 2);
    }

    #[test]
    fn test_social_network_out_of_range_is_not_friend() {
        let row = SocialNetwork::new(vec![false, true]);
        assert!(row.is_friend(1));
        assert!(!row.is_friend(7));
        assert_eq!(row.friend_count(), 1);
    }
}
