//! Trust / Malevolence Engine
//!
//! Each node keeps two opinion stores:
//! - first-hand judgments it made itself, one per message id and target;
//! - every opinion it has collected about each target, its own averaged
//!   judgment included, keyed by the opinion's source.
//!
//! The perceived trust of a target is the average of the collected
//! opinions. A target nobody has judged is fully trusted (1.0).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{MessageId, NodeId, Timestamp};

/// Trust assumed for a node without any recorded opinion.
pub const DEFAULT_TRUST: f64 = 1.0;

/// Read access to perceived trust, consumed by the election scoring.
pub trait TrustView {
    fn trust_of(&self, node: NodeId) -> f64;
}

/// Trust view used when the trust engine is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullTrust;

impl TrustView for FullTrust {
    fn trust_of(&self, _node: NodeId) -> f64 {
        DEFAULT_TRUST
    }
}

/// One first-hand judgment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OwnOpinion {
    pub message_id: MessageId,
    pub value: f64,
    pub timestamp: Timestamp,
}

/// An opinion about a target as replicated through gossip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MalevolenceOpinion {
    pub source_id: NodeId,
    pub value: f64,
    pub timestamp: Timestamp,
}

/// All opinions a node has collected about one target.
///
/// Holds at most one opinion per source, the newest by timestamp; an
/// opinion with the same `(source, timestamp)` as the stored one is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MalevolenceOpinionList {
    by_source: BTreeMap<NodeId, MalevolenceOpinion>,
}

impl MalevolenceOpinionList {
    /// Merge one opinion; returns true if the list changed.
    pub fn add(&mut self, opinion: MalevolenceOpinion) -> bool {
        match self.by_source.get(&opinion.source_id) {
            Some(existing) if existing.timestamp >= opinion.timestamp => false,
            _ => {
                self.by_source.insert(opinion.source_id, opinion);
                true
            }
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.by_source.is_empty() {
            return None;
        }
        let sum: f64 = self.by_source.values().map(|o| o.value).sum();
        Some(sum / self.by_source.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MalevolenceOpinion> {
        self.by_source.values()
    }
}

/// Per-node reputation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEngine {
    owner: NodeId,
    own_opinions: BTreeMap<NodeId, Vec<OwnOpinion>>,
    all_opinions: BTreeMap<NodeId, MalevolenceOpinionList>,
}

impl TrustEngine {
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            own_opinions: BTreeMap::new(),
            all_opinions: BTreeMap::new(),
        }
    }

    /// Record a first-hand judgment of `target` backed by `message_id`.
    ///
    /// A message id is counted once per target. The node's averaged
    /// first-hand opinion is republished under its own identity.
    pub fn set_own_opinion(
        &mut self,
        target: NodeId,
        message_id: MessageId,
        value: f64,
        now: Timestamp,
    ) -> bool {
        let opinions = self.own_opinions.entry(target).or_default();
        if opinions.iter().any(|o| o.message_id == message_id) {
            return false;
        }
        opinions.push(OwnOpinion {
            message_id,
            value: value.clamp(0.0, 1.0),
            timestamp: now,
        });
        let average = opinions.iter().map(|o| o.value).sum::<f64>() / opinions.len() as f64;

        let list = self.all_opinions.entry(target).or_default();
        // republish even when an opinion with this timestamp already exists
        list.by_source.insert(
            self.owner,
            MalevolenceOpinion {
                source_id: self.owner,
                value: average,
                timestamp: now,
            },
        );
        trace!(node = self.owner, target, value, average, "own opinion recorded");
        true
    }

    /// Average of all collected opinions about `target`, 1.0 when none exist.
    pub fn get_value(&self, target: NodeId) -> f64 {
        self.all_opinions
            .get(&target)
            .and_then(MalevolenceOpinionList::average)
            .unwrap_or(DEFAULT_TRUST)
    }

    /// Merge every opinion from a peer's collected store.
    ///
    /// Opinions sourced by this node are skipped: its own view is authoritative.
    pub fn exchange(&mut self, peer_opinions: &BTreeMap<NodeId, MalevolenceOpinionList>) -> usize {
        let mut merged = 0;
        for (&target, list) in peer_opinions {
            for opinion in list.iter() {
                if opinion.source_id == self.owner {
                    continue;
                }
                if self.all_opinions.entry(target).or_default().add(*opinion) {
                    merged += 1;
                }
            }
        }
        merged
    }

    pub fn all_opinions(&self) -> &BTreeMap<NodeId, MalevolenceOpinionList> {
        &self.all_opinions
    }

    pub fn own_opinions(&self, target: NodeId) -> &[OwnOpinion] {
        self.own_opinions
            .get(&target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Targets whose perceived trust is below `threshold`.
    pub fn distrusted(&self, threshold: f64) -> Vec<NodeId> {
        self.all_opinions
            .keys()
            .copied()
            .filter(|&t| self.get_value(t) < threshold)
            .collect()
    }
}

impl TrustView for TrustEngine {
    fn trust_of(&self, node: NodeId) -> f64 {
        self.get_value(node)
    }
}
