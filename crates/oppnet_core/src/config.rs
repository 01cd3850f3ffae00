//! Protocol configuration shared by every node of a run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::HOUR_MS;

/// How application data moves between carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    /// Flood: every encountered node takes every message.
    #[default]
    Dissemination,
    /// Utility-guided multi-copy forwarding.
    Routing,
}

/// Which leader election protocol runs on top of the community engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ElectionMode {
    #[default]
    None,
    /// Flooded candidacies plus point-to-point heartbeats.
    Direct,
    /// Quorum-confirmed leader community plus averaged proposals.
    Community,
}

/// Centrality formula (see [`crate::community::CentralityStrategy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CentralityKind {
    /// Total contact time divided by elapsed time.
    #[default]
    ContactRatio,
    /// Mean distinct encounters per hourly bucket over a sliding window.
    EncounterWindow,
    /// Size of the familiar set.
    Degree,
}

/// Forwarding utility used in routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForwardingKind {
    /// Community membership of the destination first, centrality second.
    #[default]
    Social,
    /// Plain centrality comparison.
    Centrality,
}

/// Utility used to pick eviction victims in a full data memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionKind {
    /// Newer messages are worth more.
    #[default]
    Freshness,
    /// Messages on topics the carrier cares about are worth more.
    Interest,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroCapacity { name: &'static str },
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("community_k must be at least 2, got {0}")]
    CliqueTooSmall(usize),
}

/// Protocol parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Capacity of the data memory (messages).
    pub data_memory_size: usize,
    /// Capacity of the exchange history (peer, message) pairs.
    pub exchange_history_size: usize,
    /// Flood TTL for candidacies and community messages.
    pub community_max_hop: u32,
    /// Period between candidacy / heartbeat generations (ms).
    pub heartbeat_generation_time: u64,
    /// Fraction of the leader community whose confirmation admits a node.
    pub leader_community_threshold: f64,
    /// Fraction of the leader community whose proposals trigger an election.
    pub leader_proposals_threshold: f64,
    /// Cumulative contact time that makes a peer familiar (ms).
    pub familiar_threshold: u64,
    /// Clique size `k` of the K-clique community rules.
    pub community_k: usize,
    /// Copies a freshly generated message may spread in routing mode.
    pub initial_copies: u32,
    /// Outbox capacity for relayed protocol messages.
    pub relay_buffer_size: usize,
    /// Age after which a relayed protocol message is dropped (ms).
    pub relay_lifetime: u64,
    /// Perceived trust below which a node is refused or expelled.
    pub admission_trust_threshold: f64,
    /// Sliding window for [`CentralityKind::EncounterWindow`] (hours).
    pub encounter_window_hours: u64,
    pub exchange_mode: ExchangeMode,
    pub election: ElectionMode,
    /// Whether malevolence opinions are collected and gossiped.
    pub trust_enabled: bool,
    pub centrality: CentralityKind,
    pub forwarding: ForwardingKind,
    pub retention: RetentionKind,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_memory_size: 4500,
            exchange_history_size: 100,
            community_max_hop: 10,
            heartbeat_generation_time: HOUR_MS,
            leader_community_threshold: 0.5,
            leader_proposals_threshold: 0.5,
            familiar_threshold: 20 * 60 * 1000,
            community_k: 3,
            initial_copies: 8,
            relay_buffer_size: 512,
            relay_lifetime: 6 * HOUR_MS,
            admission_trust_threshold: 0.5,
            encounter_window_hours: 6,
            exchange_mode: ExchangeMode::Dissemination,
            election: ElectionMode::None,
            trust_enabled: false,
            centrality: CentralityKind::ContactRatio,
            forwarding: ForwardingKind::Social,
            retention: RetentionKind::Freshness,
        }
    }
}

impl NodeConfig {
    /// Check every bound the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_memory_size == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "data_memory_size",
            });
        }
        if self.exchange_history_size == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "exchange_history_size",
            });
        }
        if self.relay_buffer_size == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "relay_buffer_size",
            });
        }
        if self.heartbeat_generation_time == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "heartbeat_generation_time",
            });
        }
        if self.encounter_window_hours == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "encounter_window_hours",
            });
        }
        for (name, value) in [
            ("leader_community_threshold", self.leader_community_threshold),
            ("leader_proposals_threshold", self.leader_proposals_threshold),
            ("admission_trust_threshold", self.admission_trust_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.community_k < 2 {
            return Err(ConfigError::CliqueTooSmall(self.community_k));
        }
        Ok(())
    }

    pub fn with_exchange_mode(mut self, mode: ExchangeMode) -> Self {
        self.exchange_mode = mode;
        self
    }

    pub fn with_election(mut self, election: ElectionMode) -> Self {
        self.election = election;
        self
    }

    pub fn with_trust(mut self, enabled: bool) -> Self {
        self.trust_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert_eq!(config.data_memory_size, 4500);
        assert_eq!(config.exchange_history_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_memory_rejected() {
        let config = NodeConfig {
            data_memory_size: 0,
            ..NodeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity {
                name: "data_memory_size"
            })
        );
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = NodeConfig {
            leader_proposals_threshold: 1.5,
            ..NodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                name: "leader_proposals_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"election": "direct", "exchange_mode": "routing"}"#)
                .expect("valid json");
        assert_eq!(config.election, ElectionMode::Direct);
        assert_eq!(config.exchange_mode, ExchangeMode::Routing);
        assert_eq!(config.community_max_hop, 10);
    }
}
