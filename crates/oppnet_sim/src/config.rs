//! Simulation configuration and loading errors.

use std::fs;
use std::path::Path;

use oppnet_core::{ConfigError, NodeConfig, NodeId, HOUR_MS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::TraceError;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid trace: {0}")]
    Trace(#[from] TraceError),
    #[error("configuration names node {node}, trace has {nodes} nodes")]
    UnknownNode { node: NodeId, nodes: usize },
}

/// Parameters of the optional linear battery model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Operating time on a full charge (ms).
    pub capacity: u64,
    /// Time a depleted node spends recharging (ms).
    pub recharge_time: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity: 12 * HOUR_MS,
            recharge_time: 2 * HOUR_MS,
        }
    }
}

/// Everything one run needs besides the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the run's ChaCha8 generator.
    pub seed: u64,
    /// Messages each node creates per generation day.
    pub messages_per_node: usize,
    /// Number of days on which messages are generated; `None` for every day.
    pub max_generation_days: Option<u32>,
    /// Drive the battery hook every tick.
    pub battery_computation: bool,
    pub battery: BatteryConfig,
    /// Nodes that tamper with data and inflate their candidacies.
    pub malicious_nodes: Vec<NodeId>,
    pub node: NodeConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            messages_per_node: 1,
            max_generation_days: Some(2),
            battery_computation: false,
            battery: BatteryConfig::default(),
            malicious_nodes: Vec::new(),
            node: NodeConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let config: SimulationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.validate()?;
        if self.battery_computation && self.battery.capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "battery.capacity",
            });
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }
}
