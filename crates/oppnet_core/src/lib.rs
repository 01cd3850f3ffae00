//! Per-node protocol engine for opportunistic network simulation.
//!
//! Every node owns its community view, a bounded data memory with an
//! exchange history, an optional leader election engine and an optional
//! trust engine. Exchanges are driven from outside (see `oppnet_sim`) and
//! mutate only the observing node.

pub mod community;
pub mod config;
pub mod context;
pub mod election;
pub mod memory;
pub mod message;
pub mod node;
pub mod routing;
pub mod trust;
pub mod types;

pub use community::{CentralityStrategy, CommunityState};
pub use config::{
    CentralityKind, ConfigError, ElectionMode, ExchangeMode, ForwardingKind, NodeConfig,
    RetentionKind,
};
pub use context::{InterestContext, SocialNetwork, TopicId};
pub use election::{Election, ElectionReport, LeaderElecting};
pub use memory::{DataMemory, ExchangeHistory, InsertOutcome};
pub use message::{Delivery, Message};
pub use node::{Behavior, CommunityAware, ExchangeReport, Node};
pub use routing::{ForwardingUtility, RetentionPolicy};
pub use trust::{FullTrust, TrustEngine, TrustView};
pub use types::{ExchangeContext, IdSequence, MessageId, NodeId, Timestamp, DAY_MS, HOUR_MS};
