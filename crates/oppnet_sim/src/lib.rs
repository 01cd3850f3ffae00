//! Discrete-time driver for `oppnet_core` nodes.
//!
//! A [`Trace`] of directional contacts is replayed tick by tick. Contacts
//! that start on a tick run a full exchange against a snapshot of the
//! observed node; every active contact accumulates contact time. Messages
//! are generated once a day at a random hour, up to a configurable number
//! of days.

pub mod battery;
pub mod config;
pub mod generator;
pub mod metrics;
pub mod sim;
pub mod trace;

pub use battery::{BatteryModel, LinearBattery};
pub use config::{BatteryConfig, LoadError, SimulationConfig};
pub use generator::{MessageGenerator, MessageRequest, UniformGenerator};
pub use metrics::{MessageRecord, SimMetrics, SimulationOutput};
pub use sim::Simulator;
pub use trace::{Contact, Trace, TraceError};
