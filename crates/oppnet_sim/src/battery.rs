//! Battery hook.
//!
//! The driver calls [`BatteryModel::update`] on every node each tick when
//! battery computation is enabled; a depleted node skips its exchanges.

use oppnet_core::Timestamp;
use tracing::debug;

use crate::config::BatteryConfig;

pub trait BatteryModel: std::fmt::Debug {
    /// Advance the model to `now`.
    fn update(&mut self, now: Timestamp);

    fn is_depleted(&self) -> bool;

    /// Remaining charge in `[0, 1]`.
    fn level(&self) -> f64;
}

/// Drains one unit per millisecond of simulated time, then recharges to full
/// after a fixed downtime.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearBattery {
    capacity: u64,
    current: u64,
    recharge_time: u64,
    last_update: Option<Timestamp>,
    depleted_since: Option<Timestamp>,
    /// Total units drained (lifetime telemetry).
    lifetime_consumption: u64,
    recharges: u32,
}

impl LinearBattery {
    pub fn new(capacity: u64, recharge_time: u64) -> Self {
        Self {
            capacity,
            current: capacity,
            recharge_time,
            last_update: None,
            depleted_since: None,
            lifetime_consumption: 0,
            recharges: 0,
        }
    }

    /// Start at a fraction of full charge, so nodes do not all deplete together.
    pub fn with_initial_level(mut self, ratio: f64) -> Self {
        self.current = (self.capacity as f64 * ratio.clamp(0.0, 1.0)) as u64;
        self
    }

    pub fn from_config(config: &BatteryConfig) -> Self {
        Self::new(config.capacity, config.recharge_time)
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn lifetime_consumption(&self) -> u64 {
        self.lifetime_consumption
    }

    pub fn recharges(&self) -> u32 {
        self.recharges
    }
}

impl BatteryModel for LinearBattery {
    fn update(&mut self, now: Timestamp) {
        let elapsed = self
            .last_update
            .map_or(0, |last| now.saturating_sub(last));
        self.last_update = Some(now);

        if let Some(since) = self.depleted_since {
            if now.saturating_sub(since) >= self.recharge_time {
                self.current = self.capacity;
                self.depleted_since = None;
                self.recharges += 1;
                debug!(recharges = self.recharges, "battery recharged");
            }
            return;
        }

        let drained = elapsed.min(self.current);
        self.current -= drained;
        self.lifetime_consumption += drained;
        if self.current == 0 {
            self.depleted_since = Some(now);
            debug!(at = now, "battery depleted");
        }
    }

    fn is_depleted(&self) -> bool {
        self.depleted_since.is_some()
    }

    fn level(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.current as f64 / self.capacity as f64
    }
}
