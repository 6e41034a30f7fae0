//! Delivery loop tuning.

use std::time::Duration;

use crate::pending::{DEFAULT_PENDING_CAPACITY, OverflowPolicy};

/// Default period between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub heartbeat_interval: Duration,
    /// Records kept in memory after a failed write.
    pub pending_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl DeliveryConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
