//! Reconnect delay policy for the signaling socket
//!
//! The default is a fixed delay. A multiplier above 1.0 turns it into
//! exponential backoff capped at `max_delay`.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Reconnection policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Growth factor per consecutive failed attempt
    pub multiplier: f64,
    /// Upper bound on any delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.delay_ms)),
        }
    }
}

impl ReconnectPolicy {
    /// Fixed-delay policy
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = attempt.min(32) as i32;
        let delay_ms = (base_ms * self.multiplier.powi(exponent))
            .min(self.max_delay.as_millis() as f64);

        Duration::from_millis(delay_ms as u64)
    }
}
