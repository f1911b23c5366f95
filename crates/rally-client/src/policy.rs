//! Reconnect backoff policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff parameters for the retry loop.
///
/// `delay(k) = min(max_delay, initial_delay * multiplier^(k-1))` for attempt
/// `k >= 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before attempt `attempt` (1-based). Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
