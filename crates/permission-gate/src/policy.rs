//! Fallback poll timing

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing of the fallback permission poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay before the first re-check (milliseconds)
    pub initial_delay_ms: u64,
    /// Delay after the first unsuccessful re-check (milliseconds)
    pub interval_ms: u64,
    /// Growth factor applied per unsuccessful re-check
    pub multiplier: f64,
    /// Upper bound for any single delay (milliseconds)
    pub max_interval_ms: u64,
    /// Unsuccessful re-checks before the request times out
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            interval_ms: 2000,
            multiplier: 2.0,
            max_interval_ms: 16_000,
            max_attempts: 8,
        }
    }
}

impl PollPolicy {
    /// Delay before re-check number `attempt`, counted from zero
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = self.interval_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = grown.min(self.max_interval_ms.max(self.interval_ms) as f64);
        Duration::from_millis(capped as u64)
    }

    /// Total time from request to time-out when no grant ever arrives
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|attempt| self.delay_for(attempt)).sum()
    }
}
