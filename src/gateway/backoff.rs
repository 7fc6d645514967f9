use crate::config::BackoffConfig;

use std::time::Duration;

/// Exponential reconnect delay: `initial * 2^(attempt - 1)`, capped at
/// `max_delay`. `max_attempts == 0` means retry until stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial:      Duration,
    pub max_delay:    Duration,
    pub max_attempts: u32,
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(cfg: &BackoffConfig) -> Self {
        Self {
            initial:      Duration::from_millis(cfg.initial_ms),
            max_delay:    Duration::from_millis(cfg.max_ms),
            max_attempts: cfg.max_attempts,
        }
    }
}
