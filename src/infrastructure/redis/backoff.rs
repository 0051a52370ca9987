//! Exponential backoff for re-establishing Redis subscriptions

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    /// Jitter factor (0.0 to 1.0) applied symmetrically around the delay
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

/// Doubling delay sequence with jitter, reset after a successful reconnect.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for the next attempt: `initial * 2^attempt`, capped, then jittered.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let base = self
            .config
            .initial
            .checked_mul(factor)
            .unwrap_or(self.config.max)
            .min(self.config.max);
        self.attempt = self.attempt.saturating_add(1);

        let base_ms = base.as_millis() as f64;
        let jitter_range = base_ms * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay_ms = if jitter_range > 0.0 {
            base_ms + rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            base_ms
        };

        Duration::from_millis(delay_ms.max(1.0) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
