use chrono::{DateTime, Duration, Utc};

use crate::config::OutboxConfig;
use crate::outbox::FailureUpdate;

/// Exponential retry schedule for failed deliveries.
///
/// `delay(a) = base` for `a <= 0`, otherwise `min(cap, base * 2^(a-1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_seconds: u64,
    pub max_backoff_seconds: u64,
    /// Attempt count at which failures are reported as exhausted
    pub max_retry_attempts: i32,
}

impl RetryPolicy {
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            base_seconds: config.base_retry_seconds,
            max_backoff_seconds: config.max_backoff_seconds,
            max_retry_attempts: config.max_retry_attempts,
        }
    }

    pub fn delay_seconds(&self, attempts: i32) -> u64 {
        if attempts <= 0 {
            return self.base_seconds;
        }
        let factor = 1u64.checked_shl((attempts - 1) as u32).unwrap_or(u64::MAX);
        self.base_seconds
            .saturating_mul(factor)
            .min(self.max_backoff_seconds)
    }

    /// Bookkeeping for a record that had `previous_attempts` failures before this one.
    pub fn failure_update(
        &self,
        previous_attempts: i32,
        error: String,
        now: DateTime<Utc>,
    ) -> FailureUpdate {
        let failed_attempts = previous_attempts.max(0).saturating_add(1);
        let delay = self.delay_seconds(failed_attempts);
        FailureUpdate {
            failed_attempts,
            next_retry_at: now + Duration::seconds(delay.min(i32::MAX as u64) as i64),
            last_error: error,
        }
    }

    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_retry_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OutboxConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_seconds(0), 5);
        assert_eq!(policy.delay_seconds(-3), 5);
        assert_eq!(policy.delay_seconds(1), 5);
        assert_eq!(policy.delay_seconds(2), 10);
        assert_eq!(policy.delay_seconds(5), 80);
        assert_eq!(policy.delay_seconds(7), 300);
        assert_eq!(policy.delay_seconds(10), 300);
    }

    #[test]
    fn test_delay_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_seconds(64), 300);
        assert_eq!(policy.delay_seconds(i32::MAX), 300);
    }

    #[test]
    fn test_failure_update() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let first = policy.failure_update(0, "boom".to_string(), now);
        assert_eq!(first.failed_attempts, 1);
        assert_eq!(first.next_retry_at, now + Duration::seconds(5));
        assert_eq!(first.last_error, "boom");

        let sixth = policy.failure_update(5, "boom".to_string(), now);
        assert_eq!(sixth.failed_attempts, 6);
        assert_eq!(sixth.next_retry_at, now + Duration::seconds(160));
    }

    #[test]
    fn test_exhaustion_threshold() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
        assert!(policy.is_exhausted(11));
    }
}
