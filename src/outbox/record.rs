use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One row of `outbox_events`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OutboxEventRecord {
    pub id: Uuid,
    pub event_type: String,
    /// Serialized [`NotificationEnvelope`](crate::envelope::NotificationEnvelope)
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub failed_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEventRecord {
    /// A fresh pending row.
    pub fn new(id: Uuid, event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            payload: payload.into(),
            created_at: Utc::now(),
            published_at: None,
            failed_attempts: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }

    /// Pending and not waiting for a scheduled retry.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_retry_at.map_or(true, |at| at <= now)
    }

    pub(crate) fn apply_published(&mut self, published_at: DateTime<Utc>) {
        self.published_at = Some(published_at);
        self.failed_attempts = 0;
        self.next_retry_at = None;
        self.last_error = None;
    }

    pub(crate) fn apply_failure(&mut self, update: &FailureUpdate) {
        self.failed_attempts = update.failed_attempts;
        self.next_retry_at = Some(update.next_retry_at);
        self.last_error = Some(update.last_error.clone());
    }
}

/// Failure bookkeeping written by `mark_failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureUpdate {
    pub failed_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_eligibility() {
        let now = Utc::now();
        let mut record = OutboxEventRecord::new(Uuid::new_v4(), "x", "{}");
        assert!(record.is_eligible(now));

        record.next_retry_at = Some(now + Duration::seconds(5));
        assert!(!record.is_eligible(now));
        assert!(record.is_eligible(now + Duration::seconds(5)));

        record.apply_published(now);
        assert!(!record.is_eligible(now + Duration::hours(1)));
    }

    #[test]
    fn test_published_clears_failure_fields() {
        let now = Utc::now();
        let mut record = OutboxEventRecord::new(Uuid::new_v4(), "x", "{}");
        record.apply_failure(&FailureUpdate {
            failed_attempts: 3,
            next_retry_at: now,
            last_error: "boom".to_string(),
        });
        assert_eq!(record.failed_attempts, 3);

        record.apply_published(now);
        assert_eq!(record.published_at, Some(now));
        assert_eq!(record.failed_attempts, 0);
        assert_eq!(record.next_retry_at, None);
        assert_eq!(record.last_error, None);
    }
}
