use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::record::{FailureUpdate, OutboxEventRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event {0} is not part of this claim")]
    NotClaimed(Uuid),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage backend holding the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `max` eligible events, oldest first.
    ///
    /// The returned batch holds the claim until it is committed or dropped.
    async fn claim_batch(&self, max: usize) -> Result<Box<dyn ClaimedBatch>, StoreError>;

    /// Number of unpublished events, including those waiting for a retry.
    async fn pending_count(&self) -> Result<i64, StoreError>;

    /// Backend name for logs and the stats endpoint.
    fn name(&self) -> &'static str;
}

/// An open claim. Marks are staged and take effect atomically on commit.
#[async_trait]
pub trait ClaimedBatch: Send {
    fn records(&self) -> &[OutboxEventRecord];

    async fn mark_published(
        &mut self,
        id: Uuid,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&mut self, id: Uuid, update: &FailureUpdate) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
