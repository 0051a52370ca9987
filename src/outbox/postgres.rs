//! PostgreSQL outbox store.
//!
//! A claim is a transaction holding row locks taken with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never wait on each other
//! and never see the same row twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::record::{FailureUpdate, OutboxEventRecord};
use super::store::{ClaimedBatch, OutboxStore, StoreError};
use crate::envelope::NotificationEnvelope;

const CLAIM_SQL: &str = r#"
    SELECT id, event_type, payload::text AS payload, created_at, published_at,
           failed_attempts, next_retry_at, last_error
    FROM public.outbox_events
    WHERE published_at IS NULL
      AND (next_retry_at IS NULL OR next_retry_at <= now())
    ORDER BY created_at
    LIMIT $1
    FOR UPDATE SKIP LOCKED
"#;

const MARK_PUBLISHED_SQL: &str = r#"
    UPDATE public.outbox_events
    SET published_at = $2,
        failed_attempts = 0,
        next_retry_at = NULL,
        last_error = NULL
    WHERE id = $1
"#;

const MARK_FAILED_SQL: &str = r#"
    UPDATE public.outbox_events
    SET failed_attempts = $2,
        next_retry_at = $3,
        last_error = $4
    WHERE id = $1
"#;

#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn claim_batch(&self, max: usize) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let records = sqlx::query_as::<_, OutboxEventRecord>(CLAIM_SQL)
            .bind(max as i64)
            .fetch_all(&mut *tx)
            .await?;

        Ok(Box::new(PostgresClaimedBatch { tx, records }))
    }

    async fn pending_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM public.outbox_events WHERE published_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Claim backed by an open transaction. Dropping it rolls back.
struct PostgresClaimedBatch {
    tx: Transaction<'static, Postgres>,
    records: Vec<OutboxEventRecord>,
}

impl PostgresClaimedBatch {
    fn ensure_claimed(&self, id: Uuid) -> Result<(), StoreError> {
        if self.records.iter().any(|r| r.id == id) {
            Ok(())
        } else {
            Err(StoreError::NotClaimed(id))
        }
    }
}

#[async_trait]
impl ClaimedBatch for PostgresClaimedBatch {
    fn records(&self) -> &[OutboxEventRecord] {
        &self.records
    }

    async fn mark_published(
        &mut self,
        id: Uuid,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_claimed(id)?;
        sqlx::query(MARK_PUBLISHED_SQL)
            .bind(id)
            .bind(published_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn mark_failed(&mut self, id: Uuid, update: &FailureUpdate) -> Result<(), StoreError> {
        self.ensure_claimed(id)?;
        sqlx::query(MARK_FAILED_SQL)
            .bind(id)
            .bind(update.failed_attempts)
            .bind(update.next_retry_at)
            .bind(&update.last_error)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Insert a pending event for `envelope`.
///
/// Accepts any executor so producers can enqueue inside their own
/// business transaction. Returns the new row id.
pub async fn enqueue<'e, E>(executor: E, envelope: &NotificationEnvelope) -> Result<Uuid, StoreError>
where
    E: PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    let payload = serde_json::to_string(envelope)?;

    sqlx::query(
        r#"
        INSERT INTO public.outbox_events (id, event_type, payload, created_at)
        VALUES ($1, $2, $3::jsonb, now())
        "#,
    )
    .bind(id)
    .bind(&envelope.event_type)
    .bind(payload)
    .execute(executor)
    .await?;

    tracing::debug!(
        outbox_id = %id,
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        "Outbox event enqueued"
    );

    Ok(id)
}
