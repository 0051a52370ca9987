//! In-process outbox store with the same claim semantics as PostgreSQL.
//!
//! Each row carries a lease flag standing in for the row lock. Marks are
//! staged in the claim and written on commit; dropping the claim releases
//! the leases and discards the staged marks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::record::{FailureUpdate, OutboxEventRecord};
use super::store::{ClaimedBatch, OutboxStore, StoreError};
use crate::envelope::NotificationEnvelope;

struct MemoryRow {
    record: OutboxEventRecord,
    leased: bool,
}

#[derive(Clone, Default)]
pub struct MemoryOutboxStore {
    rows: Arc<DashMap<Uuid, MemoryRow>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as-is (tests use this to seed retry state).
    pub fn insert(&self, record: OutboxEventRecord) {
        self.rows.insert(
            record.id,
            MemoryRow {
                record,
                leased: false,
            },
        );
    }

    /// Insert a pending event for `envelope` and return its row id.
    pub fn enqueue(&self, envelope: &NotificationEnvelope) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_string(envelope)?;
        self.insert(OutboxEventRecord::new(id, envelope.event_type.clone(), payload));
        Ok(id)
    }

    /// Current state of a row.
    pub fn get(&self, id: Uuid) -> Option<OutboxEventRecord> {
        self.rows.get(&id).map(|row| row.record.clone())
    }

    /// All rows ordered by creation time.
    pub fn snapshot(&self) -> Vec<OutboxEventRecord> {
        let mut records: Vec<_> = self.rows.iter().map(|r| r.record.clone()).collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn claim_batch(&self, max: usize) -> Result<Box<dyn ClaimedBatch>, StoreError> {
        let now = Utc::now();

        // Collect candidates first; leasing while iterating would deadlock on the shard lock
        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = self
            .rows
            .iter()
            .filter(|row| !row.leased && row.record.is_eligible(now))
            .map(|row| (row.record.created_at, row.record.id))
            .collect();
        candidates.sort();

        let mut records = Vec::with_capacity(max.min(candidates.len()));
        for (_, id) in candidates {
            if records.len() >= max {
                break;
            }
            if let Some(mut row) = self.rows.get_mut(&id) {
                // Re-check under the entry lock; a concurrent claim may have won
                if !row.leased && row.record.is_eligible(now) {
                    row.leased = true;
                    records.push(row.record.clone());
                }
            }
        }

        Ok(Box::new(MemoryClaimedBatch {
            rows: Arc::clone(&self.rows),
            records,
            staged: Vec::new(),
        }))
    }

    async fn pending_count(&self) -> Result<i64, StoreError> {
        Ok(self.rows.iter().filter(|r| r.record.is_pending()).count() as i64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

enum StagedMark {
    Published(DateTime<Utc>),
    Failed(FailureUpdate),
}

struct MemoryClaimedBatch {
    rows: Arc<DashMap<Uuid, MemoryRow>>,
    records: Vec<OutboxEventRecord>,
    staged: Vec<(Uuid, StagedMark)>,
}

impl MemoryClaimedBatch {
    fn ensure_claimed(&self, id: Uuid) -> Result<(), StoreError> {
        if self.records.iter().any(|r| r.id == id) {
            Ok(())
        } else {
            Err(StoreError::NotClaimed(id))
        }
    }
}

#[async_trait]
impl ClaimedBatch for MemoryClaimedBatch {
    fn records(&self) -> &[OutboxEventRecord] {
        &self.records
    }

    async fn mark_published(
        &mut self,
        id: Uuid,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_claimed(id)?;
        self.staged.push((id, StagedMark::Published(published_at)));
        Ok(())
    }

    async fn mark_failed(&mut self, id: Uuid, update: &FailureUpdate) -> Result<(), StoreError> {
        self.ensure_claimed(id)?;
        self.staged.push((id, StagedMark::Failed(update.clone())));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        for (id, mark) in self.staged.drain(..) {
            if let Some(mut row) = self.rows.get_mut(&id) {
                match mark {
                    StagedMark::Published(at) => row.record.apply_published(at),
                    StagedMark::Failed(update) => row.record.apply_failure(&update),
                }
            }
        }
        // Leases are released by Drop
        Ok(())
    }
}

impl Drop for MemoryClaimedBatch {
    fn drop(&mut self) {
        for record in &self.records {
            if let Some(mut row) = self.rows.get_mut(&record.id) {
                row.leased = false;
            }
        }
    }
}
