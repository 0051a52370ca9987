use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    ClaimingBatch,
    ProcessingRecord,
    Committing,
    /// No delivery channel configured; nothing is claimed
    Paused,
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::ClaimingBatch => 1,
            WorkerState::ProcessingRecord => 2,
            WorkerState::Committing => 3,
            WorkerState::Paused => 4,
            WorkerState::Stopped => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::ClaimingBatch,
            2 => WorkerState::ProcessingRecord,
            3 => WorkerState::Committing,
            4 => WorkerState::Paused,
            5 => WorkerState::Stopped,
            _ => WorkerState::Idle,
        }
    }
}

/// Live state and counters of one dispatch loop, shared with the HTTP API.
pub struct WorkerStatus {
    worker_id: usize,
    state: AtomicU8,
    batches: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    loop_errors: AtomicU64,
    /// Unix millis of the last committed batch; 0 when none yet
    last_batch_at: AtomicI64,
}

impl WorkerStatus {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            state: AtomicU8::new(WorkerState::Idle.as_u8()),
            batches: AtomicU64::new(0),
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            loop_errors: AtomicU64::new(0),
            last_batch_at: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.last_batch_at
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, exhausted: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if exhausted {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_loop_error(&self) {
        self.loop_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        let last_batch_ms = self.last_batch_at.load(Ordering::Relaxed);
        WorkerStatsSnapshot {
            worker_id: self.worker_id,
            state: self.state(),
            batches: self.batches.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
            last_batch_at: (last_batch_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_batch_ms))
                .flatten(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsSnapshot {
    pub worker_id: usize,
    pub state: WorkerState,
    pub batches: u64,
    pub published: u64,
    pub failed: u64,
    pub exhausted: u64,
    pub loop_errors: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_atomic() {
        let status = WorkerStatus::new(0);
        for state in [
            WorkerState::Idle,
            WorkerState::ClaimingBatch,
            WorkerState::ProcessingRecord,
            WorkerState::Committing,
            WorkerState::Paused,
            WorkerState::Stopped,
        ] {
            status.set_state(state);
            assert_eq!(status.state(), state);
        }
    }

    #[test]
    fn test_snapshot_counters() {
        let status = WorkerStatus::new(3);
        status.record_published();
        status.record_failed(false);
        status.record_failed(true);
        status.record_batch();

        let snapshot = status.snapshot();
        assert_eq!(snapshot.worker_id, 3);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.exhausted, 1);
        assert_eq!(snapshot.batches, 1);
        assert!(snapshot.last_batch_at.is_some());
    }
}
