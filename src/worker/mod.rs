//! Dispatch loop: claim a batch, fan each event out, record the outcome.
//!
//! Every iteration runs inside one store claim. Successful events are marked
//! published; failed ones get an incremented attempt count and a backoff
//! deadline. The claim is committed before the next iteration starts, so a
//! shutdown request never abandons a half-processed batch.

mod channel;
mod retry;
mod status;

pub use channel::{DeliveryChannel, DeliveryError};
pub use retry::RetryPolicy;
pub use status::{WorkerState, WorkerStatsSnapshot, WorkerStatus};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::config::OutboxConfig;
use crate::envelope::NotificationEnvelope;
use crate::metrics::OutboxMetrics;
use crate::outbox::{OutboxEventRecord, OutboxStore, StoreError};

pub struct OutboxWorker {
    id: usize,
    store: Arc<dyn OutboxStore>,
    channels: Arc<Vec<DeliveryChannel>>,
    config: OutboxConfig,
    policy: RetryPolicy,
    status: Arc<WorkerStatus>,
    shutdown: broadcast::Receiver<()>,
}

impl OutboxWorker {
    pub fn new(
        id: usize,
        store: Arc<dyn OutboxStore>,
        channels: Arc<Vec<DeliveryChannel>>,
        config: OutboxConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            store,
            channels,
            policy: RetryPolicy::from_config(&config),
            config,
            status: Arc::new(WorkerStatus::new(id)),
            shutdown,
        }
    }

    /// Shared status handle for health and stats reporting.
    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        tracing::info!(
            worker_id = self.id,
            store = self.store.name(),
            channels = ?self.channels.iter().map(DeliveryChannel::name).collect::<Vec<_>>(),
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "Outbox worker started"
        );

        loop {
            if self.shutdown_requested() {
                break;
            }

            if self.channels.is_empty() {
                if self.status.state() != WorkerState::Paused {
                    tracing::warn!(
                        worker_id = self.id,
                        "No delivery channel enabled; outbox processing paused"
                    );
                    self.status.set_state(WorkerState::Paused);
                }
                if self.sleep_or_shutdown().await {
                    break;
                }
                continue;
            }

            match self.process_batch().await {
                Ok(0) => {
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.status.record_loop_error();
                    self.status.set_state(WorkerState::Idle);
                    tracing::error!(worker_id = self.id, error = %e, "Outbox batch failed");
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                }
            }
        }

        self.status.set_state(WorkerState::Stopped);
        tracing::info!(worker_id = self.id, "Outbox worker stopped");
    }

    fn shutdown_requested(&mut self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep one poll interval. Returns true if shutdown arrived meanwhile.
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => true,
            _ = tokio::time::sleep(self.config.poll_interval()) => false,
        }
    }

    /// Claim, deliver and commit one batch. Returns the number of claimed events.
    #[tracing::instrument(
        name = "outbox.batch",
        skip(self),
        fields(worker_id = self.id, size = tracing::field::Empty)
    )]
    pub async fn process_batch(&self) -> Result<usize, StoreError> {
        let started = Instant::now();

        self.status.set_state(WorkerState::ClaimingBatch);
        let mut batch = self
            .store
            .claim_batch(self.config.batch_size as usize)
            .await
            .map_err(at_stage("claim"))?;
        let records = batch.records().to_vec();
        tracing::Span::current().record("size", records.len());

        if !records.is_empty() {
            self.status.set_state(WorkerState::ProcessingRecord);
        }

        for record in &records {
            match self.deliver(record).await {
                Ok(()) => {
                    batch
                        .mark_published(record.id, Utc::now())
                        .await
                        .map_err(at_stage("mark"))?;
                    self.status.record_published();
                    OutboxMetrics::record_published();
                }
                Err(e) => {
                    let update = self
                        .policy
                        .failure_update(record.failed_attempts, e.to_string(), Utc::now());
                    let exhausted = self.policy.is_exhausted(update.failed_attempts);

                    if exhausted {
                        tracing::warn!(
                            outbox_id = %record.id,
                            event_type = %record.event_type,
                            attempts = update.failed_attempts,
                            max_retry_attempts = self.policy.max_retry_attempts,
                            error = %e,
                            "Outbox event reached retry ceiling; retrying at capped interval"
                        );
                    } else {
                        tracing::warn!(
                            outbox_id = %record.id,
                            event_type = %record.event_type,
                            attempts = update.failed_attempts,
                            next_retry_at = %update.next_retry_at,
                            error = %e,
                            "Outbox event delivery failed"
                        );
                    }

                    batch
                        .mark_failed(record.id, &update)
                        .await
                        .map_err(at_stage("mark"))?;
                    self.status.record_failed(exhausted);
                    OutboxMetrics::record_failed(exhausted);
                }
            }
        }

        self.status.set_state(WorkerState::Committing);
        batch.commit().await.map_err(at_stage("commit"))?;
        self.status.set_state(WorkerState::Idle);

        if !records.is_empty() {
            self.status.record_batch();
            OutboxMetrics::record_batch(records.len(), started.elapsed());
            tracing::debug!(
                claimed = records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Outbox batch committed"
            );
        }

        Ok(records.len())
    }

    #[tracing::instrument(
        name = "outbox.record",
        skip_all,
        fields(
            outbox_id = %record.id,
            event_type = %record.event_type,
            attempt = record.failed_attempts.saturating_add(1)
        )
    )]
    async fn deliver(&self, record: &OutboxEventRecord) -> Result<(), DeliveryError> {
        let envelope = NotificationEnvelope::decode(&record.payload)?;
        envelope.validate()?;

        for channel in self.channels.iter() {
            channel.deliver(&record.payload, &envelope).await?;
        }

        Ok(())
    }
}

/// Spawned dispatch loops and their status handles.
pub struct WorkerSet {
    pub handles: Vec<JoinHandle<()>>,
    pub statuses: Vec<Arc<WorkerStatus>>,
}

/// Spawn `config.worker_count` dispatch loops sharing one store and channel set.
pub fn spawn_workers(
    store: Arc<dyn OutboxStore>,
    channels: Vec<DeliveryChannel>,
    config: &OutboxConfig,
    shutdown_tx: &broadcast::Sender<()>,
) -> WorkerSet {
    let channels = Arc::new(channels);
    let count = config.worker_count.max(1);
    let mut handles = Vec::with_capacity(count);
    let mut statuses = Vec::with_capacity(count);

    for id in 0..count {
        let worker = OutboxWorker::new(
            id,
            store.clone(),
            channels.clone(),
            config.clone(),
            shutdown_tx.subscribe(),
        );
        statuses.push(worker.status());
        handles.push(tokio::spawn(worker.run()));
    }

    WorkerSet { handles, statuses }
}

/// Count a loop-level error under `stage` and pass it through.
fn at_stage(stage: &'static str) -> impl FnOnce(StoreError) -> StoreError {
    move |e| {
        OutboxMetrics::record_loop_error(stage);
        e
    }
}
