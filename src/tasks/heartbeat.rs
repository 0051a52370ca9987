use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebConfig;
use crate::metrics::HubMetrics;
use crate::realtime::{GroupRegistry, ServerMessage};

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent heartbeat sends
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task that pings hub connections and closes idle ones
pub struct HeartbeatTask {
    config: WebConfig,
    registry: Arc<GroupRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebConfig,
        registry: Arc<GroupRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let mut timer = tokio::time::interval(interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.send_heartbeats().await;
                    self.cleanup_stale_connections();
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    async fn send_heartbeats(&self) {
        let connections = self.registry.all_connections();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();
        let failed = Arc::new(AtomicUsize::new(0));

        for chunk in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let sends = chunk.iter().map(|handle| {
                let failed = failed.clone();
                async move {
                    let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
                    if !matches!(
                        timeout(send_timeout, handle.send(ServerMessage::Heartbeat)).await,
                        Ok(Ok(()))
                    ) {
                        failed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(connection_id = %handle.id, "Heartbeat not delivered");
                    }
                }
            });

            join_all(sends).await;
        }

        tracing::debug!(
            total = total_count,
            failed = failed.load(Ordering::Relaxed),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Heartbeat round completed"
        );
    }

    fn cleanup_stale_connections(&self) {
        let removed = self
            .registry
            .cleanup_stale_connections(self.config.connection_timeout);

        if removed > 0 {
            HubMetrics::record_timeouts(removed as u64);
            tracing::info!(
                removed = removed,
                timeout_secs = self.config.connection_timeout,
                "Closed idle hub connections"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::OutboundMessage;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_heartbeat_task_shutdown() {
        let registry = Arc::new(GroupRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = HeartbeatTask::new(WebConfig::default(), registry, shutdown_rx);
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_heartbeat_sends_to_connections() {
        let config = WebConfig {
            heartbeat_interval: 1,
            connection_timeout: 60,
            ..WebConfig::default()
        };
        let registry = Arc::new(GroupRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(10);
        let _handle = registry.join(Uuid::new_v4(), "user-h".to_string(), tx);

        let task_handle = tokio::spawn(HeartbeatTask::new(config, registry, shutdown_rx).run());

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Channel should not be closed");
        assert!(matches!(msg, OutboundMessage::Raw(ServerMessage::Heartbeat)));

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }
}
