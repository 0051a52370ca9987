//! Redis backplane subscriber.
//!
//! Every instance using the Redis group transport runs one subscriber that
//! forwards frames published by any instance to its own local connections.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;

use super::message::GroupFrame;
use super::transport::{GroupTransport, LocalGroupTransport};
use crate::metrics::WebMetrics;
use crate::redis::{ExponentialBackoff, PoolError, RedisPool};

pub struct BackplaneSubscriber {
    pool: Arc<RedisPool>,
    channel: String,
    local: LocalGroupTransport,
    shutdown: broadcast::Receiver<()>,
}

/// Why a subscription session ended.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

impl BackplaneSubscriber {
    pub fn new(
        pool: Arc<RedisPool>,
        channel: impl Into<String>,
        local: LocalGroupTransport,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            pool,
            channel: channel.into(),
            local,
            shutdown,
        }
    }

    /// Subscribe and forward until shutdown, reconnecting with backoff.
    pub async fn run(mut self) {
        let mut backoff = ExponentialBackoff::new();
        tracing::info!(channel = %self.channel, "Backplane subscriber started");

        loop {
            let delay = match self.run_session(&mut backoff).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => {
                    tracing::warn!(channel = %self.channel, "Backplane stream ended, reconnecting");
                    backoff.next_delay()
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Backplane subscription failed"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Backplane subscriber stopped");
    }

    async fn run_session(
        &mut self,
        backoff: &mut ExponentialBackoff,
    ) -> Result<SessionEnd, PoolError> {
        let mut pubsub = self.pool.pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        backoff.reset();
        tracing::info!(channel = %self.channel, "Backplane subscription established");

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return Ok(SessionEnd::Shutdown),
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Ok(SessionEnd::Disconnected);
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to read backplane payload");
                            continue;
                        }
                    };
                    forward(&self.local, &payload).await;
                }
            }
        }
    }
}

/// Deliver one backplane payload to local group members.
async fn forward(local: &LocalGroupTransport, payload: &str) {
    WebMetrics::record_backplane_received();

    let frame: GroupFrame = match serde_json::from_str(payload) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed backplane frame");
            return;
        }
    };

    if let Err(e) = local.send_to_group(&frame.group, Arc::from(frame.frame)).await {
        tracing::warn!(group = %frame.group, error = %e, "Backplane forward failed");
    }
}
