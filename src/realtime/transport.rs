//! Group transports: how a frame reaches every member of a group.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;

use super::message::{GroupFrame, OutboundMessage};
use super::registry::GroupRegistry;
use crate::metrics::WebMetrics;
use crate::redis::{PoolError, RedisPool};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to group {group} timed out after {after:?}")]
    Timeout { group: String, after: Duration },

    #[error("backplane publish failed: {0}")]
    Backplane(#[from] PoolError),

    #[error("frame serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("send to group {group} failed: {reason}")]
    Rejected { group: String, reason: String },
}

#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Deliver `frame` to every member of `group`.
    ///
    /// Returns the number of connections (or backplane subscribers) reached.
    /// An empty group is not an error.
    async fn send_to_group(&self, group: &str, frame: Arc<str>) -> Result<usize, TransportError>;

    fn name(&self) -> &'static str;
}

/// Delivers to connections held by this process.
#[derive(Clone)]
pub struct LocalGroupTransport {
    registry: Arc<GroupRegistry>,
    send_timeout: Duration,
}

impl LocalGroupTransport {
    pub fn new(registry: Arc<GroupRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }
}

#[async_trait]
impl GroupTransport for LocalGroupTransport {
    async fn send_to_group(&self, group: &str, frame: Arc<str>) -> Result<usize, TransportError> {
        let members = self.registry.group_connections(group);
        if members.is_empty() {
            return Ok(0);
        }

        let sends = members.iter().map(|handle| {
            let message = OutboundMessage::Preserialized(frame.clone());
            async move {
                match tokio::time::timeout(self.send_timeout, handle.send_preserialized(message))
                    .await
                {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        // Writer task already gone; the connection is leaving
                        tracing::debug!(connection_id = %handle.id, "Skipping closed connection");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(
                            connection_id = %handle.id,
                            group = %group,
                            timeout_ms = self.send_timeout.as_millis() as u64,
                            "Group send to slow connection timed out"
                        );
                        false
                    }
                }
            }
        });

        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        WebMetrics::record_frames_delivered(delivered as u64);
        Ok(delivered)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Publishes group frames on a Redis channel every instance subscribes to.
pub struct RedisGroupTransport {
    pool: Arc<RedisPool>,
    channel: String,
}

impl RedisGroupTransport {
    pub fn new(pool: Arc<RedisPool>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl GroupTransport for RedisGroupTransport {
    async fn send_to_group(&self, group: &str, frame: Arc<str>) -> Result<usize, TransportError> {
        let payload = serde_json::to_string(&GroupFrame {
            group: group.to_string(),
            frame: frame.to_string(),
        })?;
        let channel = self.channel.as_str();

        let receivers: usize = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(receivers)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
