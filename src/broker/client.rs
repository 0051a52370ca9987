use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload is not a JSON object")]
    InvalidPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Redis(#[from] PoolError),
}

/// One message addressed to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
    /// Ordering key; only set for FIFO topics
    pub message_group_id: Option<String>,
    /// Deduplication key; only set for FIFO topics
    pub deduplication_id: Option<String>,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            attributes: BTreeMap::new(),
            message_group_id: None,
            deduplication_id: None,
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Broker-assigned id; `None` when the message was dropped as a duplicate
    pub message_id: Option<String>,
}

impl PublishReceipt {
    pub fn is_duplicate(&self) -> bool {
        self.message_id.is_none()
    }
}

/// Publish capability of a topic-based broker.
#[async_trait]
pub trait TopicClient: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, BrokerError>;

    /// Implementation name for logs.
    fn name(&self) -> &'static str;
}
