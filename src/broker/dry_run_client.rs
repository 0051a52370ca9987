//! Topic client for dry runs: logs each publish and keeps nothing.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::client::{BrokerError, PublishReceipt, PublishRequest, TopicClient};

#[derive(Default)]
pub struct DryRunTopicClient {
    sequence: AtomicU64,
}

impl DryRunTopicClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publishes accepted so far.
    pub fn accepted(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TopicClient for DryRunTopicClient {
    async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, BrokerError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!(
            topic = %request.topic,
            message_group_id = ?request.message_group_id,
            deduplication_id = ?request.deduplication_id,
            bytes = request.message.len(),
            "Dry run: publish skipped"
        );

        Ok(PublishReceipt {
            message_id: Some(format!("dry-run-{}", sequence)),
        })
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_publish_is_accepted() {
        let client = DryRunTopicClient::new();
        let mut request = PublishRequest::new("notifications", "{}");
        request.deduplication_id = Some("same".into());

        let first = client.publish(request.clone()).await.unwrap();
        let second = client.publish(request).await.unwrap();

        assert_eq!(first.message_id.as_deref(), Some("dry-run-1"));
        // no dedup state is kept, so a repeat is not reported as duplicate
        assert!(!second.is_duplicate());
        assert_eq!(client.accepted(), 2);
    }
}
