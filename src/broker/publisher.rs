use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use super::client::{BrokerError, PublishRequest, TopicClient};
use crate::config::BrokerConfig;
use crate::envelope::NotificationEnvelope;
use crate::metrics::BrokerMetrics;

/// Publishes outbox payloads to the configured topic.
///
/// Standard topics get the stored payload once. FIFO topics get one message
/// per recipient, each narrowed to that single recipient and ordered within
/// the recipient's message group.
pub struct BrokerPublisher {
    client: Arc<dyn TopicClient>,
    config: BrokerConfig,
    timeout: Duration,
}

impl BrokerPublisher {
    pub fn new(client: Arc<dyn TopicClient>, config: BrokerConfig, timeout: Duration) -> Self {
        Self {
            client,
            config,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn is_fifo(&self) -> bool {
        self.config.fifo
    }

    #[tracing::instrument(
        name = "broker.publish",
        skip_all,
        fields(
            event_id = %envelope.event_id,
            fifo = self.config.fifo,
            recipients = envelope.recipients.len()
        )
    )]
    pub async fn publish(
        &self,
        payload: &str,
        envelope: &NotificationEnvelope,
    ) -> Result<(), BrokerError> {
        if !self.is_enabled() {
            return Ok(());
        }

        if self.config.fifo {
            self.publish_per_recipient(payload, envelope).await
        } else {
            let request = self.base_request(payload.to_string(), envelope);
            self.send(request).await
        }
    }

    async fn publish_per_recipient(
        &self,
        payload: &str,
        envelope: &NotificationEnvelope,
    ) -> Result<(), BrokerError> {
        let document: Value = serde_json::from_str(payload)?;
        if !document.is_object() {
            return Err(BrokerError::Rejected(
                "FIFO payload must be a JSON object".to_string(),
            ));
        }

        for recipient in &envelope.recipients {
            let message = narrow_to_recipient(&document, *recipient);
            let mut request = self.base_request(message.to_string(), envelope);
            request.message_group_id = Some(message_group_id(*recipient));
            request.deduplication_id = Some(deduplication_id(envelope.event_id, *recipient));
            self.send(request).await?;
        }

        Ok(())
    }

    fn base_request(&self, message: String, envelope: &NotificationEnvelope) -> PublishRequest {
        let mut request = PublishRequest::new(self.config.topic.clone(), message)
            .attribute("event_type", envelope.event_type.clone());
        if let Some(correlation_id) = envelope.correlation_id() {
            request = request.attribute("correlation_id", correlation_id);
        }
        request
    }

    async fn send(&self, request: PublishRequest) -> Result<(), BrokerError> {
        let fifo = self.config.fifo;
        let outcome = match tokio::time::timeout(self.timeout, self.client.publish(request)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(receipt) => {
                BrokerMetrics::record_publish(fifo);
                tracing::debug!(
                    client = self.client.name(),
                    message_id = ?receipt.message_id,
                    duplicate = receipt.is_duplicate(),
                    "Published to topic"
                );
                Ok(())
            }
            Err(e) => {
                BrokerMetrics::record_failure(fifo);
                Err(e)
            }
        }
    }
}

/// Copy of `document` whose `recipients` is exactly `[recipient]`.
fn narrow_to_recipient(document: &Value, recipient: Uuid) -> Value {
    let mut message = document.clone();
    if let Value::Object(map) = &mut message {
        map.insert(
            "recipients".to_string(),
            Value::Array(vec![Value::String(recipient.to_string())]),
        );
    }
    message
}

pub fn message_group_id(recipient: Uuid) -> String {
    format!("user-{}", recipient)
}

pub fn deduplication_id(event_id: Uuid, recipient: Uuid) -> String {
    format!("{}-{}", event_id.simple(), recipient.simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryTopicClient;

    fn publisher(client: Arc<MemoryTopicClient>, fifo: bool) -> BrokerPublisher {
        BrokerPublisher::new(
            client,
            BrokerConfig {
                topic: "notifications".to_string(),
                fifo,
                ..BrokerConfig::default()
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_standard_publish_sends_payload_once() {
        let client = Arc::new(MemoryTopicClient::new());
        let envelope = NotificationEnvelope::new("order.shipped", [Uuid::new_v4(), Uuid::new_v4()])
            .with_correlation_id("req-9");
        let payload = envelope.to_payload().unwrap();

        publisher(client.clone(), false)
            .publish(&payload, &envelope)
            .await
            .unwrap();

        let published = client.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message, payload);
        assert_eq!(published[0].attributes["event_type"], "order.shipped");
        assert_eq!(published[0].attributes["correlation_id"], "req-9");
        assert_eq!(published[0].message_group_id, None);
    }

    #[tokio::test]
    async fn test_fifo_splits_per_recipient() {
        let client = Arc::new(MemoryTopicClient::new());
        let recipients = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let envelope = NotificationEnvelope::new("order.shipped", recipients);
        let payload = envelope.to_payload().unwrap();

        publisher(client.clone(), true)
            .publish(&payload, &envelope)
            .await
            .unwrap();

        let published = client.published();
        assert_eq!(published.len(), 3);
        for (request, recipient) in published.iter().zip(recipients) {
            let body: Value = serde_json::from_str(&request.message).unwrap();
            assert_eq!(body["recipients"], serde_json::json!([recipient]));
            assert_eq!(body["event_id"], serde_json::json!(envelope.event_id));
            assert_eq!(
                request.message_group_id.as_deref(),
                Some(format!("user-{}", recipient).as_str())
            );
            assert_eq!(
                request.deduplication_id,
                Some(format!("{}-{}", envelope.event_id.simple(), recipient.simple()))
            );
            assert!(!request.attributes.contains_key("correlation_id"));
        }
    }

    #[tokio::test]
    async fn test_fifo_keeps_unknown_fields() {
        let client = Arc::new(MemoryTopicClient::new());
        let recipient = Uuid::new_v4();
        let payload = serde_json::json!({
            "event_id": Uuid::new_v4(),
            "recipients": [recipient],
            "custom": {"nested": true}
        })
        .to_string();
        let envelope = NotificationEnvelope::decode(&payload).unwrap();

        publisher(client.clone(), true)
            .publish(&payload, &envelope)
            .await
            .unwrap();

        let body: Value = serde_json::from_str(&client.published()[0].message).unwrap();
        assert_eq!(body["custom"]["nested"], true);
    }

    #[tokio::test]
    async fn test_fifo_failure_fails_publish() {
        let client = Arc::new(MemoryTopicClient::new());
        client.fail_on_call(2);
        let envelope = NotificationEnvelope::new("x", [Uuid::new_v4(), Uuid::new_v4()]);
        let payload = envelope.to_payload().unwrap();

        let result = publisher(client.clone(), true)
            .publish(&payload, &envelope)
            .await;
        assert!(result.is_err());
        assert_eq!(client.published().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_without_topic() {
        let client = Arc::new(MemoryTopicClient::new());
        let publisher = BrokerPublisher::new(
            client.clone(),
            BrokerConfig::default(),
            Duration::from_secs(1),
        );
        let envelope = NotificationEnvelope::new("x", [Uuid::new_v4()]);

        assert!(!publisher.is_enabled());
        publisher.publish("{}", &envelope).await.unwrap();
        assert_eq!(client.call_count(), 0);
    }
}
