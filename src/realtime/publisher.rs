use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use uuid::Uuid;

use super::message::ServerMessage;
use super::transport::{GroupTransport, TransportError};
use crate::config::WebConfig;
use crate::envelope::NotificationEnvelope;
use crate::metrics::WebMetrics;

/// Broadcasts envelopes to per-recipient groups on the hub.
pub struct WebNotificationPublisher {
    transport: Arc<dyn GroupTransport>,
    config: WebConfig,
    timeout: Duration,
}

impl WebNotificationPublisher {
    pub fn new(transport: Arc<dyn GroupTransport>, config: WebConfig, timeout: Duration) -> Self {
        Self {
            transport,
            config,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Group every connection of `recipient` joins.
    pub fn group_name(&self, recipient: Uuid) -> String {
        group_name(&self.config.group_prefix, recipient)
    }

    /// Whether this envelope is addressed to the web channel at all.
    pub fn should_handle(&self, envelope: &NotificationEnvelope) -> bool {
        if !self.config.enabled || envelope.recipients.is_empty() {
            return false;
        }
        if !self.config.require_channel_tag {
            return true;
        }
        envelope.has_channel(&self.config.channel_tag)
    }

    /// Send one invocation frame per recipient group.
    ///
    /// Sends run concurrently in chunks of `max_batch_size`; every send
    /// completes before the result is reported, and any failure fails the call.
    #[tracing::instrument(
        name = "web.publish",
        skip_all,
        fields(
            event_id = %envelope.event_id,
            recipients = envelope.recipients.len(),
            transport = self.transport.name()
        )
    )]
    pub async fn publish(&self, envelope: &NotificationEnvelope) -> Result<(), TransportError> {
        let arguments = vec![serde_json::to_value(envelope)?];
        let frame: Arc<str> = Arc::from(serde_json::to_string(&ServerMessage::invocation(
            self.config.broadcast_method.clone(),
            arguments,
        ))?);

        let chunk_size = self.config.max_batch_size.max(1);
        let mut first_error = None;
        let mut reached = 0usize;

        for chunk in envelope.recipients.chunks(chunk_size) {
            let sends = chunk.iter().map(|recipient| {
                let group = self.group_name(*recipient);
                let frame = frame.clone();
                async move {
                    let result =
                        match tokio::time::timeout(self.timeout, self.transport.send_to_group(&group, frame))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(TransportError::Timeout {
                                group: group.clone(),
                                after: self.timeout,
                            }),
                        };
                    WebMetrics::record_group_send(result.is_ok());
                    if let Err(e) = &result {
                        tracing::warn!(group = %group, error = %e, "Group send failed");
                    }
                    result
                }
            });

            for result in join_all(sends).await {
                match result {
                    Ok(count) => reached += count,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        tracing::debug!(reached = reached, "Web notification broadcast");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn group_name(prefix: &str, recipient: Uuid) -> String {
    format!("{}{}", prefix, recipient.simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records group names; fails for groups listed in `failing`.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl GroupTransport for RecordingTransport {
        async fn send_to_group(
            &self,
            group: &str,
            frame: Arc<str>,
        ) -> Result<usize, TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((group.to_string(), frame.to_string()));
            if self.failing.iter().any(|g| g == group) {
                return Err(TransportError::Rejected {
                    group: group.to_string(),
                    reason: "boom".to_string(),
                });
            }
            Ok(1)
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn enabled_config() -> WebConfig {
        WebConfig {
            enabled: true,
            ..WebConfig::default()
        }
    }

    fn publisher(transport: Arc<RecordingTransport>, config: WebConfig) -> WebNotificationPublisher {
        WebNotificationPublisher::new(transport, config, Duration::from_secs(1))
    }

    #[test]
    fn test_should_handle_channel_filtering() {
        let p = publisher(Arc::new(RecordingTransport::default()), enabled_config());
        let recipient = Uuid::new_v4();

        let tagged = NotificationEnvelope::new("x", [recipient]).with_channels(["Web"]);
        assert!(p.should_handle(&tagged));

        let untagged = NotificationEnvelope::new("x", [recipient]);
        assert!(!p.should_handle(&untagged));

        let push_only = NotificationEnvelope::new("x", [recipient]).with_channels(["push"]);
        assert!(!p.should_handle(&push_only));

        let nobody = NotificationEnvelope::new("x", Vec::<Uuid>::new()).with_channels(["web"]);
        assert!(!p.should_handle(&nobody));
    }

    #[test]
    fn test_should_handle_without_tag_requirement() {
        let config = WebConfig {
            require_channel_tag: false,
            ..enabled_config()
        };
        let p = publisher(Arc::new(RecordingTransport::default()), config);
        assert!(p.should_handle(&NotificationEnvelope::new("x", [Uuid::new_v4()])));
    }

    #[test]
    fn test_disabled_handles_nothing() {
        let p = publisher(Arc::new(RecordingTransport::default()), WebConfig::default());
        let envelope = NotificationEnvelope::new("x", [Uuid::new_v4()]).with_channels(["web"]);
        assert!(!p.should_handle(&envelope));
    }

    #[tokio::test]
    async fn test_publish_sends_invocation_per_group() {
        let transport = Arc::new(RecordingTransport::default());
        let config = WebConfig {
            max_batch_size: 2,
            ..enabled_config()
        };
        let p = publisher(transport.clone(), config);
        let recipients = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let envelope = NotificationEnvelope::new("x", recipients).with_channels(["web"]);

        p.publish(&envelope).await.unwrap();

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        for recipient in recipients {
            let expected = format!("user-{}", recipient.simple());
            let (_, frame) = sent.iter().find(|(g, _)| *g == expected).unwrap();
            let frame: serde_json::Value = serde_json::from_str(frame).unwrap();
            assert_eq!(frame["target"], "notificationReceived");
            assert_eq!(frame["arguments"][0]["event_id"], serde_json::json!(envelope.event_id));
        }
    }

    #[tokio::test]
    async fn test_any_failed_send_fails_publish_after_all_sends() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let transport = Arc::new(RecordingTransport {
            failing: vec![format!("user-{}", a.simple())],
            ..RecordingTransport::default()
        });
        let p = publisher(transport.clone(), enabled_config());
        let envelope = NotificationEnvelope::new("x", [a, b]).with_channels(["web"]);

        assert!(p.publish(&envelope).await.is_err());
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_group_name_uses_simple_uuid() {
        let id = Uuid::parse_str("0b8f4f2e-7c1a-4a4b-9d8e-2b1c3d4e5f60").unwrap();
        assert_eq!(group_name("user-", id), "user-0b8f4f2e7c1a4a4b9d8e2b1c3d4e5f60");
    }
}
