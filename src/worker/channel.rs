use std::sync::Arc;

use thiserror::Error;

use crate::broker::{BrokerError, BrokerPublisher};
use crate::envelope::{EnvelopeError, NotificationEnvelope};
use crate::metrics::WebMetrics;
use crate::realtime::{TransportError, WebNotificationPublisher};

/// Why a record could not be delivered. Recorded as the row's `last_error`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("web: {0}")]
    Transport(#[from] TransportError),
}

/// An enabled delivery channel.
#[derive(Clone)]
pub enum DeliveryChannel {
    Broker(Arc<BrokerPublisher>),
    Web(Arc<WebNotificationPublisher>),
}

impl DeliveryChannel {
    /// Keep only the channels whose configuration enables them.
    pub fn enabled(
        broker: Option<Arc<BrokerPublisher>>,
        web: Option<Arc<WebNotificationPublisher>>,
    ) -> Vec<DeliveryChannel> {
        let mut channels = Vec::new();
        if let Some(broker) = broker.filter(|b| b.is_enabled()) {
            channels.push(DeliveryChannel::Broker(broker));
        }
        if let Some(web) = web.filter(|w| w.is_enabled()) {
            channels.push(DeliveryChannel::Web(web));
        }
        channels
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryChannel::Broker(_) => "broker",
            DeliveryChannel::Web(_) => "web",
        }
    }

    pub async fn deliver(
        &self,
        payload: &str,
        envelope: &NotificationEnvelope,
    ) -> Result<(), DeliveryError> {
        match self {
            DeliveryChannel::Broker(publisher) => Ok(publisher.publish(payload, envelope).await?),
            DeliveryChannel::Web(publisher) => {
                if !publisher.should_handle(envelope) {
                    WebMetrics::record_skipped();
                    return Ok(());
                }
                Ok(publisher.publish(envelope).await?)
            }
        }
    }
}
