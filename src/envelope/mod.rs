//! Notification envelope: the payload stored in every outbox row.
//!
//! Producers serialize a [`NotificationEnvelope`] into `outbox_events.payload`;
//! the dispatch loop decodes it back before fanning it out. Field names are
//! snake_case on the wire and unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not a valid notification envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("envelope {event_id} has no recipients")]
    NoRecipients { event_id: Uuid },

    #[error("envelope has no event_id")]
    MissingEventId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(default)]
    pub event_id: Uuid,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub org_id: Option<Uuid>,
    /// Distinct recipients in first-seen order
    #[serde(default, deserialize_with = "distinct_recipients")]
    pub recipients: Vec<Uuid>,
    /// Delivery channel tags (`web`, `push`, ...); `None` means untagged
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub deep_link: Option<String>,
    #[serde(default)]
    pub extras: Option<Map<String, Value>>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

fn distinct_recipients<'de, D>(deserializer: D) -> Result<Vec<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Uuid>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(dedup_preserving_order(raw))
}

fn dedup_preserving_order(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

impl NotificationEnvelope {
    /// Create an envelope with a fresh event id and the current timestamp.
    pub fn new(event_type: impl Into<String>, recipients: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            org_id: None,
            recipients: dedup_preserving_order(recipients),
            channels: None,
            title: String::new(),
            body: String::new(),
            icon: None,
            severity: None,
            deep_link: None,
            extras: None,
            created_at: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.title = title.into();
        self.body = body.into();
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Decode a stored payload.
    pub fn decode(payload: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Serialize for storage in the outbox.
    pub fn to_payload(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check an envelope is deliverable: a non-nil `event_id` and at least one recipient.
    ///
    /// Broker deduplication ids are derived from `event_id`, so a missing id
    /// would make unrelated events collide.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event_id.is_nil() {
            return Err(EnvelopeError::MissingEventId);
        }
        self.ensure_recipients()
    }

    /// Envelopes without recipients must never be delivered.
    pub fn ensure_recipients(&self) -> Result<(), EnvelopeError> {
        if self.recipients.is_empty() {
            return Err(EnvelopeError::NoRecipients {
                event_id: self.event_id,
            });
        }
        Ok(())
    }

    /// Case-insensitive channel tag match. Untagged envelopes match nothing.
    pub fn has_channel(&self, tag: &str) -> bool {
        self.channels
            .as_deref()
            .is_some_and(|channels| channels.iter().any(|c| c.eq_ignore_ascii_case(tag)))
    }

    /// Correlation id, if present and not blank.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}
