//! Bus message envelope.

use chrono::{DateTime, Utc};
use rice_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope carried by every bus event.
///
/// Payloads travel as JSON so the envelope stays transport-ready; callers
/// use [`BusMessage::event`] / [`BusMessage::decode`] for typed access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    pub topic: String,
    /// Set on requests and copied onto their responses
    pub correlation_id: Option<String>,
    /// Overrides the conventional `<topic>.response` reply topic
    pub reply_to: Option<String>,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Build an event for `topic` from a serializable payload.
    pub fn event<T: Serialize>(topic: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            correlation_id: None,
            reply_to: None,
            payload: serde_json::to_value(payload)?,
            published_at: Utc::now(),
        })
    }

    /// Build a request: like [`BusMessage::event`] but with a fresh
    /// correlation id.
    pub fn request<T: Serialize>(topic: &str, payload: &T) -> Result<Self> {
        let mut message = Self::event(topic, payload)?;
        message.correlation_id = Some(Uuid::new_v4().to_string());
        Ok(message)
    }

    /// Build the response to this message, preserving its correlation id
    /// and targeting its reply topic.
    pub fn reply<T: Serialize>(&self, payload: &T) -> Result<Self> {
        let topic = self
            .reply_to
            .clone()
            .unwrap_or_else(|| crate::topics::response_topic(&self.topic));
        Ok(Self {
            id: Uuid::new_v4(),
            topic,
            correlation_id: self.correlation_id.clone(),
            reply_to: None,
            payload: serde_json::to_value(payload)?,
            published_at: Utc::now(),
        })
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(Error::from)
    }
}
