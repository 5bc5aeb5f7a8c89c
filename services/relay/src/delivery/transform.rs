//! Event Transformer
//!
//! Turns a Pub/Sub CloudEvent into the detail sent to the event bus.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{RelayError, Result};

/// CloudEvent delivered by the Pub/Sub trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub source: String,
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub time: Option<String>,
    pub data: PubSubPush,
}

/// Pub/Sub push body carried as the CloudEvent data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubPush {
    pub message: PubSubMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubMessage {
    /// Base64-encoded message body
    #[serde(default)]
    pub data: String,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(rename = "publishTime", default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

/// Event detail forwarded to the bus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPayload {
    /// Decoded Pub/Sub message body
    pub event: Value,
    #[serde(rename = "type")]
    pub event_type: String,
    pub specversion: String,
    pub source: String,
    pub id: String,
    pub time: Option<String>,
}

impl DeliveryPayload {
    /// JSON text used as the bus entry detail
    pub fn to_detail(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Dispatch(format!("Failed to serialize event detail: {e}")))
    }
}

/// Decode the envelope's message into a payload.
///
/// Returns `None` when the message is not base64-encoded JSON; such
/// messages are not forwardable and are dropped by the caller.
pub fn transform(envelope: &Envelope) -> Option<DeliveryPayload> {
    let raw = match STANDARD.decode(envelope.data.message.data.trim()) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(event_id = %envelope.id, "Message data is not base64: {}", e);
            return None;
        }
    };

    let event = match serde_json::from_slice::<Value>(&raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(
                event_id = %envelope.id,
                bytes = raw.len(),
                "Message data is not JSON: {}",
                e
            );
            return None;
        }
    };

    Some(DeliveryPayload {
        event,
        event_type: envelope.event_type.clone(),
        specversion: envelope.specversion.clone(),
        source: envelope.source.clone(),
        id: envelope.id.clone(),
        time: envelope.time.clone(),
    })
}
