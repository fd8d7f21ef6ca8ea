//! Wire types for realtime frames.
//!
//! Every text frame is a tagged union `{type, data}`. `type == "event"`
//! carries an event envelope; `type == "error"` carries a server error
//! object.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::RealtimeError;

pub(crate) const TYPE_ERROR: &str = "error";
pub(crate) const TYPE_EVENT: &str = "event";

/// The tagged union every text frame decodes to.
#[derive(Debug, Deserialize)]
pub(crate) struct RealtimeMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

/// An event delivered to subscription callbacks.
///
/// `payload` is kept as raw JSON; decode it into the shape a subscription
/// expects with [`RealtimeEvent::payload`].
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeEvent {
    /// The event names that fired (e.g. `databases.*.collections.*.documents.*.create`).
    #[serde(default)]
    pub events: Vec<String>,
    /// The channels this event was published to.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Server-side timestamp of the event.
    #[serde(default)]
    pub timestamp: String,
    /// The event payload, as raw JSON.
    #[serde(default)]
    pub payload: Value,
}

impl RealtimeEvent {
    /// Decode the payload into the shape this subscription expects.
    ///
    /// # Errors
    /// Returns [`RealtimeError::Protocol`] when the payload does not match
    /// `T`.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            RealtimeError::Protocol {
                message: format!("payload does not match expected shape: {e}"),
            }
            .into()
        })
    }
}

/// The error object inside an `error` frame.
#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode the `data` of an `error` frame into a [`RealtimeError`].
pub(crate) fn decode_server_error(data: &Value) -> RealtimeError {
    match serde_json::from_value::<ServerError>(data.clone()) {
        Ok(err) => RealtimeError::Server {
            code: err.code,
            error_type: err.error_type,
            message: err.message.unwrap_or_else(|| data.to_string()),
        },
        Err(_) => RealtimeError::Server {
            code: None,
            error_type: None,
            message: data.to_string(),
        },
    }
}
