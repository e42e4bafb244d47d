//! Wire shapes exchanged with subscribers and the event source.
//!
//! The bridge speaks JSON in both directions: submissions arrive as
//! `{type?, data?}` bodies on `POST /broadcast`, fan-out messages leave as
//! either a single envelope or a `batch` wrapper over a WebSocket.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Event type that is always treated as high priority.
pub const LOG_EVENT_TYPE: &str = "rfid-log";

/// Current time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A single event enriched with a server-side receipt timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(rename = "receivedAt")]
    pub received_at: String,
}

impl Envelope {
    /// Build an envelope from a decoded submission body.
    ///
    /// A missing or empty `type` defaults to [`LOG_EVENT_TYPE`]; a missing
    /// `data` field means the whole body is the payload.
    pub fn from_submission(body: Value) -> Self {
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(LOG_EVENT_TYPE)
            .to_string();

        let data = match body.get("data") {
            Some(value) if !value.is_null() => value.clone(),
            _ => body,
        };

        Self {
            kind,
            data,
            received_at: now_rfc3339(),
        }
    }

    /// Whether this event belongs in the high-priority bucket.
    pub fn is_high_priority(&self) -> bool {
        self.kind == LOG_EVENT_TYPE
    }
}

/// Greeting sent to a subscriber immediately after it connects.
pub fn welcome_message(client_id: &str) -> Value {
    json!({
        "type": "welcome",
        "data": {
            "message": "Connected to RFID live updates",
            "connectedAt": now_rfc3339(),
            "clientId": client_id,
        },
    })
}

/// Serialize a drained batch for fan-out.
///
/// One item is sent as-is; several are wrapped in a `batch` envelope so
/// every subscriber receives byte-identical text.
pub fn encode_flush(items: &[Envelope]) -> Option<String> {
    match items {
        [] => None,
        [single] => serde_json::to_string(single).ok(),
        many => serde_json::to_string(&json!({
            "type": "batch",
            "data": many,
            "count": many.len(),
        }))
        .ok(),
    }
}
