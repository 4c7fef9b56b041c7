//! Event frames and their wire encoding.
//!
//! A frame is one self-contained unit written to a subscriber:
//!
//! ```text
//! event: <type>
//! data: <json-payload>
//!
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use stockwire_core::{ChangeEvent, ClientId};

/// Kind of frame sent to a subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First frame on every connection; carries the assigned client id.
    Connected,
    /// A data mutation happened.
    Update,
    /// Keepalive.
    Heartbeat,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Update => "update",
            EventType::Heartbeat => "heartbeat",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFrame {
    event_type: EventType,
    payload: JsonValue,
    timestamp: DateTime<Utc>,
}

impl EventFrame {
    pub fn new(event_type: EventType, payload: JsonValue) -> Self {
        Self {
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn connected(client_id: ClientId) -> Self {
        let timestamp = Utc::now();
        Self {
            event_type: EventType::Connected,
            payload: json!({
                "client_id": client_id.to_string(),
                "timestamp": timestamp.to_rfc3339(),
            }),
            timestamp,
        }
    }

    pub fn heartbeat() -> Self {
        let timestamp = Utc::now();
        Self {
            event_type: EventType::Heartbeat,
            payload: json!({ "timestamp": timestamp.to_rfc3339() }),
            timestamp,
        }
    }

    pub fn update(event: &ChangeEvent) -> Self {
        Self {
            event_type: EventType::Update,
            payload: json!({
                "table": event.table,
                "operation": event.operation,
                "key": event.key,
                "timestamp": event.timestamp.to_rfc3339(),
            }),
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Compact single-line JSON for the `data:` field.
    pub fn data(&self) -> String {
        self.payload.to_string()
    }

    /// Full wire representation, terminated by a blank line.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type, self.data())
    }
}
