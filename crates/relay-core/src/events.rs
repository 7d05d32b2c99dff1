//! Events pushed to stream clients.
//!
//! An [`Event`] is a type tag plus a payload. Data events carry a sensor
//! [`Reading`]; control events (`connected`, `error`, `close`) carry a short
//! human-readable text. Events are transient values and are never stored
//! after delivery.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Text of the `connected` event that opens every stream session.
pub const CONNECTED_TEXT: &str = "Connection established";

/// Event type tag as it appears on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Session started.
    Connected,
    /// One generated reading.
    Message,
    /// The session failed and was terminated.
    Error,
    /// The session was stopped.
    Close,
}

impl EventKind {
    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Message => "message",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One synthetic sensor sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Degrees Celsius, within `[18.0, 28.0]`.
    pub temperature: f64,
    /// Relative humidity percent, within `[30.0, 80.0]`.
    pub humidity: f64,
    /// Hectopascal, within `[1000.0, 1020.0]`.
    pub pressure: f64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Wall-clock time of the sample as `HH:MM:SS`.
    fn display_time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }

    /// Presentation payload: the three readings, an RFC 3339 timestamp,
    /// and the human-readable time.
    pub fn to_payload(&self) -> Value {
        json!({
            "temperature": self.temperature,
            "humidity": self.humidity,
            "pressure": self.pressure,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "time": self.display_time(),
        })
    }
}

/// Event payload.
#[derive(Clone, Debug, PartialEq)]
pub enum EventData {
    /// Free text used by control events.
    Text(String),
    /// A generated reading.
    Reading(Reading),
}

/// An immutable event addressed to one stream connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    kind: EventKind,
    data: EventData,
}

impl Event {
    /// The `connected` control event.
    pub fn connected() -> Self {
        Self {
            kind: EventKind::Connected,
            data: EventData::Text(CONNECTED_TEXT.to_owned()),
        }
    }

    /// A `message` event carrying one reading.
    pub fn message(reading: Reading) -> Self {
        Self {
            kind: EventKind::Message,
            data: EventData::Reading(reading),
        }
    }

    /// An `error` control event with a description.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            data: EventData::Text(description.into()),
        }
    }

    /// A `close` control event with a reason.
    pub fn close(reason: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Close,
            data: EventData::Text(reason.into()),
        }
    }

    /// Type tag.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Payload.
    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Payload as a JSON value (text becomes a JSON string).
    pub fn data_json(&self) -> Value {
        match &self.data {
            EventData::Text(text) => Value::String(text.clone()),
            EventData::Reading(reading) => reading.to_payload(),
        }
    }

    /// Payload as text: control text verbatim, readings as compact JSON.
    pub fn data_string(&self) -> String {
        match &self.data {
            EventData::Text(text) => text.clone(),
            EventData::Reading(reading) => reading.to_payload().to_string(),
        }
    }
}
