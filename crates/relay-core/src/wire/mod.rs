//! Wire codecs for the two transport contracts.
//!
//! | Module | Framing |
//! |--------|---------|
//! | `sse` | `event: <type>\ndata: <payload>\n\n` for the one-way stream |
//! | `chat` | `{"user","message"}` in, `"<user>: <message>"` out for broadcast |
//! | `command` | `{"action": "start_stream" \| "stop_stream"}` control frames |
//!
//! [`encode_json`] frames stream events for the duplex stream variant.

pub mod chat;
pub mod command;
pub mod sse;

use serde_json::json;

use crate::events::Event;

/// Encode an event as a JSON text frame `{"event": <type>, "data": <payload>}`.
pub fn encode_json(event: &Event) -> String {
    json!({
        "event": event.kind().as_str(),
        "data": event.data_json(),
    })
    .to_string()
}
