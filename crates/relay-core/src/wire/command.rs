//! Stream control commands sent over the duplex channel.

use serde::Deserialize;

use crate::errors::{RelayError, Result};

/// A start/stop request for the caller's own stream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCommand {
    /// `{"action": "start_stream"}`
    Start,
    /// `{"action": "stop_stream"}`
    Stop,
}

#[derive(Deserialize)]
struct Envelope {
    action: String,
}

impl StreamCommand {
    /// Parse a command frame. Unknown actions and non-command JSON are
    /// reported as [`RelayError::MalformedInput`] for the caller to log and
    /// ignore.
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| RelayError::MalformedInput(e.to_string()))?;
        match envelope.action.as_str() {
            "start_stream" => Ok(Self::Start),
            "stop_stream" => Ok(Self::Stop),
            other => Err(RelayError::MalformedInput(format!(
                "unknown action: {other}"
            ))),
        }
    }
}
