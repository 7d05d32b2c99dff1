//! Broadcast chat framing.
//!
//! Inbound frames are JSON objects `{"user": ..., "message": ...}`. Outbound
//! frames are the flat string `"<user>: <message>"`, not JSON.

use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, Result};

/// Sender name used when an inbound frame is not a valid chat object.
pub const ANONYMOUS: &str = "Anonymous";

/// One chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sender.
    pub user: String,
    /// Message body.
    pub message: String,
}

impl ChatMessage {
    /// Create a message.
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
        }
    }

    /// Strictly decode an inbound frame.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedInput(e.to_string()))
    }

    /// Decode an inbound frame, treating anything that is not a chat object
    /// as raw text from [`ANONYMOUS`].
    pub fn decode_lenient(text: &str) -> Self {
        Self::decode(text).unwrap_or_else(|_| Self::new(ANONYMOUS, text))
    }

    /// Outbound wire form.
    pub fn render(&self) -> String {
        format!("{}: {}", self.user, self.message)
    }
}
