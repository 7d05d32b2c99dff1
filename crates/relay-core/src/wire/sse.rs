//! Text-event-stream framing.
//!
//! Each event is written as `event: <type>\n` followed by one `data: ` line per
//! payload line, terminated by a blank line. Payloads without newlines (every
//! event Relay produces) therefore encode to exactly
//! `event: <type>\ndata: <payload>\n\n`.

use crate::events::Event;

/// MIME type of the stream response.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Encode one event as a complete SSE frame.
pub fn encode(event: &Event) -> String {
    encode_raw(event.kind().as_str(), &event.data_string())
}

fn encode_raw(event_type: &str, data: &str) -> String {
    let mut frame = String::with_capacity(event_type.len() + data.len() + 16);
    frame.push_str("event: ");
    frame.push_str(event_type);
    frame.push('\n');
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.trim_end_matches('\r'));
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// A decoded SSE frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field (`"message"` when absent).
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental decoder for a text-event-stream body.
///
/// Chunks may split frames at any byte boundary; complete frames are
/// returned as soon as their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain every frame it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_owned()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event: event.unwrap_or_else(|| "message".to_owned()),
        data: data.join("\n"),
    })
}
