//! # relay-core
//!
//! Foundation types shared by every Relay crate:
//!
//! - **Branded IDs**: `ConnectionId`, `StreamSessionId` as newtypes over UUID v7 strings
//! - **Events**: `Event` with its `EventKind` tag and `Reading` payload
//! - **Errors**: `RelayError` taxonomy via `thiserror`
//! - **Wire codecs**: text-event-stream framing, chat line framing, JSON
//!   framing, and stream control commands

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod wire;

pub use errors::{RelayError, Result};
pub use events::{Event, EventData, EventKind, Reading};
pub use ids::{ConnectionId, StreamSessionId};
