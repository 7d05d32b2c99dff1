//! Stream mode: per-connection generated event sequences.

pub mod manager;

pub use manager::{STOP_REASON, SessionState, StreamSessionManager};
