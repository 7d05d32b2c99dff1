//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::registry::{ConnectionDetail, ConnectionRegistry};

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections of every kind.
    pub active_connections: usize,
    /// Connection limit; accepts beyond it are refused.
    pub max_connections: usize,
    /// Registered broadcast connections.
    pub broadcast_connections: usize,
    /// Registered stream connections.
    pub stream_connections: usize,
    /// Running stream sessions.
    pub active_sessions: usize,
    /// One entry per registered connection.
    pub connection_details: Vec<ConnectionDetail>,
}

/// Build a health response from the registry and the running session count.
pub fn health_check(
    start_time: Instant,
    registry: &ConnectionRegistry,
    sessions: usize,
) -> HealthResponse {
    let (broadcast, stream) = registry.count_by_kind();
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_connections: registry.count(),
        max_connections: registry.max_connections(),
        broadcast_connections: broadcast,
        stream_connections: stream,
        active_sessions: sessions,
        connection_details: registry.details(),
    }
}
