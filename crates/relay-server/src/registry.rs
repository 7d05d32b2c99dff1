//! Connection registry: the single shared table of live connections.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use parking_lot::RwLock;
use relay_core::{ConnectionId, RelayError, Result};
use serde::Serialize;
use tracing::debug;

use crate::connection::{ClientConnection, ConnectionKind};
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};

/// Diagnostic view of one registered connection.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionDetail {
    /// Connection id.
    pub id: ConnectionId,
    /// `"broadcast"` or `"stream"`.
    pub kind: &'static str,
    /// RFC 3339 accept time.
    pub connected_at: String,
    /// Seconds since accept.
    pub age_secs: u64,
    /// Frames refused because the outbound queue was full or gone.
    pub dropped_messages: u64,
}

/// Tracks live connections. Holds no knowledge of message content and
/// performs no transport I/O.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    count: AtomicUsize,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections` entries.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
            max_connections,
        }
    }

    /// Add a live connection.
    ///
    /// Fails with [`RelayError::Duplicate`] if this connection is already
    /// registered and with [`RelayError::ConnectionLimitExceeded`] when full.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Result<ConnectionId> {
        let mut conns = self.connections.write();
        if conns.contains_key(&connection.id) {
            return Err(RelayError::Duplicate(connection.id.to_string()));
        }
        if conns.len() >= self.max_connections {
            return Err(RelayError::ConnectionLimitExceeded {
                max: self.max_connections,
            });
        }
        let id = connection.id.clone();
        let kind = connection.kind.as_str();
        let _ = conns.insert(id.clone(), connection);
        let active = conns.len();
        self.count.store(active, Ordering::Release);
        drop(conns);

        counter!(CONNECTIONS_TOTAL, "kind" => kind).increment(1);
        gauge!(CONNECTIONS_ACTIVE).set(active as f64);
        debug!(conn_id = %id, kind, active, "connection registered");
        Ok(id)
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write();
        let removed = conns.remove(id)?;
        let active = conns.len();
        self.count.store(active, Ordering::Release);
        drop(conns);

        counter!(DISCONNECTIONS_TOTAL, "kind" => removed.kind.as_str()).increment(1);
        gauge!(CONNECTIONS_ACTIVE).set(active as f64);
        debug!(conn_id = %id, active, "connection unregistered");
        Some(removed)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Snapshot of registered ids.
    pub fn list_active(&self) -> BTreeSet<ConnectionId> {
        self.connections.read().keys().cloned().collect()
    }

    /// Number of registered connections. Lock-free.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Configured capacity.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of broadcast-kind connections.
    pub fn broadcast_connections(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.kind == ConnectionKind::Broadcast)
            .cloned()
            .collect()
    }

    /// `(broadcast, stream)` counts.
    pub fn count_by_kind(&self) -> (usize, usize) {
        let conns = self.connections.read();
        let broadcast = conns
            .values()
            .filter(|c| c.kind == ConnectionKind::Broadcast)
            .count();
        (broadcast, conns.len() - broadcast)
    }

    /// Per-connection diagnostics, oldest first.
    pub fn details(&self) -> Vec<ConnectionDetail> {
        let mut details: Vec<ConnectionDetail> = self
            .connections
            .read()
            .values()
            .map(|c| ConnectionDetail {
                id: c.id.clone(),
                kind: c.kind.as_str(),
                connected_at: c
                    .connected_at_utc
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                age_secs: c.age().as_secs(),
                dropped_messages: c.drop_count(),
            })
            .collect();
        details.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        details
    }
}
