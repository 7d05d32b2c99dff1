//! Broadcast fan-out to every connected chat client.

use std::sync::Arc;

use metrics::counter;
use relay_core::{ConnectionId, RelayError, Result};
use tracing::{debug, warn};

use crate::connection::{ClientConnection, ConnectionKind};
use crate::metrics::{BROADCAST_DELIVERY_FAILURES_TOTAL, BROADCAST_MESSAGES_TOTAL};
use crate::registry::ConnectionRegistry;

/// Delivers each message to every registered broadcast connection and evicts
/// the ones that fail.
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastHub {
    /// Create a hub over the shared registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Register a broadcast connection. Stream connections are refused with
    /// [`RelayError::NotBroadcastConnection`].
    pub fn connect(&self, connection: Arc<ClientConnection>) -> Result<ConnectionId> {
        if connection.kind != ConnectionKind::Broadcast {
            return Err(RelayError::NotBroadcastConnection(connection.id.to_string()));
        }
        self.registry.register(connection)
    }

    /// Remove a connection and signal its transport to close. Idempotent.
    pub fn disconnect(&self, id: &ConnectionId) {
        if let Some(conn) = self.registry.unregister(id) {
            conn.close();
        }
    }

    /// Deliver `message` to every broadcast connection, the sender included.
    ///
    /// Each recipient is attempted independently. Recipients whose delivery
    /// fails are removed before this returns. Returns the number of
    /// successful deliveries.
    pub fn broadcast(&self, message: &str) -> usize {
        let recipients = self.registry.broadcast_connections();
        let frame = Arc::new(message.to_owned());
        let mut failed = Vec::new();
        let mut delivered = 0;

        for conn in &recipients {
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(RelayError::TransportClosed) => {
                    debug!(conn_id = %conn.id, "recipient already closed, removing connection");
                    failed.push(conn.id.clone());
                }
                Err(e) => {
                    warn!(conn_id = %conn.id, error = %e, "broadcast delivery failed, removing connection");
                    failed.push(conn.id.clone());
                }
            }
        }

        for id in &failed {
            self.disconnect(id);
        }

        counter!(BROADCAST_MESSAGES_TOTAL).increment(1);
        if !failed.is_empty() {
            counter!(BROADCAST_DELIVERY_FAILURES_TOTAL).increment(failed.len() as u64);
        }
        debug!(
            recipients = recipients.len(),
            delivered,
            removed = failed.len(),
            "broadcast message"
        );
        delivered
    }

    /// Number of registered connections (all kinds).
    pub fn count(&self) -> usize {
        self.registry.count()
    }
}
