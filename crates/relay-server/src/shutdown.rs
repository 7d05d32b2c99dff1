//! Server shutdown.
//!
//! Shutdown runs in a fixed order: refuse new connections, stop every stream
//! session (each client gets its `close` event), close every registered
//! connection, then release the HTTP listener. [`ShutdownCoordinator::drain`]
//! additionally waits for the listener task within a grace period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;
use crate::stream::StreamSessionManager;

/// Grace period for the listener task when none is given.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What one shutdown pass tore down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Running stream sessions that were stopped.
    pub stopped_sessions: usize,
    /// Connections that were closed.
    pub closed_connections: usize,
}

/// Owns the relay's teardown sequence.
pub struct ShutdownCoordinator {
    registry: Arc<ConnectionRegistry>,
    streams: Arc<StreamSessionManager>,
    refusing: AtomicBool,
    listener: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator over the server's registry and session manager.
    pub fn new(registry: Arc<ConnectionRegistry>, streams: Arc<StreamSessionManager>) -> Self {
        Self {
            registry,
            streams,
            refusing: AtomicBool::new(false),
            listener: CancellationToken::new(),
        }
    }

    /// Token the HTTP listener waits on before it stops accepting.
    pub fn listener_token(&self) -> CancellationToken {
        self.listener.clone()
    }

    /// Whether new connections should be refused.
    pub fn is_shutting_down(&self) -> bool {
        self.refusing.load(Ordering::Acquire)
    }

    /// Run the teardown sequence. Only the first call does any work; later
    /// calls return an empty report.
    pub fn initiate(&self) -> ShutdownReport {
        if self.refusing.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }

        let stopped_sessions = self.streams.stop_all();
        let mut closed_connections = 0;
        for id in self.registry.list_active() {
            if let Some(conn) = self.registry.get(&id) {
                conn.close();
                closed_connections += 1;
            }
        }
        self.listener.cancel();

        let report = ShutdownReport {
            stopped_sessions,
            closed_connections,
        };
        info!(
            stopped_sessions,
            closed_connections, "relay shutdown initiated"
        );
        report
    }

    /// Initiate shutdown if needed and wait for the listener task.
    ///
    /// Returns `false` when the task did not finish within `timeout`
    /// (default [`DEFAULT_DRAIN_TIMEOUT`]).
    pub async fn drain(&self, server: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let _ = self.initiate();
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);

        match tokio::time::timeout(timeout, server).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "server task ended abnormally");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    remaining = self.registry.count(),
                    "drain timed out with connections still open"
                );
                false
            }
        }
    }
}
