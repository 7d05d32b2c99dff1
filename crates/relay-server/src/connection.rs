//! Live client connection state shared by every transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use relay_core::wire::{encode_json, sse};
use relay_core::{ConnectionId, Event, RelayError, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// How stream events are framed on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventFraming {
    /// `event: <type>\ndata: <payload>\n\n`
    Sse,
    /// `{"event": <type>, "data": <payload>}` text frames.
    Json,
}

impl EventFraming {
    /// Encode one event as a single outbound frame.
    pub fn encode(self, event: &Event) -> String {
        match self {
            Self::Sse => sse::encode(event),
            Self::Json => encode_json(event),
        }
    }
}

/// Transport contract a connection was accepted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Bidirectional chat fan-out.
    Broadcast,
    /// One-way per-connection event stream.
    Stream(EventFraming),
}

impl ConnectionKind {
    /// Label used in health output and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Stream(_) => "stream",
        }
    }

    /// Whether this connection can own a stream session.
    pub fn is_stream(self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// A connected client.
///
/// Outbound frames go through a bounded queue drained by the transport task.
/// The `closed` token tells that task to end the transport; it is cancelled
/// whenever the connection leaves the registry.
pub struct ClientConnection {
    /// Unique connection ID, assigned at accept time.
    pub id: ConnectionId,
    /// Transport contract.
    pub kind: ConnectionKind,
    /// Monotonic accept time.
    pub connected_at: Instant,
    /// Wall-clock accept time.
    pub connected_at_utc: DateTime<Utc>,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection with a fresh id.
    pub fn new(kind: ConnectionKind, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: ConnectionId::new(),
            kind,
            connected_at: Instant::now(),
            connected_at_utc: Utc::now(),
            tx,
            closed: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection together with the receiving end of its queue.
    pub fn with_channel(
        kind: ConnectionKind,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(kind, tx)), rx)
    }

    /// Queue one frame without waiting.
    ///
    /// A full or closed queue is a [`RelayError::DeliveryFailure`]; the frame
    /// is dropped and never partially delivered. After [`close`](Self::close)
    /// every send is [`RelayError::TransportClosed`].
    pub fn send(&self, frame: Arc<String>) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::TransportClosed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                let reason = match err {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "transport closed",
                };
                Err(self.delivery_failure(reason))
            }
        }
    }

    /// Encode and queue a stream event using this connection's framing.
    pub fn send_event(&self, event: &Event) -> Result<()> {
        let framing = match self.kind {
            ConnectionKind::Stream(framing) => framing,
            ConnectionKind::Broadcast => {
                return Err(RelayError::NotStreamConnection(self.id.to_string()));
            }
        };
        self.send(Arc::new(framing.encode(event)))
    }

    fn delivery_failure(&self, reason: &str) -> RelayError {
        RelayError::DeliveryFailure {
            connection_id: self.id.to_string(),
            reason: reason.into(),
        }
    }

    /// Signal the transport task to close. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
