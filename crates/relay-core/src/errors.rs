//! Error taxonomy for the push distribution layer.

/// Errors raised by the registry, hub, session manager, and wire codecs.
///
/// Every variant is contained to the connection or session that produced it;
/// none of them is ever propagated to another client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The transport went away. This is the normal termination path.
    #[error("transport closed")]
    TransportClosed,

    /// Inbound data failed to parse.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A send to one connection failed.
    #[error("delivery to {connection_id} failed: {reason}")]
    DeliveryFailure {
        /// Connection the send was addressed to.
        connection_id: String,
        /// What went wrong (`closed`, `full`).
        reason: String,
    },

    /// The event generator or its formatting step failed.
    #[error("event generation failed: {0}")]
    GenerationFailure(String),

    /// The server is already holding its maximum number of connections.
    #[error("connection limit exceeded (max {max})")]
    ConnectionLimitExceeded {
        /// Configured limit.
        max: usize,
    },

    /// The same transport handle was registered twice.
    #[error("connection already registered: {0}")]
    Duplicate(String),

    /// No live connection has this ID.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// The connection exists but is not of kind `stream`.
    #[error("connection {0} is not a stream connection")]
    NotStreamConnection(String),

    /// A stream connection was handed to the broadcast hub.
    #[error("connection {0} is not a broadcast connection")]
    NotBroadcastConnection(String),
}

impl RelayError {
    /// Stable category string for logs and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            Self::TransportClosed => "transport_closed",
            Self::MalformedInput(_) => "malformed_input",
            Self::DeliveryFailure { .. } => "delivery_failure",
            Self::GenerationFailure(_) => "generation_failure",
            Self::ConnectionLimitExceeded { .. } => "connection_limit_exceeded",
            Self::Duplicate(_) => "duplicate",
            Self::ConnectionNotFound(_) => "connection_not_found",
            Self::NotStreamConnection(_) => "not_stream_connection",
            Self::NotBroadcastConnection(_) => "not_broadcast_connection",
        }
    }

    /// Whether a stream session counts this error toward its failure threshold.
    pub fn counts_toward_escalation(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailure { .. } | Self::GenerationFailure(_)
        )
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
