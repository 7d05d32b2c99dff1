//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrently registered connections, all kinds combined.
    pub max_connections: usize,
    /// Outbound frames buffered per connection.
    pub channel_capacity: usize,
    /// WebSocket ping interval in seconds (`0` disables pings).
    pub ping_interval_secs: u64,
    /// Lower bound of the pause between stream readings, in milliseconds.
    pub min_interval_ms: u64,
    /// Upper bound of the pause between stream readings, in milliseconds.
    pub max_interval_ms: u64,
    /// Consecutive failures that terminate a stream session.
    pub failure_threshold: u32,
}

impl ServerConfig {
    /// Ping interval, or `None` when pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            channel_capacity: 256,
            ping_interval_secs: 30,
            min_interval_ms: 500,
            max_interval_ms: 2000,
            failure_threshold: 3,
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            channel_capacity: settings.server.channel_capacity,
            ping_interval_secs: settings.server.ping_interval_secs,
            min_interval_ms: settings.stream.min_interval_ms,
            max_interval_ms: settings.stream.max_interval_ms,
            failure_threshold: settings.stream.failure_threshold,
        }
    }
}
