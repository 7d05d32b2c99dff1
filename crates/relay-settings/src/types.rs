//! Settings types with compiled defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.relay/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Stream session pacing and escalation.
    pub stream: StreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.min_interval_ms > self.stream.max_interval_ms {
            return Err(invalid(
                "stream.minIntervalMs",
                format!(
                    "{} exceeds stream.maxIntervalMs ({})",
                    self.stream.min_interval_ms, self.stream.max_interval_ms
                ),
            ));
        }
        if self.stream.failure_threshold == 0 {
            return Err(invalid("stream.failureThreshold", "must be at least 1"));
        }
        if self.server.channel_capacity == 0 {
            return Err(invalid("server.channelCapacity", "must be at least 1"));
        }
        if self.server.max_connections == 0 {
            return Err(invalid("server.maxConnections", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Server network settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrently registered connections.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before sends fail.
    pub channel_capacity: usize,
    /// Seconds between transport pings on WebSocket connections (`0` disables).
    pub ping_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 1000,
            channel_capacity: 256,
            ping_interval_secs: 30,
        }
    }
}

/// Stream session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Lower bound of the pause between readings, in milliseconds.
    pub min_interval_ms: u64,
    /// Upper bound of the pause between readings, in milliseconds.
    pub max_interval_ms: u64,
    /// Consecutive failures that terminate a session.
    pub failure_threshold: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_interval_ms: 2000,
            failure_threshold: 3,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
