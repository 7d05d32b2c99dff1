//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not well-formed JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser failure, with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// The merged document does not fit the settings shape, e.g. a string
    /// where a port number belongs.
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),

    /// A value is well-typed but unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// camelCase path of the offending key, e.g. `stream.minIntervalMs`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    /// Offending settings key, for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
