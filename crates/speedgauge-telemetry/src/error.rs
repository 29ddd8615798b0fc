//! Error types for speedgauge-telemetry

use std::path::PathBuf;

use speedgauge_storage::StorageError;
use thiserror::Error;

/// Why an ingest request was rejected
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request body was empty
    #[error("Empty payload")]
    EmptyPayload,

    /// The body was not JSON, or was JSON but not an object
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),

    /// The body exceeded the configured size limit
    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The log could not be opened, locked, or rewritten
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

impl IngestError {
    /// Create a new InvalidPayload error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Whether the caller sent something unacceptable, as opposed to a
    /// server-side failure the caller may retry
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::StorageUnavailable(_))
    }
}

/// Errors loading the service configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a new Invalid error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
