//! Error types for speedgauge-storage
//!
//! This module defines the error types used throughout the storage crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in log storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// The directory that should hold the log file does not exist
    #[error("Log directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The log file could not be opened for read-write
    #[error("Failed to open log file: {0}")]
    Open(String),

    /// The exclusive lock could not be taken
    #[error("Failed to lock log file: {0}")]
    Lock(String),

    /// Another writer held the lock for longer than the acquisition timeout
    #[error("Timed out after {0:?} waiting for the log lock")]
    LockTimeout(Duration),

    /// I/O error while reading or rewriting the log
    #[error("I/O error: {0}")]
    Io(String),

    /// Error during serialization of a new entry
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// Create a new DirectoryUnavailable error
    pub fn directory_unavailable(path: impl Into<String>) -> Self {
        Self::DirectoryUnavailable(path.into())
    }

    /// Create a new Open error
    pub fn open(message: impl Into<String>) -> Self {
        Self::Open(message.into())
    }

    /// Create a new Lock error
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Whether the failure happened before the critical section was entered.
    ///
    /// Acquisition failures leave the log untouched; anything else may have
    /// happened with the lock held.
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable(_) | Self::Open(_) | Self::Lock(_) | Self::LockTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_unavailable_error() {
        let err = StorageError::directory_unavailable("/missing/dir");
        assert!(matches!(err, StorageError::DirectoryUnavailable(_)));
        assert!(err.to_string().contains("/missing/dir"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let storage_err: StorageError = json_err.into();
        assert!(matches!(storage_err, StorageError::Serialization(_)));
    }

    #[test]
    fn test_acquisition_failures() {
        assert!(StorageError::open("nope").is_acquisition_failure());
        assert!(StorageError::lock("busy").is_acquisition_failure());
        assert!(StorageError::LockTimeout(Duration::from_millis(5)).is_acquisition_failure());
        assert!(!StorageError::io("disk full").is_acquisition_failure());
    }
}
