//! # SpeedGauge Storage
//!
//! Durable, bounded storage for the SpeedGauge telemetry sink.
//!
//! The telemetry log is a single newline-delimited JSON resource shared by
//! every concurrent writer. Each write runs a read-filter-append-truncate-rewrite
//! cycle under an exclusive lock, so the log never exceeds its count bound,
//! never keeps entries past its age bound (as of the last write), and never
//! loses a concurrent write.
//!
//! ## Features
//!
//! - **LogStore trait**: Exclusive acquire/release contract over the log resource
//! - **FileLogStore**: JSONL file guarded by an in-process mutex and an advisory file lock
//! - **InMemoryLogStore**: In-memory implementation for tests
//! - **RetentionPolicy**: Count bound (default 500) and age bound (default 30 days)
//! - **TelemetryLog**: The write protocol, with per-write accounting and counters
//!
//! ## Example
//!
//! ```rust,ignore
//! use speedgauge_storage::{CallerMetadata, FileLogStore, RetentionPolicy, TelemetryLog};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = FileLogStore::open("./data/telemetry-log.jsonl");
//!     let log = TelemetryLog::new(store, RetentionPolicy::default());
//!
//!     let outcome = log
//!         .append(json!({"event": "end"}), CallerMetadata::default())
//!         .await
//!         .unwrap();
//!     assert!(outcome.entries >= 1);
//! }
//! ```

pub mod clock;
pub mod entry;
pub mod error;
pub mod file;
pub mod memory;
pub mod retention;
pub mod stats;
pub mod telemetry_log;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CallerMetadata, StoredEntry, TelemetryEvent};
pub use error::StorageError;
pub use file::{FileLogConfig, FileLogGuard, FileLogStore};
pub use memory::{InMemoryLogGuard, InMemoryLogStore};
pub use retention::{RetentionPolicy, RetentionReport};
pub use stats::{LogStats, StatsSnapshot};
pub use telemetry_log::{AppendOutcome, TelemetryLog};

use async_trait::async_trait;

/// A log resource that can be held exclusively
///
/// Every read or rewrite of the resource happens through a guard obtained
/// from [`LogStore::acquire`]. At most one guard exists at a time across all
/// users of the resource; the lock is released when the guard is dropped.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Guard type granting exclusive access
    type Guard: LogGuard;

    /// Take exclusive access to the resource
    ///
    /// Waits while another guard is alive, up to the store's acquisition
    /// timeout if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be located or opened, or if
    /// the lock cannot be taken in time. The lock is never held on error.
    async fn acquire(&self) -> Result<Self::Guard, StorageError>;
}

/// Exclusive access to a log resource
#[async_trait]
pub trait LogGuard: Send {
    /// Read the full current content
    async fn read_all(&mut self) -> Result<Vec<u8>, StorageError>;

    /// Replace the full content and make it durable
    ///
    /// Truncates the resource and writes `contents` in its place.
    async fn rewrite(&mut self, contents: &[u8]) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Test that the LogGuard trait is object-safe
    fn _assert_object_safe(_: &dyn LogGuard) {}

    #[tokio::test]
    async fn test_in_memory_log() {
        let store = InMemoryLogStore::new();
        let log = TelemetryLog::new(store.clone(), RetentionPolicy::default());

        for i in 1..=5 {
            let outcome = log
                .append(json!({"seq": i}), CallerMetadata::default())
                .await
                .unwrap();
            assert_eq!(outcome.entries, i);
        }

        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| e.received_at.is_some()));
    }

    #[tokio::test]
    async fn test_small_policy_integration() {
        let store = InMemoryLogStore::new();
        let log = TelemetryLog::new(store.clone(), RetentionPolicy::default().with_max_entries(5));

        for i in 1..=6 {
            log.append(json!({"seq": i}), CallerMetadata::default())
                .await
                .unwrap();
        }

        let lines = store.lines().await;
        assert_eq!(lines.len(), 5);
        assert!(!lines.iter().any(|l| l.contains("\"seq\":1}")));
        assert!(lines[4].contains("\"seq\":6}"));
    }
}
