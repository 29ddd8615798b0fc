//! Process-wide ingestion counters
//!
//! Corrupt lines are recovered silently on the write path; these counters
//! keep that recovery visible.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::retention::RetentionReport;

/// Atomic counters updated by every append
#[derive(Debug, Default)]
pub struct LogStats {
    appends: AtomicU64,
    failures: AtomicU64,
    corrupt_lines: AtomicU64,
    undated: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl LogStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed append
    pub fn record_append(&self, corrupt_lines: usize, report: &RetentionReport) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.corrupt_lines
            .fetch_add(corrupt_lines as u64, Ordering::Relaxed);
        self.undated
            .fetch_add(report.undated as u64, Ordering::Relaxed);
        self.expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);
        self.evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
    }

    /// Record a failed append
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            corrupt_lines: self.corrupt_lines.load(Ordering::Relaxed),
            undated: self.undated.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`LogStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Successful appends
    pub appends: u64,
    /// Appends that failed after validation
    pub failures: u64,
    /// Stored lines dropped because they were not JSON objects
    pub corrupt_lines: u64,
    /// Stored entries dropped for a missing or unreadable `receivedAt`
    pub undated: u64,
    /// Stored entries dropped by the age bound
    pub expired: u64,
    /// Stored entries dropped by the count bound
    pub evicted: u64,
}
