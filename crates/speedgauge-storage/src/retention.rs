//! Retention policy for the telemetry log
//!
//! Every write re-applies two bounds to the whole log: an age bound and a
//! count bound. Nothing sweeps the log in the background, so a log that sees
//! no writes keeps its stale entries until the next one arrives.

use chrono::{DateTime, TimeDelta, Utc};

use crate::entry::StoredEntry;

/// Default maximum number of retained entries
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Default maximum entry age, in days
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

/// Count and age bounds applied on every write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of entries kept after a write
    max_entries: usize,
    /// Maximum age of a kept entry, relative to the write time
    max_age: TimeDelta,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_age: TimeDelta::days(DEFAULT_MAX_AGE_DAYS),
        }
    }
}

impl RetentionPolicy {
    /// Create a policy with the given bounds
    ///
    /// A `max_entries` of zero is raised to one so the entry being written
    /// always survives.
    pub fn new(max_entries: usize, max_age: TimeDelta) -> Self {
        Self {
            max_entries: max_entries.max(1),
            max_age,
        }
    }

    /// Replace the count bound
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Replace the age bound
    pub fn with_max_age(mut self, max_age: TimeDelta) -> Self {
        self.max_age = max_age;
        self
    }

    /// Get the count bound
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Get the age bound
    pub fn max_age(&self) -> TimeDelta {
        self.max_age
    }

    /// Whether an entry stamped at `received_at` is still fresh at `now`
    pub fn is_fresh(&self, received_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - received_at <= self.max_age
    }

    /// Apply both bounds to the existing entries plus one new entry
    ///
    /// Existing entries without a readable `receivedAt`, or older than the age
    /// bound at `now`, are dropped. The new entry is then appended and the
    /// oldest arrivals are evicted until the count bound holds.
    pub fn apply(
        &self,
        existing: Vec<StoredEntry>,
        new_entry: StoredEntry,
        now: DateTime<Utc>,
    ) -> (Vec<StoredEntry>, RetentionReport) {
        let mut report = RetentionReport::default();

        let mut kept: Vec<StoredEntry> = existing
            .into_iter()
            .filter(|entry| match entry.received_at {
                None => {
                    report.undated += 1;
                    false
                }
                Some(received_at) if !self.is_fresh(received_at, now) => {
                    report.expired += 1;
                    false
                }
                Some(_) => true,
            })
            .collect();

        kept.push(new_entry);

        let overflow = kept.len().saturating_sub(self.max_entries);
        if overflow > 0 {
            kept.drain(..overflow);
            report.evicted = overflow;
        }

        (kept, report)
    }
}

/// What a single application of the policy removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Entries dropped for a missing or unreadable `receivedAt`
    pub undated: usize,
    /// Entries dropped for exceeding the age bound
    pub expired: usize,
    /// Entries dropped to satisfy the count bound
    pub evicted: usize,
}

impl RetentionReport {
    /// Total number of entries removed
    pub fn removed(&self) -> usize {
        self.undated + self.expired + self.evicted
    }
}
