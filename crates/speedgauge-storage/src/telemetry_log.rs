//! The bounded telemetry log
//!
//! [`TelemetryLog::append`] runs the whole write protocol inside one
//! exclusive critical section: read every stored line, drop corrupt and stale
//! entries, append the new entry, trim to the count bound, and rewrite the
//! resource before the lock is released.

use std::sync::Arc;

use serde_json::Value;
use tracing::{Instrument, debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::entry::{self, CallerMetadata, StoredEntry, TelemetryEvent};
use crate::error::StorageError;
use crate::retention::{RetentionPolicy, RetentionReport};
use crate::stats::{LogStats, StatsSnapshot};
use crate::{LogGuard, LogStore};

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Number of entries in the log after the write
    pub entries: usize,
    /// Stored lines dropped because they were not JSON objects
    pub corrupt_lines: usize,
    /// What the retention policy removed
    pub retention: RetentionReport,
}

/// A durable, bounded log of telemetry events
///
/// The store, clock and counters live behind one `Arc` shared with in-flight writes.
pub struct TelemetryLog<S: LogStore, C: Clock = SystemClock> {
    shared: Arc<Shared<S, C>>,
}

struct Shared<S, C> {
    store: S,
    clock: C,
    policy: RetentionPolicy,
    stats: LogStats,
}

impl<S: LogStore> TelemetryLog<S> {
    /// Create a log over the given store using the system clock
    pub fn new(store: S, policy: RetentionPolicy) -> Self {
        Self::with_clock(store, policy, SystemClock)
    }
}

impl<S: LogStore, C: Clock> TelemetryLog<S, C> {
    /// Create a log with an explicit clock
    pub fn with_clock(store: S, policy: RetentionPolicy, clock: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                clock,
                policy,
                stats: LogStats::new(),
            }),
        }
    }

    /// Point-in-time copy of the ingestion counters
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Append one event, enforcing the retention policy
    ///
    /// The write cycle runs on its own task. Dropping the returned future
    /// (a disconnected client, a caller-side timeout) detaches from that
    /// task but never interrupts it, so a rewrite that has started always
    /// finishes before the lock is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be acquired within its timeout or
    /// if reading or rewriting the resource fails. Corrupt stored lines are
    /// never an error.
    #[instrument(skip_all)]
    pub async fn append(
        &self,
        payload: Value,
        caller: CallerMetadata,
    ) -> Result<AppendOutcome, StorageError> {
        let shared = Arc::clone(&self.shared);
        let task =
            tokio::spawn(async move { shared.append(payload, caller).await }.in_current_span());

        task.await
            .map_err(|e| StorageError::io(format!("write task failed: {e}")))?
    }

    /// Read the currently stored entries without modifying the log
    ///
    /// Takes the same exclusive lock as writers so it never observes a
    /// rewrite in progress. Corrupt lines are skipped.
    pub async fn entries(&self) -> Result<Vec<StoredEntry>, StorageError> {
        let mut guard = self.shared.store.acquire().await?;
        let raw = guard.read_all().await?;
        Ok(entry::decode_lines(&raw).entries)
    }
}

impl<S: LogStore, C: Clock> Shared<S, C> {
    async fn append(
        &self,
        payload: Value,
        caller: CallerMetadata,
    ) -> Result<AppendOutcome, StorageError> {
        let result = self.append_locked(payload, caller).await;
        match &result {
            Ok(outcome) => {
                self.stats
                    .record_append(outcome.corrupt_lines, &outcome.retention);
                debug!(
                    entries = outcome.entries,
                    corrupt = outcome.corrupt_lines,
                    removed = outcome.retention.removed(),
                    "Stored telemetry event"
                );
            }
            Err(e) => {
                self.stats.record_failure();
                warn!(error = %e, "Failed to store telemetry event");
            }
        }
        result
    }

    async fn append_locked(
        &self,
        payload: Value,
        caller: CallerMetadata,
    ) -> Result<AppendOutcome, StorageError> {
        let mut guard = self.store.acquire().await?;

        let raw = guard.read_all().await?;
        let decoded = entry::decode_lines(&raw);

        let now = self.clock.now();
        let event = TelemetryEvent::new(now, caller, payload);
        let new_entry = StoredEntry::from_event(&event)?;

        let (kept, retention) = self.policy.apply(decoded.entries, new_entry, now);
        guard.rewrite(&entry::encode_lines(&kept)).await?;
        drop(guard);

        Ok(AppendOutcome {
            entries: kept.len(),
            corrupt_lines: decoded.corrupt_lines,
            retention,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryLogStore;
    use chrono::{DateTime, TimeDelta, Utc};
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn line_at(received_at: DateTime<Utc>, id: usize) -> String {
        format!(
            "{{\"receivedAt\":\"{}\",\"remoteAddr\":null,\"userAgent\":null,\"payload\":{{\"id\":{id}}}}}\n",
            received_at.to_rfc3339()
        )
    }

    fn create_log(
        store: InMemoryLogStore,
    ) -> (TelemetryLog<InMemoryLogStore, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let log = TelemetryLog::with_clock(store, RetentionPolicy::default(), Arc::clone(&clock));
        (log, clock)
    }

    #[tokio::test]
    async fn test_first_append() {
        let store = InMemoryLogStore::new();
        let (log, _clock) = create_log(store.clone());

        let outcome = log
            .append(
                json!({"event": "end", "value": 42}),
                CallerMetadata::new(Some("198.51.100.4".into()), Some("probe/1.0".into())),
            )
            .await
            .unwrap();
        assert_eq!(outcome.entries, 1);

        let lines = store.lines().await;
        assert_eq!(lines.len(), 1);
        let stored: TelemetryEvent = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(stored.payload, json!({"event": "end", "value": 42}));
        assert_eq!(stored.received_at, start());
        assert_eq!(stored.remote_addr.as_deref(), Some("198.51.100.4"));
        assert_eq!(stored.user_agent.as_deref(), Some("probe/1.0"));
    }

    #[tokio::test]
    async fn test_count_bound() {
        let content: String = (0..500).map(|i| line_at(start(), i)).collect();
        let store = InMemoryLogStore::with_content(content);
        let (log, _clock) = create_log(store.clone());

        let outcome = log
            .append(json!({"id": 500}), CallerMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.entries, 500);
        assert_eq!(outcome.retention.evicted, 1);

        let lines = store.lines().await;
        assert_eq!(lines.len(), 500);
        assert!(!lines.iter().any(|l| l.contains("\"payload\":{\"id\":0}")));
        assert!(lines[0].contains("\"payload\":{\"id\":1}"));
        assert!(lines[499].contains("\"id\":500"));
    }

    #[tokio::test]
    async fn test_stale_entry_evicted() {
        let content = line_at(start() - TimeDelta::days(31), 1);
        let store = InMemoryLogStore::with_content(content);
        let (log, _clock) = create_log(store.clone());

        let outcome = log
            .append(json!({"id": 2}), CallerMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.entries, 1);
        assert_eq!(outcome.retention.expired, 1);
        assert!(store.lines().await[0].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_entries_age_out_lazily() {
        let store = InMemoryLogStore::new();
        let (log, clock) = create_log(store.clone());

        log.append(json!({"id": 1}), CallerMetadata::default())
            .await
            .unwrap();
        clock.advance(TimeDelta::days(31));

        // Nothing expires until the next write.
        assert_eq!(log.entries().await.unwrap().len(), 1);

        let outcome = log
            .append(json!({"id": 2}), CallerMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.entries, 1);
    }

    #[tokio::test]
    async fn test_corrupt_lines_dropped() {
        let content = format!(
            "{}not json\n[1,2]\n{{\"payload\":{{}}}}\n{}",
            line_at(start(), 1),
            line_at(start(), 2)
        );
        let store = InMemoryLogStore::with_content(content);
        let (log, _clock) = create_log(store.clone());

        let outcome = log
            .append(json!({"id": 3}), CallerMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.entries, 3);
        assert_eq!(outcome.corrupt_lines, 2);
        assert_eq!(outcome.retention.undated, 1);

        let lines = store.lines().await;
        assert!(lines.iter().all(|l| l.starts_with("{\"receivedAt\"")));

        let stats = log.stats_snapshot();
        assert_eq!(stats.appends, 1);
        assert_eq!(stats.corrupt_lines, 2);
        assert_eq!(stats.undated, 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_corrupt() {
        let line = line_at(start(), 1);
        let (head, tail) = line.split_once("{\"id\":1}").unwrap();
        let content = [head.as_bytes(), &b"{\"s\":\"\xff\xfe\"}"[..], tail.as_bytes()].concat();
        let store = InMemoryLogStore::with_content(content);
        let (log, _clock) = create_log(store.clone());

        let outcome = log
            .append(json!({"id": 2}), CallerMetadata::default())
            .await
            .unwrap();
        assert_eq!(outcome.entries, 1);
        assert_eq!(outcome.corrupt_lines, 1);

        let lines = store.lines().await;
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn test_retained_lines_are_verbatim() {
        let legacy = "{\"receivedAt\":\"2023-11-14T22:13:20+00:00\",\"legacy\":true}";
        let store = InMemoryLogStore::with_content(format!("{legacy}\n"));
        let (log, _clock) = create_log(store.clone());

        log.append(json!({}), CallerMetadata::default())
            .await
            .unwrap();
        assert_eq!(store.lines().await[0], legacy);
    }

    #[tokio::test]
    async fn test_failure_is_counted() {
        let store = InMemoryLogStore::new();
        store.set_unavailable(true);
        let (log, _clock) = create_log(store.clone());

        let err = log
            .append(json!({}), CallerMetadata::default())
            .await
            .unwrap_err();
        assert!(err.is_acquisition_failure());
        assert_eq!(log.stats_snapshot().failures, 1);
        assert!(store.content().await.is_empty());
    }
}
