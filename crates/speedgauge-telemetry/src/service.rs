//! The ingest contract
//!
//! Validates a raw request body and hands it to the telemetry log. Payload
//! problems are rejected here, before the log is ever locked.

use serde_json::Value;
use speedgauge_storage::{CallerMetadata, Clock, LogStore, StatsSnapshot, SystemClock, TelemetryLog};
use tracing::{debug, instrument};

use crate::error::IngestError;

/// Accepts telemetry events and records them in the bounded log
pub struct IngestService<S: LogStore, C: Clock = SystemClock> {
    log: TelemetryLog<S, C>,
}

impl<S: LogStore, C: Clock> IngestService<S, C> {
    /// Create a service over a telemetry log
    pub fn new(log: TelemetryLog<S, C>) -> Self {
        Self { log }
    }

    /// Ingestion counters
    pub fn stats(&self) -> StatsSnapshot {
        self.log.stats_snapshot()
    }

    /// Validate and store one event
    ///
    /// Returns the number of entries in the log after the write.
    ///
    /// # Errors
    ///
    /// - [`IngestError::EmptyPayload`] for an empty body
    /// - [`IngestError::InvalidPayload`] for a body that is not a JSON object
    /// - [`IngestError::StorageUnavailable`] if the log cannot be written
    #[instrument(skip(self, raw_body), fields(body_len = raw_body.len()))]
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        caller: CallerMetadata,
    ) -> Result<usize, IngestError> {
        let payload = parse_payload(raw_body)?;
        let outcome = self.log.append(payload, caller).await?;
        Ok(outcome.entries)
    }
}

/// Parse a request body into a JSON object
pub fn parse_payload(raw_body: &[u8]) -> Result<Value, IngestError> {
    if raw_body.is_empty() {
        return Err(IngestError::EmptyPayload);
    }

    let value: Value = serde_json::from_slice(raw_body).map_err(|e| {
        debug!(error = %e, "Rejecting malformed payload");
        IngestError::invalid(e.to_string())
    })?;

    if !value.is_object() {
        return Err(IngestError::invalid("payload is not a JSON object"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use speedgauge_storage::{InMemoryLogStore, RetentionPolicy, StorageError};

    fn create_service(store: InMemoryLogStore) -> IngestService<InMemoryLogStore> {
        IngestService::new(TelemetryLog::new(store, RetentionPolicy::default()))
    }

    #[test]
    fn test_parse_payload() {
        assert!(matches!(parse_payload(b""), Err(IngestError::EmptyPayload)));
        assert!(matches!(
            parse_payload(b"\"not json\""),
            Err(IngestError::InvalidPayload(_))
        ));
        assert!(matches!(parse_payload(b"not json"), Err(IngestError::InvalidPayload(_))));
        assert!(matches!(parse_payload(b"[1,2]"), Err(IngestError::InvalidPayload(_))));
        assert!(matches!(parse_payload(b"null"), Err(IngestError::InvalidPayload(_))));
        assert_eq!(parse_payload(b" {\"a\":1} ").unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_ingest_stores_payload() {
        let store = InMemoryLogStore::new();
        let service = create_service(store.clone());

        let entries = service
            .ingest(
                br#"{"event":"end","value":42}"#,
                CallerMetadata::new(Some("192.0.2.1".into()), None),
            )
            .await
            .unwrap();
        assert_eq!(entries, 1);

        let stored: Value = serde_json::from_str(&store.lines().await[0]).unwrap();
        assert_eq!(stored["payload"], json!({"event": "end", "value": 42}));
        assert_eq!(stored["remoteAddr"], "192.0.2.1");
        assert_eq!(stored["userAgent"], Value::Null);
    }

    #[tokio::test]
    async fn test_payload_key_order_preserved() {
        let store = InMemoryLogStore::new();
        let service = create_service(store.clone());

        service
            .ingest(
                br#"{"zeta":1,"alpha":{"y":2,"b":3},"mid":[]}"#,
                CallerMetadata::default(),
            )
            .await
            .unwrap();

        let line = &store.lines().await[0];
        assert!(line.contains(r#""payload":{"zeta":1,"alpha":{"y":2,"b":3},"mid":[]}"#));
    }

    #[tokio::test]
    async fn test_invalid_payload_never_touches_storage() {
        let store = InMemoryLogStore::with_content("not json\n");
        let service = create_service(store.clone());

        let err = service
            .ingest(b"[]", CallerMetadata::default())
            .await
            .unwrap_err();
        assert!(err.is_client_error());

        // The corrupt line would have been dropped by any write.
        assert_eq!(store.lines().await, vec!["not json".to_string()]);
        assert_eq!(service.stats().failures, 0);
    }

    #[tokio::test]
    async fn test_storage_failure() {
        let store = InMemoryLogStore::new();
        store.set_unavailable(true);
        let service = create_service(store);

        let err = service
            .ingest(b"{}", CallerMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::StorageUnavailable(StorageError::Open(_))
        ));
    }
}
