//! Telemetry log entries
//!
//! One entry is one JSON object on one line. New entries are built from a
//! [`TelemetryEvent`]; entries read back from disk are kept as
//! [`StoredEntry`] so they can be rewritten byte-for-byte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field carrying the server-assigned receipt time
pub const RECEIVED_AT_FIELD: &str = "receivedAt";

/// Caller details supplied by the transport layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerMetadata {
    /// Caller's network address as seen by the server
    pub remote_addr: Option<String>,
    /// Caller-supplied client identifier, unvalidated
    pub user_agent: Option<String>,
}

impl CallerMetadata {
    /// Create metadata from optional address and user agent
    pub fn new(remote_addr: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            remote_addr,
            user_agent,
        }
    }
}

/// A telemetry event as persisted in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// When the server accepted the event
    pub received_at: DateTime<Utc>,
    /// Caller address, `null` when unknown
    pub remote_addr: Option<String>,
    /// Caller user agent, `null` when absent
    pub user_agent: Option<String>,
    /// Opaque caller payload
    pub payload: Value,
}

impl TelemetryEvent {
    /// Create an event stamped with the given receipt time
    pub fn new(received_at: DateTime<Utc>, caller: CallerMetadata, payload: Value) -> Self {
        Self {
            received_at,
            remote_addr: caller.remote_addr,
            user_agent: caller.user_agent,
            payload,
        }
    }

    /// Encode as a single log line (without the trailing newline)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An entry read back from the log
///
/// The raw line is retained verbatim; only `receivedAt` is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// The line as it appears in the log, trimmed of surrounding whitespace
    pub raw: String,
    /// Parsed receipt time, `None` if missing or unparseable
    pub received_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    /// Build a stored entry from a freshly created event
    pub fn from_event(event: &TelemetryEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            raw: event.to_line()?,
            received_at: Some(event.received_at),
        })
    }

    /// Parse one log line
    ///
    /// Returns `None` when the line is not a JSON object.
    pub fn parse(line: &str) -> Option<Self> {
        let raw = line.trim();
        let object: Map<String, Value> = serde_json::from_str(raw).ok()?;
        let received_at = object
            .get(RECEIVED_AT_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_timestamp);

        Some(Self {
            raw: raw.to_string(),
            received_at,
        })
    }
}

/// Parse a receipt timestamp
///
/// Accepts RFC 3339 (what this crate writes, and what `gmdate('c')`-style
/// writers produce) and falls back to a space-separated UTC form.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Result of decoding the whole log content
#[derive(Debug, Default)]
pub struct DecodedLog {
    /// Entries that decoded as JSON objects, in file order
    pub entries: Vec<StoredEntry>,
    /// Non-blank lines that were dropped as corrupt
    pub corrupt_lines: usize,
}

/// Decode newline-delimited log content, skipping lines that are not JSON objects
///
/// Blank lines are ignored without being counted. A line that is not valid
/// UTF-8 is not valid JSON either and counts as corrupt.
pub fn decode_lines(content: &[u8]) -> DecodedLog {
    content
        .split(|&byte| byte == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .fold(DecodedLog::default(), |mut decoded, line| {
            match std::str::from_utf8(line).ok().and_then(StoredEntry::parse) {
                Some(entry) => decoded.entries.push(entry),
                None => {
                    tracing::warn!(line_len = line.len(), "Dropping corrupt log line");
                    decoded.corrupt_lines += 1;
                }
            }
            decoded
        })
}

/// Encode entries as newline-delimited content, one entry per line
pub fn encode_lines(entries: &[StoredEntry]) -> Vec<u8> {
    let capacity = entries.iter().map(|e| e.raw.len() + 1).sum();
    let mut out = Vec::with_capacity(capacity);
    for entry in entries {
        out.extend_from_slice(entry.raw.as_bytes());
        out.push(b'\n');
    }
    out
}
