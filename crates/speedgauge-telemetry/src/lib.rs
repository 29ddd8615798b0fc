//! # SpeedGauge Telemetry
//!
//! HTTP sink for speed-test telemetry. Browser clients POST one JSON object
//! per finished test; the sink stamps it with the receipt time and caller
//! details and appends it to a bounded JSONL log (see `speedgauge-storage`).
//!
//! ## Wire protocol
//!
//! | Request | Response |
//! |---|---|
//! | `OPTIONS /telemetry` | 204 |
//! | `POST /telemetry` with a JSON object | 200 `{"status":"stored","entries":N}` |
//! | empty body | 400 `{"error":"Empty payload"}` |
//! | non-object body | 400 `{"error":"Invalid JSON payload"}` |
//! | body over the size limit | 413 `{"error":"Payload too large"}` |
//! | storage failure | 500 `{"error":"..."}` |
//! | any other method | 405 `{"error":"Method not allowed"}` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use speedgauge_telemetry::{TelemetryConfig, server};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = TelemetryConfig::default();
//!     server::serve(config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod service;

pub use config::{Cli, TelemetryConfig};
pub use error::{ConfigError, IngestError};
pub use server::{build_service, router, serve};
pub use service::{IngestService, parse_payload};
