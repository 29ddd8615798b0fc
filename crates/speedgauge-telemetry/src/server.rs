//! HTTP transport for the telemetry sink
//!
//! Routes:
//! - `POST <route>`: ingest one event
//! - `OPTIONS <route>`: CORS preflight, 204
//! - any other method on `<route>`: 405
//! - `GET /health`: liveness plus ingestion counters, 405 for other methods
//!
//! Every response is a flat JSON object and carries permissive CORS headers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{self, HeaderName},
        request::Parts,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use speedgauge_storage::{CallerMetadata, Clock, FileLogStore, LogStore, StorageError, TelemetryLog};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{HttpConfig, TelemetryConfig};
use crate::error::IngestError;
use crate::service::IngestService;

/// Health check route
pub const HEALTH_ROUTE: &str = "/health";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const ALLOWED_METHODS: &str = "POST, OPTIONS";
const HEALTH_METHODS: &str = "GET, HEAD";
const ALLOWED_HEADERS: &str = "Content-Type, X-Requested-With";

// ============================================================================
// Server State
// ============================================================================

struct ServerState<S: LogStore, C: Clock> {
    service: IngestService<S, C>,
    http: HttpConfig,
}

// ============================================================================
// Router Creation
// ============================================================================

/// Build the file-backed ingest service described by a configuration
pub fn build_service(config: &TelemetryConfig) -> IngestService<FileLogStore> {
    let store = FileLogStore::new(config.storage.file_log_config());
    IngestService::new(TelemetryLog::new(store, config.retention.policy()))
}

/// Create the HTTP router
pub fn router<S: LogStore, C: Clock>(
    service: IngestService<S, C>,
    config: &TelemetryConfig,
) -> Router {
    let state = Arc::new(ServerState {
        service,
        http: config.http,
    });

    Router::new()
        .route(
            &config.route,
            post(ingest::<S, C>)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route(
            HEALTH_ROUTE,
            get(health::<S, C>).fallback(health_method_not_allowed),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
}

/// Bind the configured address and serve until `shutdown` resolves
pub async fn serve<F>(config: TelemetryConfig, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(build_service(&config), &config);
    let listener = TcpListener::bind(config.listen_addr).await?;

    info!(
        addr = %listener.local_addr()?,
        route = %config.route,
        log_path = %config.storage.log_path.display(),
        max_entries = config.retention.max_entries,
        max_age_days = config.retention.max_age_days,
        "Telemetry sink listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

// ============================================================================
// Handlers
// ============================================================================

async fn ingest<S: LogStore, C: Clock>(
    State(state): State<Arc<ServerState<S, C>>>,
    request: Request,
) -> Result<Json<serde_json::Value>, IngestError> {
    let (parts, body) = request.into_parts();
    let caller = caller_metadata(&parts, state.http.trust_forwarded_headers);

    let raw_body = read_body(body, state.http.max_body_bytes).await?;
    let entries = state.service.ingest(&raw_body, caller).await?;

    Ok(Json(json!({ "status": "stored", "entries": entries })))
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn method_not_allowed() -> Response {
    method_not_allowed_with(ALLOWED_METHODS)
}

async fn health_method_not_allowed() -> Response {
    method_not_allowed_with(HEALTH_METHODS)
}

fn method_not_allowed_with(allow: &'static str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, HeaderValue::from_static(allow))],
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

async fn health<S: LogStore, C: Clock>(
    State(state): State<Arc<ServerState<S, C>>>,
) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "stats": state.service.stats() }))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

// ============================================================================
// Request Helpers
// ============================================================================

async fn read_body(body: Body, limit: usize) -> Result<bytes::Bytes, IngestError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        if inner
            .downcast_ref::<http_body_util::LengthLimitError>()
            .is_some()
        {
            IngestError::PayloadTooLarge { limit }
        } else {
            debug!(error = %inner, "Failed to read request body");
            IngestError::invalid(format!("unreadable body: {inner}"))
        }
    })
}

/// Resolve caller address and user agent for a request
///
/// The address is the socket peer unless `trust_forwarded` is set and the
/// request carries `X-Forwarded-For` (first hop) or `X-Real-IP`.
fn caller_metadata(parts: &Parts, trust_forwarded: bool) -> CallerMetadata {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let forwarded = if trust_forwarded {
        forwarded_addr(&parts.headers)
    } else {
        None
    };

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    CallerMetadata::new(forwarded.or(peer), user_agent)
}

fn forwarded_addr(headers: &HeaderMap) -> Option<String> {
    fn header_text<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
        headers
            .get(HeaderName::from_static(name))
            .and_then(|value| value.to_str().ok())
    }

    header_text(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .or_else(|| header_text(headers, "x-real-ip"))
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Error Responses
// ============================================================================

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            IngestError::EmptyPayload => (StatusCode::BAD_REQUEST, "Empty payload"),
            IngestError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "Invalid JSON payload"),
            IngestError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
            }
            IngestError::StorageUnavailable(StorageError::DirectoryUnavailable(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Log directory unavailable")
            }
            IngestError::StorageUnavailable(e) if e.is_acquisition_failure() => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to open log file")
            }
            IngestError::StorageUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write log file")
            }
        };

        if self.is_client_error() {
            debug!(status = status.as_u16(), error = %self, "Rejecting telemetry request");
        } else {
            warn!(status = status.as_u16(), error = %self, "Telemetry request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_peer_address_by_default() {
        let parts = parts(
            HttpRequest::builder()
                .header("x-forwarded-for", "203.0.113.9")
                .header(header::USER_AGENT, "probe/2.1")
                .extension(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 51234)))),
        );

        let caller = caller_metadata(&parts, false);
        assert_eq!(caller.remote_addr.as_deref(), Some("192.0.2.10"));
        assert_eq!(caller.user_agent.as_deref(), Some("probe/2.1"));
    }

    #[test]
    fn test_forwarded_headers_when_trusted() {
        let parts = parts(
            HttpRequest::builder()
                .header("x-forwarded-for", " 203.0.113.9 , 10.0.0.1")
                .extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 443)))),
        );
        assert_eq!(
            caller_metadata(&parts, true).remote_addr.as_deref(),
            Some("203.0.113.9")
        );

        let parts = parts_with_real_ip();
        assert_eq!(
            caller_metadata(&parts, true).remote_addr.as_deref(),
            Some("198.51.100.20")
        );
    }

    fn parts_with_real_ip() -> Parts {
        parts(HttpRequest::builder().header("x-real-ip", "198.51.100.20"))
    }

    #[test]
    fn test_missing_metadata() {
        let caller = caller_metadata(&parts(HttpRequest::builder()), true);
        assert_eq!(caller, CallerMetadata::default());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (IngestError::EmptyPayload, StatusCode::BAD_REQUEST),
            (IngestError::invalid("x"), StatusCode::BAD_REQUEST),
            (
                IngestError::PayloadTooLarge { limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                StorageError::directory_unavailable("/data").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StorageError::LockTimeout(std::time::Duration::from_secs(1)).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StorageError::io("disk full").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
