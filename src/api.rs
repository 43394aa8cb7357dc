//! HTTP surface of the broker.
//!
//! ```text
//! POST /               -> "Hit the broker"
//! POST /handle         -> dispatch, log action via the default sink
//! POST /handle/{sink}  -> dispatch, log action via http|rpc|grpc|queue
//! POST /log-grpc       -> dispatch, log action via gRPC
//! GET  /health         -> liveness + queue connection state
//! GET  /metrics        -> request counters
//! ```

use crate::adapters::{Publisher, SinkKind};
use crate::dispatcher::Dispatcher;
use crate::envelope::ResponseEnvelope;
use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Header carrying the caller's correlation ID
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Request counters
pub struct Metrics {
    requests_received: AtomicU64,
    requests_failed: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn record(&self, status: StatusCode) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        if !status.is_success() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_received(&self) -> u64 {
        self.requests_received.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handler state
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Used only to report connection health
    pub publisher: Option<Publisher>,
    pub api_key: Option<String>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            publisher: None,
            api_key: None,
            metrics: Metrics::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Require `Authorization: Bearer <key>` on dispatch routes
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(hit_broker))
        .route("/handle", post(handle_submission))
        .route("/handle/{sink}", post(handle_with_sink))
        .route("/log-grpc", post(log_via_grpc))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    // Skip auth for health check and metrics
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    match token {
        Some(token) if token == api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API Key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn hit_broker() -> Json<ResponseEnvelope> {
    Json(ResponseEnvelope::ok("Hit the broker"))
}

async fn handle_submission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ResponseEnvelope>) {
    let sink = state.dispatcher.default_sink();
    dispatch(&state, &headers, &body, sink).await
}

async fn handle_with_sink(
    State(state): State<Arc<AppState>>,
    Path(sink): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ResponseEnvelope>) {
    match sink.parse::<SinkKind>() {
        Ok(sink) => dispatch(&state, &headers, &body, sink).await,
        Err(message) => {
            state.metrics.record(StatusCode::BAD_REQUEST);
            (StatusCode::BAD_REQUEST, Json(ResponseEnvelope::failure(message)))
        }
    }
}

async fn log_via_grpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ResponseEnvelope>) {
    dispatch(&state, &headers, &body, SinkKind::Grpc).await
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    sink: SinkKind,
) -> (StatusCode, Json<ResponseEnvelope>) {
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!("dispatch", correlation_id = %correlation_id, sink = %sink);
    let (status, envelope) = state
        .dispatcher
        .dispatch_with(body, sink)
        .instrument(span)
        .await;

    state.metrics.record(status);

    if status.is_success() {
        info!(correlation_id = %correlation_id, status = status.as_u16(), "Request handled");
    } else {
        debug!(
            correlation_id = %correlation_id,
            status = status.as_u16(),
            message = %envelope.message,
            "Request failed"
        );
    }

    (status, Json(envelope))
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match &state.publisher {
        Some(publisher) if publisher.is_connected() => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "queue": "connected" })),
        ),
        Some(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "queue": "disconnected" })),
        ),
        None => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "queue": "disabled" })),
        ),
    }
}

/// Get metrics endpoint - returns server metrics as JSON
async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.metrics.uptime_seconds(),
        "requests": {
            "received": state.metrics.requests_received(),
            "failed": state.metrics.requests_failed()
        },
        "default_log_sink": state.dispatcher.default_sink(),
        "log_sinks": state.dispatcher.sink_kinds(),
    }))
}
