//! HTTP API for health checks, Prometheus metrics and snapshot views

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use console_lib::{
    health::ComponentStatus, ClusterError, ClusterSnapshot, Console, RefreshError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub console: Arc<Console>,
}

impl AppState {
    pub fn new(console: Arc<Console>) -> Self {
        Self { console }
    }
}

/// Failure of a read-only view, rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    /// No snapshot could be produced
    Unavailable(String),
    /// The refresher is stopped
    Conflict(String),
    /// The cluster answered with an error
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::NotRunning | RefreshError::AlreadyRunning => {
                ApiError::Conflict(e.to_string())
            }
            RefreshError::Aggregation(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct SnapshotResponse<'a> {
    from_cache: bool,
    snapshot: &'a ClusterSnapshot,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    /// `info`, `warning` or `critical`
    pub severity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub container: Option<String>,
    pub tail: Option<i64>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.console.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a snapshot is published
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.console.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let (snapshot, from_cache) = state.console.cluster_data().await?;
    Ok(Json(SnapshotResponse {
        from_cache,
        snapshot: &snapshot,
    })
    .into_response())
}

async fn summary(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let (snapshot, _) = state.console.cluster_data().await?;
    Ok(Json(&snapshot.summary).into_response())
}

async fn alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> Result<Response, ApiError> {
    let (snapshot, _) = state.console.cluster_data().await?;
    let alerts: Vec<_> = snapshot
        .summary
        .alerts
        .iter()
        .filter(|a| {
            query
                .severity
                .as_deref()
                .map_or(true, |s| a.severity.to_string().eq_ignore_ascii_case(s))
        })
        .collect();
    Ok(Json(alerts).into_response())
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.console.refresher_status())
}

async fn refresh(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let snapshot = state.console.force_refresh().await?;
    Ok(Json(&snapshot.summary).into_response())
}

async fn pod_logs(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Response, ApiError> {
    let logs = state
        .console
        .pod_logs(&namespace, &pod, query.container.as_deref(), query.tail)
        .await
        .map_err(|e| ApiError::Upstream(format!("{:#}", e)))?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        logs,
    )
        .into_response())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/snapshot", get(snapshot))
        .route("/api/v1/summary", get(summary))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/status", get(status))
        .route("/api/v1/refresh", post(refresh))
        .route("/api/v1/namespaces/:namespace/pods/:pod/logs", get(pod_logs))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` resolves and in-flight
/// requests drain
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
