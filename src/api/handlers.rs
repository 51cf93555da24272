//! HTTP API handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::feed::LiveFeed;
use crate::scheduler::{EngineStatus, StatusBoard};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared live price feed.
    pub feed: Arc<LiveFeed>,
    /// Per-market engine statuses.
    pub board: Arc<StatusBoard>,
    /// Prometheus recorder handle, when installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new(feed: Arc<LiveFeed>, board: Arc<StatusBoard>) -> Self {
        Self {
            feed,
            board,
            metrics: None,
        }
    }

    /// Serve the given recorder on `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Check if the live feed is serving prices.
    pub fn is_ready(&self) -> bool {
        self.feed.ready()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the live feed is ready.
    pub ready: bool,
    /// Windows currently traded.
    pub windows: Vec<String>,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Whether reads are served from the live feed.
    pub feed_ready: bool,
    /// Live feed reconnect attempts since the last successful connect.
    pub reconnect_attempts: u64,
    /// One entry per market engine.
    pub engines: Vec<EngineStatus>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if the live feed is ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let windows = state
        .board
        .snapshot()
        .into_iter()
        .filter_map(|s| s.window_slug)
        .collect();

    let response = ReadyResponse {
        ready: is_ready,
        windows,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns per-market engine status.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let feed_ready = state.is_ready();
    let status = if feed_ready { "running" } else { "degraded" };

    Json(StatusResponse {
        status,
        feed_ready,
        reconnect_attempts: state.feed.reconnect_attempts(),
        engines: state.board.snapshot(),
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
