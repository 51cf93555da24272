//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health, metrics, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Status endpoint
        .route("/api/v1/status", get(status))
        // Prometheus scrape endpoint
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::feed::{LiveFeed, ReconnectConfig};
    use crate::scheduler::StatusBoard;
    use crate::strategy::StrategyKind;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const BOOK: &str = r#"{"event_type":"book","asset_id":"up","bids":[{"price":"0.40","size":"5"}],"asks":[{"price":"0.41","size":"5"}]}"#;

    fn state() -> AppState {
        let feed = Arc::new(LiveFeed::new("wss://example.invalid", ReconnectConfig::default()));
        AppState::new(feed, Arc::new(StatusBoard::new()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_json(create_router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        let (status, body) = get_json(create_router(state()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_when_ready() {
        let state = state();
        state.feed.set_connected(true);
        state.feed.ingest(BOOK);

        let (status, body) = get_json(create_router(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let response = create_router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_lists_engines() {
        let state = state();
        state.board.register("btc-15m", StrategyKind::YesNo);
        state.board.update("btc-15m", |s| {
            s.window_slug = Some("btc-updown-15m-1700000100".to_string());
            s.state = "partially_filled".to_string();
        });

        let (status, body) = get_json(create_router(state), "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["engines"][0]["market"], "btc-15m");
        assert_eq!(body["engines"][0]["strategy"], "yesno");
        assert_eq!(body["engines"][0]["state"], "partially_filled");
        assert_eq!(body["engines"][0]["window_slug"], "btc-updown-15m-1700000100");
    }
}
