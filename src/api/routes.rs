//! API Routes
//!
//! HTTP endpoints: the published map itself, health checks, and metrics.
//! The map endpoint is consumed cross-origin by the frontend, so every
//! response carries permissive CORS headers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::Metrics;
use crate::config::MapConfig;
use crate::snapshot::SnapshotCache;
use crate::types::PeerPoint;

/// Shared API state
pub struct ApiState {
    pub config: Arc<MapConfig>,
    pub cache: Arc<SnapshotCache>,
    pub metrics: Arc<Metrics>,
}

/// Build the service router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        // The map itself
        .route("/", get(get_map))

        // Health & status
        .route("/health", get(health_check))
        .route("/status", get(get_status))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until the shutdown signal flips
pub async fn run_api_server(
    config: Arc<MapConfig>,
    cache: Arc<SnapshotCache>,
    metrics: Arc<Metrics>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let state = Arc::new(ApiState {
        config: config.clone(),
        cache,
        metrics,
    });

    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

/// GET / - The published map: bucket key to aggregated point
///
/// Serves `{}` until the first refresh completes so that pollers never have
/// to special-case startup.
async fn get_map(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.metrics.inc_map_requests();

    let points: HashMap<String, PeerPoint> = match state.cache.get() {
        Some(snapshot) => snapshot.points.clone(),
        None => HashMap::new(),
    };

    Json(points)
}

/// GET /health - Simple health check
async fn health_check() -> impl IntoResponse {
    "OK"
}

/// GET /status - Detailed status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let snapshot = state.cache.get();

    let status = serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "refresh_interval_secs": state.config.refresh_interval_secs,
        "snapshot": snapshot.map(|s| serde_json::json!({
            "generated_at": s.generated_at,
            "age_secs": s.age_secs(),
            "peer_count": s.peer_count,
            "map_points": s.points.len(),
        })),
    });

    Json(status)
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
