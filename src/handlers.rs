use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::aggregate::Aggregator;
use crate::cache::{CacheStats, ResponseCache};
use crate::metrics::Metrics;
use crate::respond;

pub struct AppState {
    pub cache: Arc<ResponseCache>,
    pub aggregator: Arc<Aggregator>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub message: String,
    pub purged_count: usize,
}

// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// Cache purge endpoint
pub async fn purge_cache(State(state): State<Arc<AppState>>) -> Json<PurgeResponse> {
    let purged_count = state.cache.purge_all();

    Json(PurgeResponse {
        success: true,
        message: format!("Purged {} cache entries", purged_count),
        purged_count,
    })
}

// Cache statistics endpoint
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

// Metrics endpoint (Prometheus format)
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.metrics.gather();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
}

// Main aggregation handler: cache lookup with single-flight, aggregation on
// miss, outcome mapped to the client response.
pub async fn recent_purchases(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Response {
    let start = Instant::now();

    let aggregator = Arc::clone(&state.aggregator);
    let user = username.clone();
    let (outcome, cache_status) = state
        .cache
        .get_or_compute(&username, move || async move {
            aggregator.aggregate(&user).await
        })
        .await;

    let response = respond::render(outcome, &username);

    let duration = start.elapsed();
    state
        .metrics
        .record_request(response.status(), cache_status, duration);

    info!(
        username = %username,
        status = response.status().as_u16(),
        cache = cache_status.as_str(),
        duration_ms = duration.as_millis() as u64,
        "Handled recent purchases request"
    );

    response
}
