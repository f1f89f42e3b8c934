//! GET /v1/metrics - application status report.

use axum::{extract::State, routing::get, Json, Router};
use geohealth_core::{CacheStats, MetricsSnapshot};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterStatus {
    pub active_keys: usize,
}

/// Metrics snapshot plus live component state.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub result_cache: CacheStats,
    pub rate_limiter: LimiterStatus,
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        snapshot: state.metrics.snapshot(),
        result_cache: state.cache.stats(),
        rate_limiter: LimiterStatus {
            active_keys: state.limiter.tracked_identities(),
        },
    })
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/metrics", get(get_metrics))
}
