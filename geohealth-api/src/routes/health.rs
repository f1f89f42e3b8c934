//! Health Check Endpoint
//!
//! GET /health reports process liveness together with cache and limiter
//! state. No authentication required.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub cache: CacheHealth,
    pub rate_limiter: LimiterHealth,
    pub webhooks: WebhookHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterHealth {
    pub active_keys: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookHealth {
    pub accepting: bool,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.cache.stats();
    let accepting = !state.dispatcher.is_closed();

    Json(HealthResponse {
        status: if accepting {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        cache: CacheHealth {
            size: stats.size,
            max_size: stats.capacity,
            hit_rate: (stats.hit_rate * 10_000.0).round() / 10_000.0,
        },
        rate_limiter: LimiterHealth {
            active_keys: state.limiter.tracked_identities(),
        },
        webhooks: WebhookHealth { accepting },
    })
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(health))
}
