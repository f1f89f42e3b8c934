//! DELETE /v1/cache - drop every cached result.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::delete, Extension, Router};
use geohealth_core::limiter::identity_prefix;

use crate::middleware::Identity;
use crate::state::{AppState, ResultCache};

pub async fn clear_cache(
    State(cache): State<Arc<ResultCache>>,
    Extension(identity): Extension<Identity>,
) -> StatusCode {
    let cleared = cache.len();
    cache.clear();
    tracing::info!(identity = identity_prefix(identity.as_str()), cleared, "Result cache cleared");
    StatusCode::NO_CONTENT
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", delete(clear_cache))
}
