//! REST API Routes Module
//!
//! Includes:
//! - Webhook subscription management under /v1/webhooks (admission controlled)
//! - Result cache maintenance under /v1/cache (admission controlled)
//! - Status metrics at /v1/metrics (public)
//! - Health check at /health (public)
//! - CORS support for browser-based clients

pub mod cache;
pub mod health;
pub mod metrics;
pub mod webhooks;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::middleware::{admission_middleware, request_metrics_middleware, API_KEY_HEADER};
use crate::state::AppState;

/// Build the CORS layer based on configuration.
///
/// In development mode (no origins configured), allows all origins.
/// Otherwise only origins accepted by [`ApiConfig::is_origin_allowed`] are
/// allowed, including `*.domain` subdomain patterns.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-response-time-ms"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let allowed = config.clone();
        let origins = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| allowed.is_origin_allowed(o))
                .unwrap_or(false)
        });

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the complete API router.
///
/// Routes under `/v1/webhooks` and `/v1/cache` pass through
/// [`admission_middleware`]; every route is measured by
/// [`request_metrics_middleware`].
pub fn create_router(state: AppState) -> Router {
    let admitted = Router::new()
        .nest("/webhooks", webhooks::create_router())
        .nest("/cache", cache::create_router())
        .layer(from_fn_with_state(state.clone(), admission_middleware));

    let v1 = admitted.merge(metrics::create_router());

    let cors = build_cors_layer(&state.config);

    Router::new()
        .nest("/v1", v1)
        .nest("/health", health::create_router())
        .layer(from_fn_with_state(state.clone(), request_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
