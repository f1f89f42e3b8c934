//! GeoHealth API Server Entry Point
//!
//! Bootstraps configuration, builds the application state and starts the
//! Axum HTTP server. On ctrl-c the webhook dispatcher is given its grace
//! period to drain queued deliveries.

use std::net::SocketAddr;

use geohealth_api::telemetry::{init_tracing, TelemetryConfig};
use geohealth_api::{create_router, ApiConfig, ApiError, ApiResult, AppState};
use geohealth_core::CoreConfig;
use geohealth_webhooks::WebhookConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let core_config = CoreConfig::from_env();
    core_config.validate()?;
    let webhook_config = WebhookConfig::from_env();
    let api_config = ApiConfig::from_env();
    if api_config.auth_enabled && api_config.api_keys.is_empty() {
        tracing::warn!("Authentication enabled but no API keys configured; every request will be rejected");
    }

    let state = AppState::from_config(&core_config, webhook_config, api_config)?;
    let dispatcher = state.dispatcher.clone();
    let app = create_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting GeoHealth API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let drained = dispatcher.shutdown().await;
    tracing::info!(drained, "GeoHealth API stopped");
    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("GEOHEALTH_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("GEOHEALTH_API_PORT").ok())
        .unwrap_or_else(|| "8000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
