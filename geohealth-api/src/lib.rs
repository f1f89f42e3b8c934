//! GeoHealth API - HTTP Surface
//!
//! Composition root for the admission core and the webhook dispatcher.
//! [`AppState`] owns one instance of each component; [`create_router`]
//! wires the admission and request-metrics middleware around the webhook,
//! cache, metrics and health routes.

pub mod config;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{admission_middleware, request_metrics_middleware, Identity};
pub use routes::create_router;
pub use state::{AppState, ResultCache};
