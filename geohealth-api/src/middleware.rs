//! Request admission and request metrics middleware.
//!
//! `admission_middleware` authenticates the caller, consults the sliding
//! window limiter and stamps `X-RateLimit-*` headers on every response it
//! produces. `request_metrics_middleware` wraps the whole router and records
//! status and latency for each request.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderName, RETRY_AFTER},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use geohealth_core::{limiter::identity_prefix, outcomes, RateLimitDecision, ANONYMOUS_IDENTITY};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time-ms";

/// Hashed identity of the admitted caller, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ADMISSION
// ============================================================================

/// Rejection produced when the limiter refuses a request.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub decision: RateLimitDecision,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let retry_after = self.decision.retry_after();
        let error = ApiError::too_many_requests(Some(retry_after));

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(error)).into_response();
        let headers = response.headers_mut();
        apply_rate_limit_headers(headers, &self.decision);
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    for (name, value) in decision.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn resolve_identity(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    if !state.config.auth_enabled {
        return Ok(ANONYMOUS_IDENTITY.to_string());
    }

    let raw_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing API key"))?;

    state
        .config
        .api_keys
        .authenticate(raw_key)
        .ok_or_else(|| ApiError::forbidden("Invalid API key"))
}

/// Authenticate the caller and apply the sliding-window limit.
///
/// Missing keys get 401 and unknown keys 403, both counted under
/// `auth/failure`. Admitted requests carry an [`Identity`] extension.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = match resolve_identity(&state, request.headers()) {
        Ok(identity) => identity,
        Err(error) => {
            state.metrics.record_outcome(outcomes::AUTH, outcomes::FAILURE);
            tracing::debug!(code = %error.code, path = %request.uri().path(), "Authentication failed");
            return error.into_response();
        }
    };

    let decision = state.limiter.is_allowed(&identity);
    state.metrics.record_admission(decision.allowed);

    if !decision.allowed {
        tracing::warn!(
            identity = identity_prefix(&identity),
            retry_after = decision.retry_after(),
            "Rate limit exceeded"
        );
        return RateLimitError { decision }.into_response();
    }

    request.extensions_mut().insert(Identity(identity));
    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

// ============================================================================
// REQUEST METRICS
// ============================================================================

/// Record status and latency, and add `X-Response-Time-Ms` and `X-Request-ID`.
///
/// An incoming `X-Request-ID` is echoed back; otherwise a fresh id is
/// generated. Query strings are not logged.
pub async fn request_metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().simple().to_string());

    let mut response = next.run(request).await;

    let elapsed_ms = (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
    let status = response.status().as_u16();
    state.metrics.record_request(status, elapsed_ms);

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed_ms:.2}")) {
        headers.insert(HeaderName::from_static(RESPONSE_TIME_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    tracing::info!(
        method = %method,
        path = %path,
        status,
        duration_ms = elapsed_ms,
        request_id = %request_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use geohealth_core::{hash_api_key, AcceptedKeys, CoreConfig, ManualClock};
    use geohealth_test_utils::{fixtures, ScriptedTransport};
    use tower::ServiceExt;

    use crate::config::ApiConfig;

    fn test_state(clock: &ManualClock, api: ApiConfig, limit: u32) -> Result<AppState, String> {
        AppState::with_components(
            &CoreConfig::default().with_rate_limit(limit, std::time::Duration::from_secs(60)),
            fixtures::webhook_config(),
            api,
            clock.shared(),
            ScriptedTransport::ok().shared(),
        )
        .map_err(|e| e.to_string())
    }

    fn test_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|axum::Extension(identity): axum::Extension<Identity>| async move {
                    identity.0
                }),
            )
            .layer(middleware::from_fn_with_state(state.clone(), admission_middleware))
            .layer(middleware::from_fn_with_state(state.clone(), request_metrics_middleware))
            .with_state(state)
    }

    fn get_request(key: Option<&str>) -> Result<HttpRequest<Body>, String> {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_anonymous_when_auth_disabled() -> Result<(), String> {
        let clock = ManualClock::new();
        let app = test_app(test_state(&clock, ApiConfig::default(), 5)?);

        let response = app
            .oneshot(get_request(None)?)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert!(response.headers().contains_key(RESPONSE_TIME_HEADER));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(&body[..], ANONYMOUS_IDENTITY.as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys() -> Result<(), String> {
        let clock = ManualClock::new();
        let api = ApiConfig::default().with_api_keys(AcceptedKeys::parse("good-key"));
        let state = test_state(&clock, api, 5)?;
        let app = test_app(state.clone());

        let response = app
            .clone()
            .oneshot(get_request(None)?)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(get_request(Some("bad-key"))?)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(get_request(Some("good-key"))?)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(&body[..], hash_api_key("good-key").as_bytes());

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.outcome(outcomes::AUTH, outcomes::FAILURE), 2);
        assert_eq!(snapshot.outcome(outcomes::LIMITER, outcomes::ADMIT), 1);
        assert_eq!(snapshot.status_codes.get(&401), Some(&1));
        assert_eq!(snapshot.status_codes.get(&403), Some(&1));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejection_carries_retry_after() -> Result<(), String> {
        let clock = ManualClock::new();
        let state = test_state(&clock, ApiConfig::default(), 2)?;
        let app = test_app(state.clone());

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(get_request(None)?)
                .await
                .map_err(|e| format!("Request failed: {:?}", e))?;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(get_request(None)?)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["retry-after"], "60");

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.outcome(outcomes::LIMITER, outcomes::REJECT), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_echoed() -> Result<(), String> {
        let clock = ManualClock::new();
        let app = test_app(test_state(&clock, ApiConfig::default(), 5)?);

        let request = HttpRequest::builder()
            .uri("/whoami")
            .header(REQUEST_ID_HEADER, "abc123")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        let response = app
            .oneshot(request)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc123");
        Ok(())
    }
}
