//! Error Types for GeoHealth API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use geohealth_core::CoreError;
use geohealth_webhooks::WebhookError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// Request lacks an API key
    Unauthorized,

    /// API key is not in the accepted set
    Forbidden,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    /// Per-key resource limit reached
    LimitExceeded,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested webhook does not exist
    WebhookNotFound,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Request rate limit exceeded
    TooManyRequests,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidFormat
            | ErrorCode::LimitExceeded => StatusCode::BAD_REQUEST,

            ErrorCode::WebhookNotFound => StatusCode::NOT_FOUND,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LimitExceeded, message)
    }

    pub fn webhook_not_found(webhook_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::WebhookNotFound,
            format!("Webhook {} not found", webhook_id),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Create a TooManyRequests error.
    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Rate limit exceeded. Retry after {} seconds", secs),
            None => "Rate limit exceeded".to_string(),
        };
        Self::new(ErrorCode::TooManyRequests, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidUrl { .. } => ApiError::new(ErrorCode::InvalidFormat, err.to_string()),
            WebhookError::NoEvents
            | WebhookError::DuplicateEvent(_)
            | WebhookError::UnknownEvent(_)
            | WebhookError::SecretTooLong { .. }
            | WebhookError::FilterTooComplex { .. } => ApiError::validation_failed(err.to_string()),
            WebhookError::LimitExceeded { .. } => ApiError::limit_exceeded(err.to_string()),
            WebhookError::NotFound(id) => ApiError::webhook_not_found(id),
            WebhookError::ShutDown => ApiError::service_unavailable(err.to_string()),
            WebhookError::NoRuntime
            | WebhookError::Payload(_)
            | WebhookError::Signing(_)
            | WebhookError::Client(_)
            | WebhookError::Config(_) => {
                tracing::error!(error = %err, "Webhook subsystem error");
                ApiError::internal_error(err.to_string())
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        tracing::error!(error = %err, "Core configuration error");
        ApiError::internal_error(err.to_string())
    }
}

/// Malformed or schema-violating request bodies are client errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation_failed(rejection.body_text())
    }
}

/// Path ids that are not UUIDs.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", &format!("valid UUID: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use geohealth_webhooks::SubscriptionId;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::LimitExceeded.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::WebhookNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::TooManyRequests.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::InternalError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_webhook_errors_map_to_client_statuses() {
        let err: ApiError = WebhookError::NoEvents.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = WebhookError::LimitExceeded { max: 10 }.into();
        assert_eq!(err.code, ErrorCode::LimitExceeded);
        assert!(err.message.contains("10"));

        let id = SubscriptionId::new();
        let err: ApiError = WebhookError::NotFound(id).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.message.contains(&id.to_string()));

        let err: ApiError = WebhookError::ShutDown.into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_too_many_requests_message() {
        let err = ApiError::too_many_requests(Some(12));
        assert_eq!(err.code, ErrorCode::TooManyRequests);
        assert!(err.message.contains("12 seconds"));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::unauthorized("Missing API key");
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("UNAUTHORIZED"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_uuid_error_is_invalid_format() {
        let err: ApiError = match uuid::Uuid::parse_str("not-a-uuid") {
            Ok(_) => panic!("parsed a non-uuid"),
            Err(e) => e.into(),
        };
        assert_eq!(err.code, ErrorCode::InvalidFormat);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.message.contains("'id'"));
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::internal_error("boom");
        let display = format!("{}", err);
        assert!(display.contains("InternalError"));
        assert!(display.contains("boom"));
    }
}
