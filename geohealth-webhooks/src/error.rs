//! Error types for subscription management and delivery.
//!
//! Subscription problems are reported synchronously from `subscribe`.
//! Delivery problems never reach the publisher; they surface as
//! [`TransportError`]s inside the lane and end up in metrics.

use std::time::Duration;

use geohealth_core::ConfigError;
use thiserror::Error;

use crate::types::{EventType, SubscriptionId};

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("At least one event type is required")]
    NoEvents,

    #[error("Duplicate event type: {0}")]
    DuplicateEvent(EventType),

    #[error("Unknown event type '{0}'. Valid: data.updated, threshold.exceeded")]
    UnknownEvent(String),

    #[error("Secret must be at most {max} characters")]
    SecretTooLong { max: usize },

    #[error("Filter '{field}' has {count} entries, maximum is {max}")]
    FilterTooComplex {
        field: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Maximum {max} active webhooks per API key")]
    LimitExceeded { max: usize },

    #[error("Webhook {0} not found")]
    NotFound(SubscriptionId),

    #[error("Webhook dispatcher is shut down")]
    ShutDown,

    #[error("Webhook dispatcher requires a Tokio runtime")]
    NoRuntime,

    #[error("Failed to serialize payload: {0}")]
    Payload(String),

    #[error("Failed to sign payload: {0}")]
    Signing(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure of a single outbound attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),
}

/// Result type alias for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;
