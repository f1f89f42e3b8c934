//! Webhook Subscription REST API Routes
//!
//! Subscriptions are scoped to the caller's hashed API key: a caller only
//! ever sees, fetches or deletes its own subscriptions.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use geohealth_webhooks::{NewSubscription, SubscriptionId, WebhookDispatcher, WebhookSubscription};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::Identity;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Single-subscription response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub webhook: WebhookSubscription,
}

/// List response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListWebhooksResponse {
    pub webhooks: Vec<WebhookSubscription>,
    pub total: usize,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /v1/webhooks - Register a new webhook
pub async fn create_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<NewSubscription>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    if req.url.trim().is_empty() {
        return Err(ApiError::validation_failed("Required field 'url' is missing"));
    }

    let webhook = dispatcher.subscribe(identity.as_str(), req)?;

    Ok((StatusCode::CREATED, Json(WebhookResponse { webhook })))
}

/// GET /v1/webhooks - List the caller's webhooks
pub async fn list_webhooks(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    let webhooks = dispatcher.list(identity.as_str());
    let total = webhooks.len();

    Json(ListWebhooksResponse { webhooks, total })
}

/// GET /v1/webhooks/{id} - Get a specific webhook
pub async fn get_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Extension(identity): Extension<Identity>,
    Path(raw_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = Uuid::parse_str(&raw_id)?;
    let webhook = dispatcher.get(identity.as_str(), SubscriptionId::from(id))?;

    Ok(Json(WebhookResponse { webhook }))
}

/// DELETE /v1/webhooks/{id} - Remove a webhook
pub async fn delete_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Extension(identity): Extension<Identity>,
    Path(raw_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = Uuid::parse_str(&raw_id)?;
    if !dispatcher.unsubscribe(identity.as_str(), SubscriptionId::from(id)) {
        return Err(ApiError::webhook_not_found(id));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Create the webhook routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_webhooks).post(create_webhook))
        .route("/:id", get(get_webhook).delete(delete_webhook))
}
