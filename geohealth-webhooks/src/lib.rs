//! GeoHealth Webhooks - Signed Event Delivery
//!
//! Subscriptions register a callback URL, a set of [`EventType`]s and optional
//! [`SubscriptionFilters`]. [`WebhookDispatcher::publish`] fans an event out to
//! every matching subscription and returns immediately; delivery runs on
//! per-subscription lanes with exponential backoff for transient failures.
//!
//! # Wire format
//!
//! ```text
//! POST <url>
//! Content-Type: application/json
//! X-Webhook-Event: data.updated
//! X-Webhook-Delivery-ID: <uuid>
//! X-Webhook-Signature: sha256=<hex hmac of body>   (when a secret is set)
//!
//! {"event": "data.updated", "delivery_id": "...", "timestamp": "...", "data": {...}}
//! ```

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod signing;
pub mod store;
pub mod transport;
pub mod types;

pub use config::WebhookConfig;
pub use delivery::{AbandonReason, AttemptOutcome, Delivery, DeliveryState, RetryPolicy};
pub use dispatcher::{PublishReceipt, WebhookDispatcher, WEBHOOK_SERIES};
pub use error::{TransportError, WebhookError, WebhookResult};
pub use filter::{Comparison, SubscriptionFilters, ThresholdCondition};
pub use signing::{sign_payload, signature_header, verify_signature};
pub use store::SubscriptionStore;
pub use transport::{OutboundRequest, ReqwestTransport, WebhookTransport};
pub use types::{
    EventScope, EventType, NewSubscription, SubscriptionId, WebhookPayload, WebhookSubscription,
};
