//! Delivery state machine and retry policy.
//!
//! ```text
//! Pending -> Attempting -> Delivered
//!                       -> Retrying -> Attempting -> ...
//!                       -> Abandoned
//! ```
//!
//! A [`Delivery`] owns the serialised body and signature for one event sent
//! to one subscription; both are computed once and reused by every attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{TransportError, WebhookError, WebhookResult};
use crate::signing::signature_header;
use crate::transport::{
    OutboundRequest, DELIVERY_ID_HEADER, EVENT_HEADER, SIGNATURE_HEADER, USER_AGENT_HEADER,
};
use crate::types::{EventType, SubscriptionId, WebhookPayload, WebhookSubscription};

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the attempt after failed attempt `attempt` (1-based):
    /// `backoff_base * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

// ============================================================================
// OUTCOMES AND STATES
// ============================================================================

/// Classification of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Any status below 400.
    Success { status: u16 },
    /// 5xx, network failure or timeout. Eligible for retry.
    Transient { reason: String },
    /// 4xx. The receiver rejected the request; never retried.
    Permanent { status: u16 },
}

impl AttemptOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            0..=399 => AttemptOutcome::Success { status },
            400..=499 => AttemptOutcome::Permanent { status },
            _ => AttemptOutcome::Transient {
                reason: format!("status {status}"),
            },
        }
    }

    pub fn from_transport(result: Result<u16, TransportError>) -> Self {
        match result {
            Ok(status) => Self::from_status(status),
            Err(e) => AttemptOutcome::Transient {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    Rejected { status: u16 },
    RetriesExhausted { last_error: String },
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Delivered { attempts: u32, status: u16 },
    Abandoned { attempts: u32, reason: AbandonReason },
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered { .. } | DeliveryState::Abandoned { .. })
    }
}

// ============================================================================
// DELIVERY
// ============================================================================

/// One event on its way to one subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub subscription_id: SubscriptionId,
    pub event: EventType,
    pub url: String,
    body: Vec<u8>,
    signature: Option<String>,
    user_agent: String,
    attempts: u32,
    state: DeliveryState,
}

impl Delivery {
    /// Serialise and sign the payload for `subscription`.
    pub fn prepare(
        subscription: &WebhookSubscription,
        event: EventType,
        data: Value,
        timestamp: DateTime<Utc>,
        user_agent: &str,
    ) -> WebhookResult<Self> {
        let payload = WebhookPayload {
            event,
            delivery_id: Uuid::now_v7(),
            timestamp,
            data,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| WebhookError::Payload(e.to_string()))?;
        let signature = match subscription.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Some(signature_header(&body, secret)?),
            _ => None,
        };

        Ok(Self {
            id: payload.delivery_id,
            subscription_id: subscription.id,
            event,
            url: subscription.url.clone(),
            body,
            signature,
            user_agent: user_agent.to_string(),
            attempts: 0,
            state: DeliveryState::Pending,
        })
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> &DeliveryState {
        &self.state
    }

    /// Request sent by every attempt of this delivery.
    pub fn request(&self) -> OutboundRequest {
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            (EVENT_HEADER, self.event.to_string()),
            (DELIVERY_ID_HEADER, self.id.to_string()),
            (USER_AGENT_HEADER, self.user_agent.clone()),
        ];
        if let Some(signature) = &self.signature {
            headers.push((SIGNATURE_HEADER, signature.clone()));
        }
        OutboundRequest {
            url: self.url.clone(),
            headers,
            body: self.body.clone(),
        }
    }

    /// Move to `Attempting`, returning the 1-based attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.state = DeliveryState::Attempting {
            attempt: self.attempts,
        };
        self.attempts
    }

    /// Apply the outcome of the current attempt.
    pub fn record(&mut self, outcome: AttemptOutcome, policy: &RetryPolicy) -> &DeliveryState {
        let attempts = self.attempts;
        self.state = match outcome {
            AttemptOutcome::Success { status } => DeliveryState::Delivered { attempts, status },
            AttemptOutcome::Permanent { status } => DeliveryState::Abandoned {
                attempts,
                reason: AbandonReason::Rejected { status },
            },
            AttemptOutcome::Transient { reason } if attempts >= policy.max_attempts() => {
                DeliveryState::Abandoned {
                    attempts,
                    reason: AbandonReason::RetriesExhausted { last_error: reason },
                }
            }
            AttemptOutcome::Transient { .. } => DeliveryState::Retrying {
                attempt: attempts,
                delay: policy.delay_after(attempts),
            },
        };
        &self.state
    }

    pub fn abandon(&mut self, reason: AbandonReason) -> &DeliveryState {
        self.state = DeliveryState::Abandoned {
            attempts: self.attempts,
            reason,
        };
        &self.state
    }
}
