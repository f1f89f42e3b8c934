//! Subscription and event types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::filter::SubscriptionFilters;

// ============================================================================
// EVENTS
// ============================================================================

/// Event types a subscription can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// The data pipeline refreshed tract data.
    #[serde(rename = "data.updated")]
    DataUpdated,
    /// A monitored metric crossed a configured threshold.
    #[serde(rename = "threshold.exceeded")]
    ThresholdExceeded,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::DataUpdated, EventType::ThresholdExceeded];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DataUpdated => "data.updated",
            EventType::ThresholdExceeded => "threshold.exceeded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| WebhookError::UnknownEvent(s.to_string()))
    }
}

/// Where an event applies, used to evaluate subscription filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventScope {
    pub state_fips: Option<String>,
    pub geoid: Option<String>,
    /// Numeric values carried by the event, keyed by metric name.
    pub metrics: BTreeMap<String, f64>,
}

impl EventScope {
    pub fn state(state_fips: impl Into<String>) -> Self {
        Self {
            state_fips: Some(state_fips.into()),
            ..Self::default()
        }
    }

    pub fn tract(geoid: impl Into<String>) -> Self {
        Self {
            geoid: Some(geoid.into()),
            ..Self::default()
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Read scope from an event payload object.
    ///
    /// `state_fips` and `geoid` are taken from non-empty string fields of the
    /// same name; every other top-level number becomes a metric. Non-object payloads have
    /// an empty scope.
    pub fn from_data(data: &Value) -> Self {
        let Some(object) = data.as_object() else {
            return Self::default();
        };

        let text = |field: &str| {
            object
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let metrics = object
            .iter()
            .filter(|(name, _)| name.as_str() != "state_fips" && name.as_str() != "geoid")
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
            .collect();

        Self {
            state_fips: text("state_fips"),
            geoid: text("geoid"),
            metrics,
        }
    }
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

/// Subscription identifier. UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered webhook subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: SubscriptionId,
    /// Hashed identity of the owning caller (not exposed in responses)
    #[serde(skip_serializing, default)]
    pub owner_key: String,
    pub url: String,
    pub events: Vec<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<SubscriptionFilters>,
    /// Secret for HMAC signature (not exposed in responses)
    #[serde(skip_serializing, default)]
    pub secret: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Number of successful deliveries
    pub success_count: u64,
    /// Number of abandoned deliveries
    pub failure_count: u64,
    /// Last finished delivery
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl WebhookSubscription {
    pub fn is_signed(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Whether a published event should be delivered to this subscription.
    pub fn wants(&self, event: EventType, scope: &EventScope) -> bool {
        self.active
            && self.events.contains(&event)
            && self
                .filters
                .as_ref()
                .map_or(true, |filters| filters.matches(event, scope))
    }
}

/// Request to register a new subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub url: String,
    pub events: Vec<EventType>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub filters: Option<SubscriptionFilters>,
}

impl NewSubscription {
    pub fn new(url: impl Into<String>, events: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            url: url.into(),
            events: events.into_iter().collect(),
            secret: None,
            filters: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_filters(mut self, filters: SubscriptionFilters) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// JSON body POSTed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: EventType,
    pub delivery_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}
