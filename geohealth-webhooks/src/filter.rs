//! Subscription filters.
//!
//! A subscription may narrow the events it receives by state, by tract, and
//! (for `threshold.exceeded` only) by metric thresholds. Filters are
//! permissive about missing data: a scope that does not carry a state or a
//! metric is not rejected by a filter on that field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{WebhookError, WebhookResult};
use crate::types::{EventScope, EventType};

/// Maximum entries in `state_fips` or `geoids`.
pub const MAX_FILTER_ENTRIES: usize = 100;

/// Maximum number of threshold conditions.
pub const MAX_THRESHOLDS: usize = 20;

/// Comparison applied as `actual <op> value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[default]
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Comparison {
    pub fn holds(self, actual: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => actual > threshold,
            Comparison::GreaterOrEqual => actual >= threshold,
            Comparison::LessThan => actual < threshold,
            Comparison::LessOrEqual => actual <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    #[serde(default)]
    pub operator: Comparison,
    pub value: f64,
}

impl ThresholdCondition {
    pub fn new(operator: Comparison, value: f64) -> Self {
        Self { operator, value }
    }
}

/// Structured predicate attached to a subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_fips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geoids: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, ThresholdCondition>,
}

impl SubscriptionFilters {
    pub fn states<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state_fips: states.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_geoids<I, S>(mut self, geoids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.geoids = geoids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threshold(mut self, metric: impl Into<String>, condition: ThresholdCondition) -> Self {
        self.thresholds.insert(metric.into(), condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.state_fips.is_empty() && self.geoids.is_empty() && self.thresholds.is_empty()
    }

    /// Reject filters too large to evaluate on every publish.
    pub fn validate(&self) -> WebhookResult<()> {
        check_len("state_fips", self.state_fips.len(), MAX_FILTER_ENTRIES)?;
        check_len("geoids", self.geoids.len(), MAX_FILTER_ENTRIES)?;
        check_len("thresholds", self.thresholds.len(), MAX_THRESHOLDS)?;
        Ok(())
    }

    pub fn matches(&self, event: EventType, scope: &EventScope) -> bool {
        if !list_allows(&self.state_fips, scope.state_fips.as_deref()) {
            return false;
        }
        if !list_allows(&self.geoids, scope.geoid.as_deref()) {
            return false;
        }
        if event != EventType::ThresholdExceeded {
            return true;
        }
        self.thresholds.iter().all(|(metric, condition)| {
            scope
                .metrics
                .get(metric)
                .map_or(true, |actual| condition.operator.holds(*actual, condition.value))
        })
    }
}

fn list_allows(allowed: &[String], value: Option<&str>) -> bool {
    match value {
        Some(value) if !allowed.is_empty() => allowed.iter().any(|a| a == value),
        _ => true,
    }
}

fn check_len(field: &'static str, count: usize, max: usize) -> WebhookResult<()> {
    if count > max {
        return Err(WebhookError::FilterTooComplex { field, count, max });
    }
    Ok(())
}
