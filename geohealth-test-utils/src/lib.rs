//! GeoHealth Test Utilities
//!
//! Shared test infrastructure for the GeoHealth workspace:
//! - A scripted webhook transport that records every attempt
//! - Proptest generators for filters, scopes and coordinates
//! - Fixtures for deterministic cores (manual clock, small limits)
//! - Assertions over metrics snapshots

use std::collections::VecDeque;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

pub use geohealth_core::{
    outcomes, BoundedCache, CacheStats, Clock, ManualClock, MetricsAggregator, MetricsSnapshot,
    RateLimitDecision, SlidingWindowLimiter,
};
pub use geohealth_webhooks::{
    EventScope, EventType, NewSubscription, OutboundRequest, SubscriptionFilters,
    ThresholdCondition, TransportError, WebhookConfig, WebhookTransport,
};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// Scripted endpoint behaviour for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// Respond with this HTTP status.
    Status(u16),
    /// Fail before a response is received.
    NetworkError,
    /// Never respond, so the attempt runs into its timeout.
    Hang,
}

/// One recorded attempt.
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub at: Instant,
    pub request: OutboundRequest,
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<ScriptedResponse>,
    attempts: Vec<RecordedAttempt>,
}

/// Webhook transport that plays back a script and records every request.
///
/// Once the script runs out, every further attempt gets the fallback
/// (200 unless set otherwise). Timestamps use `tokio::time::Instant`, so they
/// follow paused test time.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
    fallback: ScriptedResponse,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                responses: script.into_iter().collect(),
                attempts: Vec::new(),
            })),
            fallback: ScriptedResponse::Status(200),
        }
    }

    /// Script of plain statuses.
    pub fn statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::new(statuses.into_iter().map(ScriptedResponse::Status))
    }

    /// Always answer 200.
    pub fn ok() -> Self {
        Self::new([])
    }

    pub fn with_fallback(mut self, fallback: ScriptedResponse) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn shared(&self) -> Arc<dyn WebhookTransport> {
        Arc::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn attempts(&self) -> Vec<RecordedAttempt> {
        self.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Attempts sent to `url`.
    pub fn attempts_to(&self, url: &str) -> Vec<RecordedAttempt> {
        self.lock()
            .attempts
            .iter()
            .filter(|a| a.request.url == url)
            .cloned()
            .collect()
    }

    /// Time between consecutive attempts, in order.
    pub fn gaps(&self) -> Vec<Duration> {
        let attempts = self.lock().attempts.clone();
        attempts
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<u16, TransportError> {
        let response = {
            let mut state = self.lock();
            state.attempts.push(RecordedAttempt {
                at: Instant::now(),
                request: request.clone(),
            });
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        };

        match response {
            ScriptedResponse::Status(status) => Ok(status),
            ScriptedResponse::NetworkError => {
                Err(TransportError::Network("connection refused".to_string()))
            }
            ScriptedResponse::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Network("unreachable".to_string()))
            }
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for GeoHealth inputs.

    use super::*;
    use proptest::prelude::*;

    /// Two-digit state FIPS codes.
    pub fn arb_state_fips() -> impl Strategy<Value = String> {
        (1u8..57).prop_map(|n| format!("{n:02}"))
    }

    /// Eleven-digit tract GEOIDs.
    pub fn arb_geoid() -> impl Strategy<Value = String> {
        (arb_state_fips(), 0u64..1_000_000_000).prop_map(|(state, rest)| format!("{state}{rest:09}"))
    }

    /// Latitude/longitude within valid bounds.
    pub fn arb_coordinates() -> impl Strategy<Value = (f64, f64)> {
        (-90.0f64..=90.0, -180.0f64..=180.0)
    }

    pub fn arb_event_type() -> impl Strategy<Value = EventType> {
        prop_oneof![Just(EventType::DataUpdated), Just(EventType::ThresholdExceeded)]
    }

    pub fn arb_comparison() -> impl Strategy<Value = geohealth_webhooks::Comparison> {
        use geohealth_webhooks::Comparison;
        prop_oneof![
            Just(Comparison::GreaterThan),
            Just(Comparison::GreaterOrEqual),
            Just(Comparison::LessThan),
            Just(Comparison::LessOrEqual),
        ]
    }

    /// Event scope with an optional state and tract and up to three metrics.
    pub fn arb_scope() -> impl Strategy<Value = EventScope> {
        (
            prop::option::of(arb_state_fips()),
            prop::option::of(arb_geoid()),
            prop::collection::btree_map("[a-z_]{3,12}", 0.0f64..100.0, 0..3),
        )
            .prop_map(|(state_fips, geoid, metrics)| EventScope {
                state_fips,
                geoid,
                metrics,
            })
    }

    /// Filters within validation limits.
    pub fn arb_filters() -> impl Strategy<Value = SubscriptionFilters> {
        (
            prop::collection::vec(arb_state_fips(), 0..5),
            prop::collection::vec(arb_geoid(), 0..3),
            prop::collection::btree_map(
                "[a-z_]{3,12}",
                (arb_comparison(), 0.0f64..100.0)
                    .prop_map(|(operator, value)| ThresholdCondition { operator, value }),
                0..3,
            ),
        )
            .prop_map(|(state_fips, geoids, thresholds)| SubscriptionFilters {
                state_fips,
                geoids,
                thresholds,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built components wired to a manual clock.

    use super::*;

    pub const TEST_WEBHOOK_URL: &str = "https://hooks.example.com/geohealth";

    /// Cache of JSON values on `clock`.
    pub fn cache(clock: &ManualClock, max_entries: usize, ttl: Duration) -> BoundedCache<serde_json::Value> {
        BoundedCache::with_clock(
            NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN),
            ttl,
            clock.shared(),
        )
    }

    pub fn limiter(clock: &ManualClock, limit: u32, window: Duration) -> SlidingWindowLimiter {
        SlidingWindowLimiter::with_clock(
            NonZeroU32::new(limit.max(1)).unwrap_or(NonZeroU32::MIN),
            window,
            clock.shared(),
        )
    }

    pub fn metrics(clock: &ManualClock) -> Arc<MetricsAggregator> {
        Arc::new(MetricsAggregator::with_clock(
            NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
            clock.shared(),
        ))
    }

    /// Dispatcher settings for tests: 3 retries on a 1 s backoff base, 10 s
    /// attempt timeout, 30 s shutdown grace.
    pub fn webhook_config() -> WebhookConfig {
        WebhookConfig::default()
            .with_retry(3, Duration::from_secs(1))
            .with_attempt_timeout(Duration::from_secs(10))
            .with_shutdown_grace(Duration::from_secs(30))
    }

    /// Subscription to `data.updated` at [`TEST_WEBHOOK_URL`].
    pub fn data_updated_subscription() -> NewSubscription {
        NewSubscription::new(TEST_WEBHOOK_URL, [EventType::DataUpdated])
    }

    /// Payload the data pipeline publishes after loading one state.
    pub fn data_updated_payload(state_fips: &str) -> serde_json::Value {
        serde_json::json!({ "state_fips": state_fips, "etl_step": "acs" })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over metrics snapshots.

    use super::*;

    /// Assert a `category/outcome` counter value.
    #[track_caller]
    pub fn assert_outcome(snapshot: &MetricsSnapshot, category: &str, outcome: &str, expected: u64) {
        let actual = snapshot.outcome(category, outcome);
        assert_eq!(
            actual, expected,
            "Expected {category}/{outcome} = {expected}, got {actual}"
        );
    }

    /// Assert a limiter decision's public fields.
    #[track_caller]
    pub fn assert_decision(decision: &RateLimitDecision, allowed: bool, remaining: u32) {
        assert_eq!(decision.allowed, allowed, "Unexpected admission: {decision:?}");
        assert_eq!(decision.remaining, remaining, "Unexpected remaining: {decision:?}");
    }
}

/// Poll `condition` until it holds, sleeping `step` between checks.
///
/// Works under paused time: each sleep auto-advances the clock once the
/// runtime is idle. Panics after `max_steps` checks.
#[track_caller]
pub fn wait_until<'a, F>(
    mut condition: F,
    step: Duration,
    max_steps: usize,
) -> impl std::future::Future<Output = ()> + 'a
where
    F: FnMut() -> bool + 'a,
{
    let caller = std::panic::Location::caller();
    async move {
        for _ in 0..max_steps {
            if condition() {
                return;
            }
            tokio::time::sleep(step).await;
        }
        panic!("Condition not met after {max_steps} checks (called at {caller})");
    }
}
