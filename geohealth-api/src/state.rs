//! Shared application state for Axum routers.
//!
//! `AppState` is the composition root: it owns the single cache, limiter,
//! metrics aggregator and webhook dispatcher for the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use geohealth_core::{
    BoundedCache, Clock, CoreConfig, MetricsAggregator, SlidingWindowLimiter, SystemClock,
};
use geohealth_webhooks::{ReqwestTransport, WebhookConfig, WebhookDispatcher, WebhookTransport};
use serde_json::Value;

use crate::config::ApiConfig;
use crate::error::ApiResult;

/// Result cache shared by lookup handlers, keyed by [`geohealth_core::cache_key`].
pub type ResultCache = BoundedCache<Value>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ResultCache>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub metrics: Arc<MetricsAggregator>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

crate::impl_from_ref!(Arc<ResultCache>, cache);
crate::impl_from_ref!(Arc<SlidingWindowLimiter>, limiter);
crate::impl_from_ref!(Arc<MetricsAggregator>, metrics);
crate::impl_from_ref!(Arc<WebhookDispatcher>, dispatcher);
crate::impl_from_ref!(Arc<ApiConfig>, config);

impl AppState {
    /// Build every component on the system clock with the reqwest transport.
    ///
    /// Must run inside a Tokio runtime.
    pub fn from_config(
        core: &CoreConfig,
        webhooks: WebhookConfig,
        api: ApiConfig,
    ) -> ApiResult<Self> {
        let transport: Arc<dyn WebhookTransport> = Arc::new(ReqwestTransport::new(&webhooks)?);
        Self::with_components(core, webhooks, api, SystemClock::shared(), transport)
    }

    /// Build every component on `clock`, delivering webhooks via `transport`.
    pub fn with_components(
        core: &CoreConfig,
        webhooks: WebhookConfig,
        api: ApiConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn WebhookTransport>,
    ) -> ApiResult<Self> {
        let cache = Arc::new(BoundedCache::from_config(core, clock.clone())?);
        let limiter = Arc::new(SlidingWindowLimiter::from_config(core, clock.clone())?);
        let metrics = Arc::new(MetricsAggregator::from_config(core, clock)?);
        let dispatcher = Arc::new(WebhookDispatcher::new(webhooks, transport, metrics.clone())?);

        tracing::info!(
            cache_max_entries = core.cache_max_entries,
            cache_ttl_secs = core.cache_ttl.as_secs(),
            rate_limit = core.rate_limit,
            rate_limit_window_secs = core.rate_limit_window.as_secs(),
            auth_enabled = api.auth_enabled,
            "Application state initialized"
        );

        Ok(Self {
            cache,
            limiter,
            metrics,
            dispatcher,
            config: Arc::new(api),
            start_time: Instant::now(),
        })
    }

    /// Serve `key` from the cache, or run `fetch` and cache its result.
    ///
    /// Failed fetches are not cached. Every call reports a `cache/hit` or
    /// `cache/miss` outcome.
    pub async fn cached<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.cache.get(key) {
            self.metrics.record_cache(true);
            return Ok(value);
        }

        self.metrics.record_cache(false);
        let value = fetch().await?;
        self.cache.set(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
