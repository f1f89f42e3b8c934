//! Core configuration.
//!
//! Loaded from environment variables with development defaults, following
//! the same `GEOHEALTH_*` convention as the API and webhook crates.

use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use crate::error::{ConfigError, CoreResult};

/// Default maximum number of cached results.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 4096;

/// Default time-to-live for cached results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default requests admitted per identity per window.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Default sliding window length.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of latency samples retained per series.
pub const DEFAULT_METRICS_SAMPLE_CAPACITY: usize = 10_000;

/// Settings for the cache, limiter and metrics aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Maximum number of entries held by the result cache.
    pub cache_max_entries: usize,
    /// Uniform time-to-live applied on `set`.
    pub cache_ttl: Duration,
    /// Requests admitted per identity within `rate_limit_window`.
    pub rate_limit: u32,
    /// Length of the trailing admission window.
    pub rate_limit_window: Duration,
    /// Ring buffer capacity per latency series.
    pub metrics_sample_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_ttl: DEFAULT_CACHE_TTL,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            metrics_sample_capacity: DEFAULT_METRICS_SAMPLE_CAPACITY,
        }
    }
}

impl CoreConfig {
    /// Create CoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GEOHEALTH_CACHE_MAX_ENTRIES` (default: 4096)
    /// - `GEOHEALTH_CACHE_TTL_SECS` (default: 3600)
    /// - `GEOHEALTH_RATE_LIMIT` (default: 60)
    /// - `GEOHEALTH_RATE_LIMIT_WINDOW_SECS` (default: 60)
    /// - `GEOHEALTH_METRICS_SAMPLES` (default: 10000)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self {
            cache_max_entries: env_parse("GEOHEALTH_CACHE_MAX_ENTRIES")
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            cache_ttl: env_parse("GEOHEALTH_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_TTL),
            rate_limit: env_parse("GEOHEALTH_RATE_LIMIT").unwrap_or(DEFAULT_RATE_LIMIT),
            rate_limit_window: env_parse("GEOHEALTH_RATE_LIMIT_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW),
            metrics_sample_capacity: env_parse("GEOHEALTH_METRICS_SAMPLES")
                .unwrap_or(DEFAULT_METRICS_SAMPLE_CAPACITY),
        }
    }

    pub fn with_cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = limit;
        self.rate_limit_window = window;
        self
    }

    pub fn with_metrics_sample_capacity(mut self, capacity: usize) -> Self {
        self.metrics_sample_capacity = capacity;
        self
    }

    /// Check every field, reporting the first invalid one.
    pub fn validate(&self) -> CoreResult<()> {
        self.cache_capacity()?;
        self.limit()?;
        self.window()?;
        self.sample_capacity()?;
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::must_be_positive("cache_ttl", "0s").into());
        }
        Ok(())
    }

    pub(crate) fn cache_capacity(&self) -> CoreResult<NonZeroUsize> {
        NonZeroUsize::new(self.cache_max_entries)
            .ok_or_else(|| ConfigError::must_be_positive("cache_max_entries", 0).into())
    }

    pub(crate) fn limit(&self) -> CoreResult<NonZeroU32> {
        NonZeroU32::new(self.rate_limit)
            .ok_or_else(|| ConfigError::must_be_positive("rate_limit", 0).into())
    }

    pub(crate) fn window(&self) -> CoreResult<Duration> {
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::must_be_positive("rate_limit_window", "0s").into());
        }
        Ok(self.rate_limit_window)
    }

    pub(crate) fn sample_capacity(&self) -> CoreResult<NonZeroUsize> {
        NonZeroUsize::new(self.metrics_sample_capacity)
            .ok_or_else(|| ConfigError::must_be_positive("metrics_sample_capacity", 0).into())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
