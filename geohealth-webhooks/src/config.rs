//! Dispatcher configuration.

use std::time::Duration;

use geohealth_core::ConfigError;

use crate::delivery::RetryPolicy;
use crate::error::WebhookResult;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_PER_OWNER: usize = 10;
pub const DEFAULT_CONCURRENCY: usize = 16;
pub const DEFAULT_LANE_CAPACITY: usize = 256;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_USER_AGENT: &str = "GeoHealth-Webhook/1.0";

/// Settings for subscription limits, retry policy and delivery concurrency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Backoff unit; failed attempt `n` waits `backoff_base * 2^n`.
    pub backoff_base: Duration,
    /// Per-attempt network timeout.
    pub attempt_timeout: Duration,
    /// Active subscriptions allowed per owner.
    pub max_per_owner: usize,
    /// Concurrent outbound attempts across all subscriptions.
    pub concurrency: usize,
    /// Queued deliveries per subscription before new ones are dropped.
    pub lane_capacity: usize,
    /// How long `shutdown` waits for queued and in-flight deliveries.
    pub shutdown_grace: Duration,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_per_owner: DEFAULT_MAX_PER_OWNER,
            concurrency: DEFAULT_CONCURRENCY,
            lane_capacity: DEFAULT_LANE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl WebhookConfig {
    /// Create WebhookConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GEOHEALTH_WEBHOOK_MAX_RETRIES` (default: 3)
    /// - `GEOHEALTH_WEBHOOK_BACKOFF_BASE_MS` (default: 1000)
    /// - `GEOHEALTH_WEBHOOK_TIMEOUT_SECS` (default: 10)
    /// - `GEOHEALTH_WEBHOOK_MAX_PER_KEY` (default: 10)
    /// - `GEOHEALTH_WEBHOOK_CONCURRENCY` (default: 16)
    /// - `GEOHEALTH_WEBHOOK_LANE_CAPACITY` (default: 256)
    pub fn from_env() -> Self {
        Self {
            max_retries: env_parse("GEOHEALTH_WEBHOOK_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
            backoff_base: env_parse("GEOHEALTH_WEBHOOK_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BACKOFF_BASE),
            attempt_timeout: env_parse("GEOHEALTH_WEBHOOK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT),
            max_per_owner: env_parse("GEOHEALTH_WEBHOOK_MAX_PER_KEY")
                .unwrap_or(DEFAULT_MAX_PER_OWNER),
            concurrency: env_parse("GEOHEALTH_WEBHOOK_CONCURRENCY").unwrap_or(DEFAULT_CONCURRENCY),
            lane_capacity: env_parse("GEOHEALTH_WEBHOOK_LANE_CAPACITY")
                .unwrap_or(DEFAULT_LANE_CAPACITY),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_max_per_owner(mut self, max: usize) -> Self {
        self.max_per_owner = max;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = capacity;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base)
    }

    /// Check every field, reporting the first invalid one.
    ///
    /// `max_retries = 0` and a zero backoff are valid (single attempt, or
    /// immediate retries).
    pub fn validate(&self) -> WebhookResult<()> {
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::must_be_positive("webhook_attempt_timeout", "0s").into());
        }
        if self.max_per_owner == 0 {
            return Err(ConfigError::must_be_positive("webhook_max_per_owner", 0).into());
        }
        if self.concurrency == 0 {
            return Err(ConfigError::must_be_positive("webhook_concurrency", 0).into());
        }
        if self.lane_capacity == 0 {
            return Err(ConfigError::must_be_positive("webhook_lane_capacity", 0).into());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebhookError;

    #[test]
    fn test_defaults_are_valid() {
        let config = WebhookConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_policy().max_attempts(), 4);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = WebhookConfig::default().with_concurrency(0).validate().unwrap_err();
        assert!(matches!(err, WebhookError::Config(_)));
        assert!(err.to_string().contains("webhook_concurrency"));
    }

    #[test]
    fn test_zero_retries_allowed() {
        let config = WebhookConfig::default().with_retry(0, Duration::ZERO);
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy().max_attempts(), 1);
    }
}
