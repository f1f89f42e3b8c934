//! GeoHealth Core - Request Admission
//!
//! The in-memory services that sit between the HTTP layer and the outside
//! world:
//!
//! - [`BoundedCache`]: fixed-capacity result cache with TTL expiry and LRU eviction
//! - [`SlidingWindowLimiter`]: per-identity sliding-window admission control
//! - [`MetricsAggregator`]: counters and live latency percentiles
//!
//! Each component is constructed once per process by the composition root
//! and shared behind an `Arc`. None of them performs I/O, and none calls into
//! another; callers report outcomes to the aggregator themselves.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod metrics;

pub use cache::{cache_key, BoundedCache, CacheEntry, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use error::{ConfigError, CoreError, CoreResult};
pub use identity::{hash_api_key, AcceptedKeys, ANONYMOUS_IDENTITY};
pub use limiter::{RateLimitDecision, SlidingWindowLimiter};
pub use metrics::{outcomes, LatencySummary, MetricsAggregator, MetricsSnapshot, REQUEST_SERIES};
