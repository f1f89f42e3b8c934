//! Per-identity sliding-window admission control.
//!
//! Each identity owns an ordered queue of admission timestamps covering the
//! trailing window. A decision prunes timestamps at or before `now - window`,
//! then admits (and records `now`) only while fewer than `limit` remain.
//! Rejected calls are not recorded, so a client that keeps hammering does not
//! extend its own lockout.
//!
//! Windows are stored in a `DashMap`; the prune/compare/record sequence for
//! one identity runs under that entry's shard lock, and distinct identities
//! never share state.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::error::CoreResult;

/// Header carrying the configured limit.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Header carrying the admissions left in the current window.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Header carrying seconds until the oldest admission leaves the window.
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Whole seconds (rounded up) until the oldest retained timestamp falls
    /// outside the window; `0` when nothing is retained.
    pub reset_seconds: u64,
}

impl RateLimitDecision {
    /// `X-RateLimit-*` header pairs for this decision.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (RATE_LIMIT_LIMIT_HEADER, self.limit.to_string()),
            (RATE_LIMIT_REMAINING_HEADER, self.remaining.to_string()),
            (RATE_LIMIT_RESET_HEADER, self.reset_seconds.to_string()),
        ]
    }

    /// `Retry-After` value for a rejected request (at least one second).
    pub fn retry_after(&self) -> u64 {
        self.reset_seconds.max(1)
    }
}

/// Sliding-window rate limiter keyed by caller identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    limit: NonZeroU32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: NonZeroU32, window: Duration) -> Self {
        Self::with_clock(limit, window, SystemClock::shared())
    }

    pub fn with_clock(limit: NonZeroU32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
            clock,
        }
    }

    /// Build from validated configuration.
    pub fn from_config(config: &CoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self::with_clock(config.limit()?, config.window()?, clock))
    }

    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether `identity` may proceed now.
    pub fn is_allowed(&self, identity: &str) -> RateLimitDecision {
        let now = self.clock.now();

        let decision = match self.windows.get_mut(identity) {
            Some(mut timestamps) => self.decide(timestamps.value_mut(), now),
            None => {
                let mut timestamps = self.windows.entry(identity.to_owned()).or_default();
                self.decide(timestamps.value_mut(), now)
            }
        };

        if !decision.allowed {
            tracing::debug!(
                identity = %identity_prefix(identity),
                limit = decision.limit,
                reset_seconds = decision.reset_seconds,
                "Rate limit exceeded"
            );
        }
        decision
    }

    fn decide(&self, timestamps: &mut VecDeque<Instant>, now: Instant) -> RateLimitDecision {
        self.prune(timestamps, now);

        let limit = self.limit.get();
        let count = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        let allowed = count < limit;

        let remaining = if allowed {
            timestamps.push_back(now);
            limit - count - 1
        } else {
            0
        };

        let reset_seconds = timestamps
            .front()
            .map(|&oldest| ceil_secs(self.window.saturating_sub(now.saturating_duration_since(oldest))))
            .unwrap_or(0);

        RateLimitDecision {
            allowed,
            limit,
            remaining,
            reset_seconds,
        }
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            timestamps.pop_front();
        }
    }

    /// Drop identities whose window is empty after pruning.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            self.prune(timestamps, now);
            !timestamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Forget every identity.
    pub fn clear(&self) {
        self.windows.clear();
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Short, log-safe prefix of a (hashed) identity.
pub fn identity_prefix(identity: &str) -> &str {
    match identity.char_indices().nth(12) {
        Some((idx, _)) => &identity[..idx],
        None => identity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, window_secs: u64) -> (SlidingWindowLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = SlidingWindowLimiter::with_clock(
            NonZeroU32::new(limit).unwrap(),
            Duration::from_secs(window_secs),
            clock.shared(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let (limiter, _) = limiter(5, 60);
        for expected_remaining in (0..5).rev() {
            let decision = limiter.is_allowed("alice");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 5);
        }

        let rejected = limiter.is_allowed("alice");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_seconds, 60);
    }

    #[test]
    fn test_window_elapses_and_admits_again() {
        let (limiter, clock) = limiter(5, 60);
        for _ in 0..5 {
            assert!(limiter.is_allowed("alice").allowed);
        }
        assert!(!limiter.is_allowed("alice").allowed);

        clock.advance(Duration::from_secs(60));
        let decision = limiter.is_allowed("alice");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let (limiter, clock) = limiter(1, 10);
        assert!(limiter.is_allowed("bob").allowed);
        clock.advance(Duration::from_secs(5));
        assert!(!limiter.is_allowed("bob").allowed);
        clock.advance(Duration::from_secs(5));
        assert!(limiter.is_allowed("bob").allowed);
    }

    #[test]
    fn test_reset_tracks_oldest_timestamp() {
        let (limiter, clock) = limiter(3, 60);
        assert_eq!(limiter.is_allowed("carol").reset_seconds, 60);
        clock.advance(Duration::from_millis(10_500));
        assert_eq!(limiter.is_allowed("carol").reset_seconds, 50);
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _) = limiter(2, 60);
        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);

        let other = limiter.is_allowed("b");
        assert!(other.allowed);
        assert_eq!(other.remaining, 1);
    }

    #[test]
    fn test_sweep_drops_empty_windows() {
        let (limiter, clock) = limiter(2, 60);
        limiter.is_allowed("a");
        limiter.is_allowed("b");
        clock.advance(Duration::from_secs(30));
        limiter.is_allowed("b");
        clock.advance(Duration::from_secs(30));

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn test_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 60,
            remaining: 59,
            reset_seconds: 60,
        };
        let headers = decision.headers();
        assert_eq!(headers[0], ("x-ratelimit-limit", "60".to_string()));
        assert_eq!(headers[1], ("x-ratelimit-remaining", "59".to_string()));
        assert_eq!(headers[2], ("x-ratelimit-reset", "60".to_string()));
        assert_eq!(
            RateLimitDecision { reset_seconds: 0, ..decision }.retry_after(),
            1
        );
    }

    #[test]
    fn test_identity_prefix() {
        assert_eq!(identity_prefix("0123456789abcdef"), "0123456789ab");
        assert_eq!(identity_prefix("short"), "short");
    }
}
