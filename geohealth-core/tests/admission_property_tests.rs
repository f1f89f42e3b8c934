//! Property-Based Tests for the Admission Core
//!
//! **Cache capacity**: after any sequence of distinct inserts the cache holds
//! exactly the most recent `min(n, capacity)` keys.
//!
//! **Limiter independence**: exhausting one identity never changes another
//! identity's decisions.
//!
//! **Snapshot idempotence**: snapshotting unchanged metrics twice yields the
//! same report.

use std::num::{NonZeroU32, NonZeroUsize};
use std::thread;
use std::time::Duration;

use geohealth_core::{BoundedCache, ManualClock, MetricsAggregator, SlidingWindowLimiter};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cache_keeps_most_recent_keys(capacity in 1usize..16, inserts in 0usize..48) {
        let cache: BoundedCache<usize> = BoundedCache::with_clock(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(60),
            ManualClock::new().shared(),
        );
        for i in 0..inserts {
            cache.set(format!("k{i}"), i);
        }

        let retained = inserts.min(capacity);
        prop_assert_eq!(cache.len(), retained);
        for i in 0..inserts {
            let expected = if i >= inserts - retained { Some(i) } else { None };
            prop_assert_eq!(cache.get(format!("k{i}").as_str()), expected);
        }
        prop_assert_eq!(cache.stats().evictions as usize, inserts - retained);
    }

    #[test]
    fn prop_limiter_identities_do_not_share_state(limit in 1u32..10, extra in 0u32..10) {
        let limiter = SlidingWindowLimiter::with_clock(
            NonZeroU32::new(limit).unwrap(),
            Duration::from_secs(60),
            ManualClock::new().shared(),
        );

        for _ in 0..(limit + extra) {
            limiter.is_allowed("identity-a");
        }
        prop_assert!(!limiter.is_allowed("identity-a").allowed);

        for n in 0..limit {
            let decision = limiter.is_allowed("identity-b");
            prop_assert!(decision.allowed);
            prop_assert_eq!(decision.remaining, limit - n - 1);
        }
    }

    #[test]
    fn prop_snapshot_is_idempotent(latencies in prop::collection::vec(0.0f64..5_000.0, 0..200)) {
        let metrics = MetricsAggregator::with_clock(
            NonZeroUsize::new(64).unwrap(),
            ManualClock::new().shared(),
        );
        for (i, latency) in latencies.iter().enumerate() {
            metrics.record_request(if i % 3 == 0 { 404 } else { 200 }, *latency);
        }
        prop_assert_eq!(metrics.snapshot(), metrics.snapshot());
    }
}

#[test]
fn test_limiter_admits_exactly_limit_under_contention() {
    let limiter = Arc::new(SlidingWindowLimiter::with_clock(
        NonZeroU32::new(50).unwrap(),
        Duration::from_secs(60),
        ManualClock::new().shared(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || (0..25).filter(|_| limiter.is_allowed("shared").allowed).count())
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 50);
}

#[test]
fn test_cache_counters_are_consistent_under_contention() {
    let cache: Arc<BoundedCache<u32>> = Arc::new(BoundedCache::with_clock(
        NonZeroUsize::new(8).unwrap(),
        Duration::from_secs(60),
        ManualClock::new().shared(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..100u32 {
                    let key = format!("k{}", (i + t) % 12);
                    if cache.get(key.as_str()).is_none() {
                        cache.set(key, i);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 400);
    assert!(stats.size <= 8);
}
