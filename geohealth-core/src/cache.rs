//! Bounded result cache with time-based expiry and LRU eviction.
//!
//! The cache holds opaque values keyed by caller-supplied keys (usually
//! rounded coordinates, see [`cache_key`]). Capacity is fixed at construction;
//! inserting into a full cache evicts the least recently *accessed* entry.
//! Expired entries are invisible to `get` and are purged lazily.
//!
//! All operations are in-memory and total. A single mutex guards the LRU list
//! and the hit/miss counters, so the counters always agree with the lookups
//! that produced them.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::error::CoreResult;

/// Longest TTL honoured; larger overrides are clamped.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// A cached value with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Visible iff `now < expires_at`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently held, including expired ones not yet purged.
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to make room for a new key.
    pub evictions: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    fn hit_rate_of(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

struct CacheInner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Fixed-capacity LRU cache with uniform default TTL.
pub struct BoundedCache<V, K = String>
where
    K: Hash + Eq,
{
    inner: Mutex<CacheInner<K, V>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V, K> std::fmt::Debug for BoundedCache<V, K>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<V, K> BoundedCache<V, K>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache using the system clock.
    pub fn new(max_entries: NonZeroUsize, default_ttl: Duration) -> Self {
        Self::with_clock(max_entries, default_ttl, SystemClock::shared())
    }

    pub fn with_clock(max_entries: NonZeroUsize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(max_entries),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            default_ttl: default_ttl.min(MAX_TTL),
            clock,
        }
    }

    /// Build from validated configuration.
    pub fn from_config(config: &CoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self::with_clock(config.cache_capacity()?, config.cache_ttl, clock))
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<K, V>> {
        // Entries stay structurally valid across a panic, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a live entry, promoting it to most recently used.
    ///
    /// Expired entries count as misses and are removed.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.entries.peek(key).map(|entry| entry.is_live(now)) {
            Some(true) => {
                inner.hits += 1;
                inner.entries.get(key).map(|entry| entry.value.clone())
            }
            Some(false) => {
                inner.entries.pop(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, None);
    }

    /// Insert or replace, refreshing value, expiry and recency.
    ///
    /// `ttl` of `None` applies the configured default.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl).min(MAX_TTL);
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        };

        let mut inner = self.lock();
        if let Some((displaced, _)) = inner.entries.push(key.clone(), entry) {
            if displaced != key {
                inner.evictions += 1;
                tracing::trace!(capacity = inner.entries.cap().get(), "Evicted least recently used cache entry");
            }
        }
    }

    /// Drop an entry regardless of expiry.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().entries.pop(key).map(|entry| entry.value)
    }

    /// Remove every entry. Counters are left untouched.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: CacheStats::hit_rate_of(inner.hits, inner.misses),
        }
    }
}

/// Cache key for a coordinate pair, rounded to 4 decimal places (~11 m).
pub fn cache_key(lat: f64, lng: f64) -> String {
    format!("{},{}", round4(lat), round4(lng))
}

fn round4(value: f64) -> f64 {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    // Collapse -0.0 so "-0" and "0" share a key.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(capacity: usize, ttl_secs: u64) -> (BoundedCache<i32>, ManualClock) {
        let clock = ManualClock::new();
        let cache = BoundedCache::with_clock(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(ttl_secs),
            clock.shared(),
        );
        (cache, clock)
    }

    #[test]
    fn test_get_missing_counts_miss() {
        let (cache, _) = cache(2, 60);
        assert_eq!(cache.get("nope"), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_set_then_get_counts_hit() {
        let (cache, _) = cache(2, 60);
        cache.set("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eviction_removes_least_recently_used() {
        let (cache, _) = cache(2, 60);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("c".to_string(), 3);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_protects_entry_from_eviction() {
        let (cache, _) = cache(2, 60);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c".to_string(), 3);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_reset_of_same_key_refreshes_recency_without_eviction() {
        let (cache, _) = cache(2, 60);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("a".to_string(), 10);
        cache.set("c".to_string(), 3);

        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_boundary_is_half_open() {
        let (cache, clock) = cache(4, 10);
        cache.set("k".to_string(), 7);

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(cache.get("k"), Some(7));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0, "expired entry is removed on lookup");
    }

    #[test]
    fn test_reset_refreshes_expiry() {
        let (cache, clock) = cache(4, 10);
        cache.set("k".to_string(), 1);
        clock.advance(Duration::from_secs(8));
        cache.set("k".to_string(), 2);
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn test_ttl_override() {
        let (cache, clock) = cache(4, 3600);
        cache.set_with_ttl("short".to_string(), 1, Some(Duration::from_secs(1)));
        cache.set("long".to_string(), 2);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache(4, 10);
        cache.set("a".to_string(), 1);
        cache.set_with_ttl("b".to_string(), 2, Some(Duration::from_secs(60)));
        clock.advance(Duration::from_secs(11));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_clear_keeps_counters() {
        let (cache, _) = cache(4, 10);
        cache.set("a".to_string(), 1);
        cache.get("a");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_cache_key_rounds_to_four_decimals() {
        assert_eq!(cache_key(40.712_84, -74.006_01), "40.7128,-74.006");
        assert_eq!(cache_key(-0.000_01, 0.0), "0,0");
        assert_eq!(cache_key(44.977_751, -93.265_011), cache_key(44.977_759, -93.265_009));
    }
}
