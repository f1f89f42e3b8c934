//! In-process metrics aggregator.
//!
//! Collects monotonic counters (requests, status codes, categorised
//! outcomes) and latency samples, and renders a [`MetricsSnapshot`] on demand.
//!
//! # Percentiles
//!
//! Each latency series keeps its most recent `sample_capacity` samples in a
//! ring buffer; older samples are evicted first, so percentiles over long runs
//! are approximate. For a sorted sample set `s` of length `n`, quantile `q` is
//! `s[lo] + (s[hi] - s[lo]) * (rank - lo)` where `rank = q * (n - 1)`,
//! `lo = floor(rank)` and `hi = ceil(rank)`, rounded to two decimals. An empty
//! series reports zeros. The computation is a pure function of the retained
//! samples, so repeated snapshots of unchanged state are identical.
//!
//! Writers and `snapshot` share one mutex. `snapshot` holds it only long
//! enough to copy counters and samples; sorting happens after release.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::error::CoreResult;

/// Well-known outcome categories and values.
pub mod outcomes {
    pub const CACHE: &str = "cache";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";

    pub const LIMITER: &str = "limiter";
    pub const ADMIT: &str = "admit";
    pub const REJECT: &str = "reject";

    pub const AUTH: &str = "auth";
    pub const FAILURE: &str = "failure";

    pub const GEOCODER: &str = "geocoder";
    pub const NARRATIVE: &str = "narrative";

    pub const WEBHOOK: &str = "webhook";
    pub const DELIVERED: &str = "delivered";
    pub const RETRY: &str = "retry";
    pub const FAILED: &str = "failed";
    pub const DROPPED: &str = "dropped";
}

/// Latency series fed by `record_request`.
pub const REQUEST_SERIES: &str = "request";

const QUANTILES: [f64; 4] = [0.50, 0.90, 0.95, 0.99];

/// Percentile summary of one latency series, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Samples currently retained.
    pub samples: usize,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Cache counters derived from the `cache` outcome category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Read-only status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub outcomes: BTreeMap<String, BTreeMap<String, u64>>,
    pub cache: CacheSummary,
    pub latency_ms: BTreeMap<String, LatencySummary>,
}

impl MetricsSnapshot {
    /// Counter for `category`/`outcome`, zero if never recorded.
    pub fn outcome(&self, category: &str, outcome: &str) -> u64 {
        self.outcomes
            .get(category)
            .and_then(|by_outcome| by_outcome.get(outcome))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct MetricsState {
    total_requests: u64,
    status_codes: BTreeMap<u16, u64>,
    outcomes: BTreeMap<String, BTreeMap<String, u64>>,
    series: HashMap<String, VecDeque<f64>>,
    started_at: Instant,
}

impl MetricsState {
    fn new(started_at: Instant) -> Self {
        Self {
            total_requests: 0,
            status_codes: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            series: HashMap::new(),
            started_at,
        }
    }
}

/// Thread-safe counters and latency reservoirs.
#[derive(Debug)]
pub struct MetricsAggregator {
    state: Mutex<MetricsState>,
    sample_capacity: NonZeroUsize,
    clock: Arc<dyn Clock>,
}

impl MetricsAggregator {
    pub fn new(sample_capacity: NonZeroUsize) -> Self {
        Self::with_clock(sample_capacity, SystemClock::shared())
    }

    pub fn with_clock(sample_capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MetricsState::new(clock.now())),
            sample_capacity,
            clock,
        }
    }

    /// Build from validated configuration.
    pub fn from_config(config: &CoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self::with_clock(config.sample_capacity()?, clock))
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one finished request and record its latency.
    pub fn record_request(&self, status_code: u16, latency_ms: f64) {
        let mut state = self.lock();
        state.total_requests += 1;
        *state.status_codes.entry(status_code).or_insert(0) += 1;
        self.push_sample(&mut state, REQUEST_SERIES, latency_ms);
    }

    /// Count one `outcome` under `category`. Unknown names are accepted as is.
    pub fn record_outcome(&self, category: &str, outcome: &str) {
        let mut state = self.lock();
        if let Some(count) = state
            .outcomes
            .get_mut(category)
            .and_then(|by_outcome| by_outcome.get_mut(outcome))
        {
            *count += 1;
            return;
        }
        *state
            .outcomes
            .entry(category.to_owned())
            .or_default()
            .entry(outcome.to_owned())
            .or_insert(0) += 1;
    }

    /// Record a latency sample into a named series.
    pub fn record_latency(&self, series: &str, latency_ms: f64) {
        let mut state = self.lock();
        self.push_sample(&mut state, series, latency_ms);
    }

    pub fn record_cache(&self, hit: bool) {
        self.record_outcome(outcomes::CACHE, if hit { outcomes::HIT } else { outcomes::MISS });
    }

    pub fn record_admission(&self, allowed: bool) {
        self.record_outcome(
            outcomes::LIMITER,
            if allowed { outcomes::ADMIT } else { outcomes::REJECT },
        );
    }

    fn push_sample(&self, state: &mut MetricsState, series: &str, latency_ms: f64) {
        if !latency_ms.is_finite() {
            tracing::trace!(series, "Ignoring non-finite latency sample");
            return;
        }
        if !state.series.contains_key(series) {
            let initial = self.sample_capacity.get().min(1024);
            state.series.insert(series.to_owned(), VecDeque::with_capacity(initial));
        }
        let Some(samples) = state.series.get_mut(series) else {
            return;
        };
        if samples.len() == self.sample_capacity.get() {
            samples.pop_front();
        }
        samples.push_back(latency_ms.max(0.0));
    }

    /// Consistent copy of every counter plus percentile summaries.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = self.clock.now();
        let (uptime, total_requests, status_codes, outcome_counts, series) = {
            let state = self.lock();
            let series: Vec<(String, Vec<f64>)> = state
                .series
                .iter()
                .map(|(name, samples)| (name.clone(), samples.iter().copied().collect()))
                .collect();
            (
                now.saturating_duration_since(state.started_at),
                state.total_requests,
                state.status_codes.clone(),
                state.outcomes.clone(),
                series,
            )
        };

        let latency_ms = series
            .into_iter()
            .map(|(name, mut samples)| {
                samples.sort_by(f64::total_cmp);
                (name, summarize(&samples))
            })
            .collect();

        let cache_outcomes = outcome_counts.get(outcomes::CACHE);
        let count = |name: &str| {
            cache_outcomes
                .and_then(|by_outcome| by_outcome.get(name))
                .copied()
                .unwrap_or(0)
        };
        let hits = count(outcomes::HIT);
        let misses = count(outcomes::MISS);
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            round_to(hits as f64 / (hits + misses) as f64, 4)
        };

        MetricsSnapshot {
            uptime_seconds: round_to(uptime.as_secs_f64(), 2),
            total_requests,
            status_codes,
            outcomes: outcome_counts,
            cache: CacheSummary {
                hits,
                misses,
                hit_rate,
            },
            latency_ms,
        }
    }

    /// Zero all counters, drop all samples and restart the uptime clock.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        *state = MetricsState::new(now);
    }
}

fn summarize(sorted: &[f64]) -> LatencySummary {
    let [p50, p90, p95, p99] = QUANTILES.map(|q| percentile(sorted, q));
    LatencySummary {
        samples: sorted.len(),
        p50,
        p90,
        p95,
        p99,
    }
}

/// Linear-interpolated quantile of an ascending slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => round_to(sorted[0], 2),
        n => {
            let rank = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let value = sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64);
            round_to(value, 2)
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn aggregator(capacity: usize) -> (MetricsAggregator, ManualClock) {
        let clock = ManualClock::new();
        let metrics = MetricsAggregator::with_clock(NonZeroUsize::new(capacity).unwrap(), clock.shared());
        (metrics, clock)
    }

    #[test]
    fn test_record_request_counts_status_codes() {
        let (metrics, _) = aggregator(16);
        metrics.record_request(200, 1.0);
        metrics.record_request(200, 2.0);
        metrics.record_request(404, 3.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.status_codes.get(&200), Some(&2));
        assert_eq!(snapshot.status_codes.get(&404), Some(&1));
        assert_eq!(snapshot.latency_ms[REQUEST_SERIES].samples, 3);
    }

    #[test]
    fn test_record_outcome_accepts_unknown_categories() {
        let (metrics, _) = aggregator(16);
        metrics.record_outcome(outcomes::GEOCODER, "census");
        metrics.record_outcome(outcomes::GEOCODER, "census");
        metrics.record_outcome("brand-new", "whatever");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.outcome(outcomes::GEOCODER, "census"), 2);
        assert_eq!(snapshot.outcome("brand-new", "whatever"), 1);
        assert_eq!(snapshot.outcome("brand-new", "missing"), 0);
    }

    #[test]
    fn test_cache_summary_is_derived_from_outcomes() {
        let (metrics, _) = aggregator(16);
        metrics.record_cache(true);
        metrics.record_cache(true);
        metrics.record_cache(false);

        let cache = metrics.snapshot().cache;
        assert_eq!(cache.hits, 2);
        assert_eq!(cache.misses, 1);
        assert!((cache.hit_rate - 0.6667).abs() < 1e-9);
    }

    #[test]
    fn test_percentiles_interpolate_between_ranks() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.50), 50.5);
        assert_eq!(percentile(&sorted, 0.90), 90.1);
        assert_eq!(percentile(&sorted, 0.95), 95.05);
        assert_eq!(percentile(&sorted, 0.99), 99.01);
    }

    #[test]
    fn test_percentiles_of_empty_and_single_series() {
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[12.345], 0.99), 12.35);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest_samples() {
        let (metrics, _) = aggregator(3);
        for latency in [100.0, 1.0, 2.0, 3.0] {
            metrics.record_latency("geocoder", latency);
        }

        let summary = metrics.snapshot().latency_ms["geocoder"];
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.p50, 2.0);
        assert_eq!(summary.p99, 2.98);
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let (metrics, _) = aggregator(3);
        metrics.record_latency("x", f64::NAN);
        metrics.record_latency("x", f64::INFINITY);
        assert!(metrics.snapshot().latency_ms.is_empty());
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let (metrics, _) = aggregator(64);
        for i in 0..50 {
            metrics.record_request(if i % 7 == 0 { 500 } else { 200 }, f64::from(i) * 1.7);
        }
        assert_eq!(metrics.snapshot(), metrics.snapshot());
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let (metrics, clock) = aggregator(8);
        metrics.record_request(200, 5.0);
        metrics.record_outcome(outcomes::WEBHOOK, outcomes::DELIVERED);
        clock.advance(Duration::from_secs(30));
        assert_eq!(metrics.snapshot().uptime_seconds, 30.0);

        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert!(snapshot.status_codes.is_empty());
        assert!(snapshot.outcomes.is_empty());
        assert!(snapshot.latency_ms.is_empty());
        assert_eq!(snapshot.uptime_seconds, 0.0);
    }

    #[test]
    fn test_snapshot_serializes_status_codes_as_object() {
        let (metrics, _) = aggregator(8);
        metrics.record_request(200, 1.0);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["status_codes"]["200"], 1);
        assert_eq!(json["latency_ms"]["request"]["p50"], 1.0);
    }
}
