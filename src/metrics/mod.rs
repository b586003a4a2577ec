//! Metrics for the cache façade.
//!
//! Prometheus-style counters and histograms kept in process. Every
//! [`ShardedCache`](crate::cache::ShardedCache) owns one [`CacheMetrics`];
//! scrape it with [`CacheMetrics::to_prometheus`] or read a
//! [`MetricsSnapshot`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    CacheMetrics                      │
//! │  ┌───────────────────────┐  ┌─────────────────────┐  │
//! │  │ Counters              │  │ Histograms          │  │
//! │  │ - get hits / misses   │  │ - get latency       │  │
//! │  │ - put / delete        │  │ - put latency       │  │
//! │  │ - batch calls         │  │ - delete latency    │  │
//! │  │ - truncations         │  │ - batch latency     │  │
//! │  │ - partial fan-outs    │  └─────────────────────┘  │
//! │  │ - errors{op,kind}     │                           │
//! │  └───────────────────────┘                           │
//! └──────────────────────────────────────────────────────┘
//! ```

mod counters;
mod histograms;

pub use counters::{Counter, LabeledCounter};
pub use histograms::{Histogram, HistogramSnapshot, LATENCY_BUCKETS};

use crate::error::Error;
use std::time::Duration;

/// All metrics of one cache instance.
#[derive(Debug)]
pub struct CacheMetrics {
    pub get_total: Counter,
    pub get_hits: Counter,
    pub get_misses: Counter,
    pub put_total: Counter,
    pub put_failures: Counter,
    pub delete_total: Counter,
    pub multi_get_total: Counter,
    /// Records returned by MultiGet calls.
    pub multi_get_records: Counter,
    pub multi_delete_total: Counter,
    /// Batches cut down to the key limit.
    pub batch_truncations: Counter,
    /// Fan-outs where some, but not all, shards failed.
    pub fanout_partial_failures: Counter,

    pub get_latency: Histogram,
    pub put_latency: Histogram,
    pub delete_latency: Histogram,
    pub batch_latency: Histogram,

    /// Failed operations by operation and error kind.
    pub errors: LabeledCounter<2>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            get_total: Counter::new("farmcache_get_total", "Total GET calls"),
            get_hits: Counter::new("farmcache_get_hits_total", "GET calls that found a record"),
            get_misses: Counter::new("farmcache_get_misses_total", "GET calls without a record"),
            put_total: Counter::new("farmcache_put_total", "Total PUT calls"),
            put_failures: Counter::new("farmcache_put_failures_total", "Failed PUT calls"),
            delete_total: Counter::new("farmcache_delete_total", "Total DELETE calls"),
            multi_get_total: Counter::new("farmcache_multi_get_total", "Total MULTI_GET calls"),
            multi_get_records: Counter::new(
                "farmcache_multi_get_records_total",
                "Records returned by MULTI_GET",
            ),
            multi_delete_total: Counter::new(
                "farmcache_multi_delete_total",
                "Total MULTI_DELETE calls",
            ),
            batch_truncations: Counter::new(
                "farmcache_batch_truncations_total",
                "Batches truncated to the key limit",
            ),
            fanout_partial_failures: Counter::new(
                "farmcache_fanout_partial_failures_total",
                "Fan-outs where some shards failed",
            ),
            get_latency: Histogram::new("farmcache_get_latency_seconds", "GET latency"),
            put_latency: Histogram::new("farmcache_put_latency_seconds", "PUT latency"),
            delete_latency: Histogram::new("farmcache_delete_latency_seconds", "DELETE latency"),
            batch_latency: Histogram::new(
                "farmcache_batch_latency_seconds",
                "MULTI_GET and MULTI_DELETE latency",
            ),
            errors: LabeledCounter::new(
                "farmcache_errors_total",
                "Failed calls by operation and error kind",
                ["op", "kind"],
            ),
        }
    }

    pub fn record_get(&self, hit: bool, latency: Duration) {
        self.get_total.inc();
        if hit {
            self.get_hits.inc();
        } else {
            self.get_misses.inc();
        }
        self.get_latency.observe_duration(latency);
    }

    pub fn record_put(&self, success: bool, latency: Duration) {
        self.put_total.inc();
        if !success {
            self.put_failures.inc();
        }
        self.put_latency.observe_duration(latency);
    }

    pub fn record_delete(&self, latency: Duration) {
        self.delete_total.inc();
        self.delete_latency.observe_duration(latency);
    }

    pub fn record_multi_get(&self, records: usize, latency: Duration) {
        self.multi_get_total.inc();
        self.multi_get_records.inc_by(records as u64);
        self.batch_latency.observe_duration(latency);
    }

    pub fn record_multi_delete(&self, latency: Duration) {
        self.multi_delete_total.inc();
        self.batch_latency.observe_duration(latency);
    }

    pub fn record_truncation(&self) {
        self.batch_truncations.inc();
    }

    pub fn record_partial_fanout(&self) {
        self.fanout_partial_failures.inc();
    }

    /// Count a failed operation under the error's kind.
    pub fn record_error(&self, op: &str, error: &Error) {
        self.errors.inc([op, error_kind(error)]);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            get_total: self.get_total.get(),
            get_hits: self.get_hits.get(),
            get_misses: self.get_misses.get(),
            put_total: self.put_total.get(),
            put_failures: self.put_failures.get(),
            delete_total: self.delete_total.get(),
            multi_get_total: self.multi_get_total.get(),
            multi_delete_total: self.multi_delete_total.get(),
            batch_truncations: self.batch_truncations.get(),
            fanout_partial_failures: self.fanout_partial_failures.get(),
            errors: self.errors.total(),
            get_latency: self.get_latency.snapshot(),
            put_latency: self.put_latency.snapshot(),
        }
    }

    /// Every metric in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        for counter in [
            &self.get_total,
            &self.get_hits,
            &self.get_misses,
            &self.put_total,
            &self.put_failures,
            &self.delete_total,
            &self.multi_get_total,
            &self.multi_get_records,
            &self.multi_delete_total,
            &self.batch_truncations,
            &self.fanout_partial_failures,
        ] {
            counter.render(&mut out);
        }
        self.errors.render(&mut out);
        for histogram in [
            &self.get_latency,
            &self.put_latency,
            &self.delete_latency,
            &self.batch_latency,
        ] {
            histogram.render(&mut out);
        }
        out
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Label value for an error.
pub fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::Config(_) => "config",
        Error::Backend(_) => "backend",
        Error::FanOut(f) if f.is_total() => "fanout_total",
        Error::FanOut(_) => "fanout_partial",
        Error::InvalidKey(_) => "invalid_key",
        Error::InvalidTtl(_) => "invalid_ttl",
        Error::ShardNotFound { .. } => "shard_not_found",
        Error::Cancelled => "cancelled",
        Error::Timeout => "timeout",
        Error::Internal(_) => "internal",
    }
}

/// Point-in-time copy of the main metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub get_total: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub put_total: u64,
    pub put_failures: u64,
    pub delete_total: u64,
    pub multi_get_total: u64,
    pub multi_delete_total: u64,
    pub batch_truncations: u64,
    pub fanout_partial_failures: u64,
    pub errors: u64,
    pub get_latency: HistogramSnapshot,
    pub put_latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    /// Share of GET calls that found a record.
    pub fn hit_rate(&self) -> f64 {
        if self.get_total == 0 {
            0.0
        } else {
            self.get_hits as f64 / self.get_total as f64
        }
    }

    pub fn avg_get_latency_ms(&self) -> f64 {
        self.get_latency.mean() * 1000.0
    }

    pub fn avg_put_latency_ms(&self) -> f64 {
        self.put_latency.mean() * 1000.0
    }
}
