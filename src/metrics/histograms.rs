//! Latency histograms.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds, in seconds, for backend call latencies.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// A cumulative histogram with fixed buckets.
///
/// The sum is kept in whole microseconds so it fits an atomic integer.
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(name, help, LATENCY_BUCKETS.to_vec())
    }

    pub fn with_buckets(name: &'static str, help: &'static str, mut bounds: Vec<f64>) -> Self {
        bounds.retain(|b| b.is_finite());
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            name,
            help,
            bounds,
            counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn observe_duration(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            if secs <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            cumulative: self
                .counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            sum: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            count: self.count.load(Ordering::Relaxed),
        }
    }

    /// Append the histogram in Prometheus text format.
    pub fn render(&self, out: &mut String) {
        let snap = self.snapshot();
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} histogram", self.name);
        for (bound, count) in snap.bounds.iter().zip(&snap.cumulative) {
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", self.name, bound, count);
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", self.name, snap.count);
        let _ = writeln!(out, "{}_sum {}", self.name, snap.sum);
        let _ = writeln!(out, "{}_count {}", self.name, snap.count);
    }
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds, in seconds.
    pub bounds: Vec<f64>,
    /// Observations at or below each bound.
    pub cumulative: Vec<u64>,
    /// Sum of observations, in seconds.
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Upper bound of the bucket holding the `p`-th percentile.
    ///
    /// Observations above the last bound report that bound.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = ((self.count as f64) * p / 100.0).ceil().max(1.0) as u64;
        self.bounds
            .iter()
            .zip(&self.cumulative)
            .find(|(_, count)| **count >= target)
            .or_else(|| self.bounds.iter().zip(&self.cumulative).last())
            .map_or(0.0, |(bound, _)| *bound)
    }
}
