//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `chip_ledger_commits_total` - Entries committed, labelled by kind
//! - `chip_ledger_replays_total` - Idempotent replays served from cache
//! - `chip_ledger_conflicts_total` - CAS conflicts (retried writes)
//! - `chip_ledger_rejections_total` - Insufficient-balance rejections
//! - `chip_ledger_commit_attempts` - CAS attempts per committed operation

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Entries committed, by entry type
    pub commits_total: IntCounterVec,

    /// Idempotent replays served from cache
    pub replays_total: IntCounter,

    /// CAS conflicts observed (each one triggers a retry)
    pub conflicts_total: IntCounter,

    /// Insufficient-balance rejections
    pub rejections_total: IntCounter,

    /// CAS attempts needed per committed operation
    pub commit_attempts: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let commits_total = IntCounterVec::new(
            Opts::new("chip_ledger_commits_total", "Entries committed"),
            &["entry_type"],
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let replays_total = IntCounter::new(
            "chip_ledger_replays_total",
            "Idempotent replays served from cache",
        )?;
        registry.register(Box::new(replays_total.clone()))?;

        let conflicts_total = IntCounter::new(
            "chip_ledger_conflicts_total",
            "CAS conflicts (retried writes)",
        )?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let rejections_total = IntCounter::new(
            "chip_ledger_rejections_total",
            "Insufficient-balance rejections",
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let commit_attempts = Histogram::with_opts(
            HistogramOpts::new(
                "chip_ledger_commit_attempts",
                "CAS attempts per committed operation",
            )
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0]),
        )?;
        registry.register(Box::new(commit_attempts.clone()))?;

        Ok(Self {
            commits_total,
            replays_total,
            conflicts_total,
            rejections_total,
            commit_attempts,
            registry,
        })
    }

    /// Record a committed entry and the attempts it took
    pub fn record_commit(&self, entry_type: &str, attempts: u32) {
        self.commits_total.with_label_values(&[entry_type]).inc();
        self.commit_attempts.observe(attempts as f64);
    }

    /// Record an idempotent replay
    pub fn record_replay(&self) {
        self.replays_total.inc();
    }

    /// Record a CAS conflict
    pub fn record_conflict(&self) {
        self.conflicts_total.inc();
    }

    /// Record an insufficient-balance rejection
    pub fn record_rejection(&self) {
        self.rejections_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.replays_total.get(), 0);
        assert_eq!(metrics.conflicts_total.get(), 0);
    }

    #[test]
    fn test_record_commit() {
        let metrics = Metrics::new().unwrap();
        metrics.record_commit("earn", 1);
        metrics.record_commit("earn", 3);
        metrics.record_commit("spend", 1);

        assert_eq!(metrics.commits_total.with_label_values(&["earn"]).get(), 2);
        assert_eq!(metrics.commits_total.with_label_values(&["spend"]).get(), 1);
    }

    #[test]
    fn test_record_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_replay();
        metrics.record_conflict();
        metrics.record_conflict();
        metrics.record_rejection();

        assert_eq!(metrics.replays_total.get(), 1);
        assert_eq!(metrics.conflicts_total.get(), 2);
        assert_eq!(metrics.rejections_total.get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors must not clash on metric names
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_replay();
        assert_eq!(a.replays_total.get(), 1);
        assert_eq!(b.replays_total.get(), 0);
    }
}
