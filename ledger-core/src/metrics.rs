//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_total` - Postings committed, by transaction type
//! - `ledger_apply_duration_seconds` - Histogram of apply latencies
//! - `ledger_version_conflicts_total` - Optimistic commits that had to retry
//! - `ledger_idempotent_replays_total` - Calls answered from an existing reference
//! - `ledger_transfer_rollbacks_total` - Transfers discarded whole when a leg or attached record failed

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed postings by type
    pub transactions_total: IntCounterVec,

    /// Apply duration histogram
    pub apply_duration: Histogram,

    /// Version conflicts (each one is a retry)
    pub version_conflicts: IntCounter,

    /// Idempotent replays
    pub replays: IntCounter,

    /// Transfers discarded before commit
    pub transfer_rollbacks: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new("ledger_transactions_total", "Postings committed, by transaction type"),
            &["type"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_apply_duration_seconds", "Histogram of apply latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        let version_conflicts = IntCounter::new(
            "ledger_version_conflicts_total",
            "Optimistic commits that had to retry",
        )?;
        registry.register(Box::new(version_conflicts.clone()))?;

        let replays = IntCounter::new(
            "ledger_idempotent_replays_total",
            "Calls answered from an existing reference",
        )?;
        registry.register(Box::new(replays.clone()))?;

        let transfer_rollbacks = IntCounter::new(
            "ledger_transfer_rollbacks_total",
            "Transfers discarded whole when a leg or attached record failed",
        )?;
        registry.register(Box::new(transfer_rollbacks.clone()))?;

        Ok(Self {
            transactions_total,
            apply_duration,
            version_conflicts,
            replays,
            transfer_rollbacks,
            registry,
        })
    }

    /// Record a committed posting
    pub fn record_transaction(&self, tx_type: &str, duration_seconds: f64) {
        self.transactions_total.with_label_values(&[tx_type]).inc();
        self.apply_duration.observe(duration_seconds);
    }

    /// Record a version conflict
    pub fn record_version_conflict(&self) {
        self.version_conflicts.inc();
    }

    /// Record an idempotent replay
    pub fn record_replay(&self) {
        self.replays.inc();
    }

    /// Record a transfer rolled back before commit
    pub fn record_transfer_rollback(&self) {
        self.transfer_rollbacks.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("version_conflicts", &self.version_conflicts.get())
            .field("replays", &self.replays.get())
            .field("transfer_rollbacks", &self.transfer_rollbacks.get())
            .finish()
    }
}
