//! # Re-encryption Metrics
//!
//! Metrics for one run: item outcomes, failure reasons, writes, conflicts,
//! transport retries and timings.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Gauge, Histogram, IntCounter, IntCounterVec};
use std::sync::LazyLock;

static ITEMS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sealed_secret_rekeyer_items_total",
            "Total number of SealedSecrets reconciled, by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create ITEMS_TOTAL metric - this should never happen")
});

static ITEM_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sealed_secret_rekeyer_item_failures_total",
            "Total number of failed SealedSecrets, by failure reason",
        ),
        &["reason"],
    )
    .expect("Failed to create ITEM_FAILURES_TOTAL metric - this should never happen")
});

static WRITE_ATTEMPTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sealed_secret_rekeyer_write_attempts_total",
        "Total number of conditional writes sent to the API server",
    )
    .expect("Failed to create WRITE_ATTEMPTS_TOTAL metric - this should never happen")
});

static VERSION_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sealed_secret_rekeyer_version_conflicts_total",
        "Total number of conditional writes rejected with a version conflict",
    )
    .expect("Failed to create VERSION_CONFLICTS_TOTAL metric - this should never happen")
});

static TRANSPORT_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sealed_secret_rekeyer_transport_retries_total",
            "Total number of cluster API calls retried after a transient failure, by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create TRANSPORT_RETRIES_TOTAL metric - this should never happen")
});

static ITEM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "sealed_secret_rekeyer_item_duration_seconds",
            "Duration of reconciling one SealedSecret in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create ITEM_DURATION metric - this should never happen")
});

static RUN_DURATION: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "sealed_secret_rekeyer_run_duration_seconds",
        "Wall-clock duration of the last run in seconds",
    )
    .expect("Failed to create RUN_DURATION metric - this should never happen")
});

/// Register re-encryption metrics with the registry
pub(crate) fn register_rekey_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ITEMS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ITEM_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WRITE_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VERSION_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRANSPORT_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ITEM_DURATION.clone()))?;
    REGISTRY.register(Box::new(RUN_DURATION.clone()))?;
    Ok(())
}

pub fn increment_items_total(outcome: &str) {
    ITEMS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_item_failures_total(reason: &str) {
    ITEM_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_write_attempts_total() {
    WRITE_ATTEMPTS_TOTAL.inc();
}

pub fn increment_version_conflicts_total() {
    VERSION_CONFLICTS_TOTAL.inc();
}

pub fn increment_transport_retries_total(operation: &str) {
    TRANSPORT_RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn observe_item_duration(duration: f64) {
    ITEM_DURATION.observe(duration);
}

pub fn set_run_duration(duration: f64) {
    RUN_DURATION.set(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_items_total() {
        let before = ITEMS_TOTAL.with_label_values(&["updated"]).get();
        increment_items_total("updated");
        let after = ITEMS_TOTAL.with_label_values(&["updated"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_item_failures_total() {
        let before = ITEM_FAILURES_TOTAL
            .with_label_values(&["conflict-exhausted"])
            .get();
        increment_item_failures_total("conflict-exhausted");
        let after = ITEM_FAILURES_TOTAL
            .with_label_values(&["conflict-exhausted"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_write_attempts_total() {
        let before = WRITE_ATTEMPTS_TOTAL.get();
        increment_write_attempts_total();
        assert!(WRITE_ATTEMPTS_TOTAL.get() > before);
    }

    #[test]
    fn test_increment_transport_retries_total() {
        let before = TRANSPORT_RETRIES_TOTAL.with_label_values(&["list"]).get();
        increment_transport_retries_total("list");
        let after = TRANSPORT_RETRIES_TOTAL.with_label_values(&["list"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_item_duration() {
        observe_item_duration(0.2);
        // Just verify it doesn't panic
    }
}
