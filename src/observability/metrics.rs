//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `mailserver_reconciliations_total` - Total number of reconcile passes
//! - `mailserver_reconciliation_errors_total` - Failed passes by error kind
//! - `mailserver_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `mailserver_requeues_total` - Requeues by reason
//! - `mailserver_objects_applied_total` - Dependent objects created or patched, by kind
//! - `mailserver_objects_deleted_total` - Dependent objects deleted, by kind
//! - `mailserver_extractions_total` - Commands run in the workload, by outcome

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "mailserver_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mailserver_reconciliation_errors_total",
            "Total number of reconciliation errors by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "mailserver_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mailserver_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mailserver_objects_applied_total",
            "Total number of dependent objects created or patched by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

static OBJECTS_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mailserver_objects_deleted_total",
            "Total number of dependent objects deleted by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create OBJECTS_DELETED_TOTAL metric - this should never happen")
});

static EXTRACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mailserver_extractions_total",
            "Total number of workload extraction attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create EXTRACTIONS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXTRACTIONS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_objects_applied(kind: &str) {
    OBJECTS_APPLIED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_objects_deleted(kind: &str) {
    OBJECTS_DELETED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_extractions(outcome: &str) {
    EXTRACTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters_are_independent() {
        let before = OBJECTS_APPLIED_TOTAL.with_label_values(&["Secret"]).get();
        increment_objects_applied("Secret");
        increment_objects_applied("Service");
        assert_eq!(
            OBJECTS_APPLIED_TOTAL.with_label_values(&["Secret"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_requeue_reasons() {
        let before = REQUEUES_TOTAL.with_label_values(&["resync"]).get();
        increment_requeues_total("resync");
        increment_requeues_total("resync");
        assert_eq!(REQUEUES_TOTAL.with_label_values(&["resync"]).get(), before + 2);
    }
}
