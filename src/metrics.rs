//! Reconciliation metrics
//!
//! Registered on a caller-owned `prometheus::Registry` so independent
//! contexts (tests, multiple controllers) never collide on metric names.

use crate::domain::ports::IntentKind;
use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Outcome label for a successful pass
pub const OUTCOME_SUCCESS: &str = "success";
/// Outcome label for a failed pass
pub const OUTCOME_ERROR: &str = "error";

/// Counters and histograms for reconcile passes
#[derive(Clone)]
pub struct ReconcileMetrics {
    reconciliations: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
}

impl ReconcileMetrics {
    /// Create the metrics and register them on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "unified_replication_reconciliations_total",
                "Reconcile passes by intent kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new(
                "unified_replication_failures_total",
                "Failed reconcile passes by intent kind and reason",
            ),
            &["kind", "reason"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "unified_replication_reconcile_duration_seconds",
                "Duration of reconcile passes",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            reconciliations,
            failures,
            duration,
        })
    }

    /// Record the result of one pass
    pub fn record<T>(&self, kind: IntentKind, result: &std::result::Result<T, Error>, elapsed: Duration) {
        let kind = kind.to_string();
        self.duration
            .with_label_values(&[&kind])
            .observe(elapsed.as_secs_f64());

        match result {
            Ok(_) => self
                .reconciliations
                .with_label_values(&[&kind, OUTCOME_SUCCESS])
                .inc(),
            Err(e) => {
                self.reconciliations
                    .with_label_values(&[&kind, OUTCOME_ERROR])
                    .inc();
                self.failures.with_label_values(&[&kind, e.reason()]).inc();
            }
        }
    }

    /// Current pass count for a kind and outcome
    pub fn reconciliations(&self, kind: IntentKind, outcome: &str) -> u64 {
        self.reconciliations
            .with_label_values(&[&kind.to_string(), outcome])
            .get()
    }

    /// Current failure count for a kind and reason
    pub fn failures(&self, kind: IntentKind, reason: &str) -> u64 {
        self.failures
            .with_label_values(&[&kind.to_string(), reason])
            .get()
    }
}
