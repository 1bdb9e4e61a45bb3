//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! [`Metrics`] owns its registry. One instance is built at startup and handed
//! to every controller and to the HTTP server; nothing is registered
//! globally.
//!
//! ## Metrics Exposed
//!
//! - `serverless_operator_reconciliations_total{controller}` - Total number of reconciliations
//! - `serverless_operator_reconciliation_errors_total{controller}` - Total number of reconciliation errors
//! - `serverless_operator_reconciliation_duration_seconds{controller}` - Duration of reconciliations
//! - `serverless_operator_resources_applied_total` - Resources created or updated
//! - `serverless_operator_resources_deleted_total` - Resources deleted
//! - `serverless_operator_requeues_total{reason}` - Requeues by reason
//! - `knative_up{type}` - 1 when the parent of that type is ready, 0 otherwise

use crate::applier::ApplyReport;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;
use tracing::debug;

/// Metrics handles plus the registry they are registered with
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconciliation_errors: IntCounterVec,
    reconciliation_duration: HistogramVec,
    resources_applied: IntCounter,
    resources_deleted: IntCounter,
    requeues: IntCounterVec,
    knative_up: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "serverless_operator_reconciliations_total",
                "Total number of reconciliations",
            ),
            &["controller"],
        )?;
        let reconciliation_errors = IntCounterVec::new(
            Opts::new(
                "serverless_operator_reconciliation_errors_total",
                "Total number of reconciliation errors",
            ),
            &["controller"],
        )?;
        let reconciliation_duration = HistogramVec::new(
            HistogramOpts::new(
                "serverless_operator_reconciliation_duration_seconds",
                "Duration of reconciliation in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["controller"],
        )?;
        let resources_applied = IntCounter::new(
            "serverless_operator_resources_applied_total",
            "Total number of resources created or updated",
        )?;
        let resources_deleted = IntCounter::new(
            "serverless_operator_resources_deleted_total",
            "Total number of resources deleted",
        )?;
        let requeues = IntCounterVec::new(
            Opts::new(
                "serverless_operator_requeues_total",
                "Total number of requeues by reason",
            ),
            &["reason"],
        )?;
        let knative_up = GaugeVec::new(
            Opts::new(
                "knative_up",
                "Reports if a Knative component is up: 1 when ready, 0 otherwise",
            ),
            &["type"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconciliation_errors.clone()))?;
        registry.register(Box::new(reconciliation_duration.clone()))?;
        registry.register(Box::new(resources_applied.clone()))?;
        registry.register(Box::new(resources_deleted.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(knative_up.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconciliation_errors,
            reconciliation_duration,
            resources_applied,
            resources_deleted,
            requeues,
            knative_up,
        })
    }

    pub fn increment_reconciliations(&self, controller: &str) {
        self.reconciliations.with_label_values(&[controller]).inc();
    }

    pub fn increment_reconciliation_errors(&self, controller: &str) {
        self.reconciliation_errors
            .with_label_values(&[controller])
            .inc();
    }

    pub fn observe_reconciliation_duration(&self, controller: &str, elapsed: Duration) {
        self.reconciliation_duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    /// Count what an apply or delete pass wrote
    pub fn record_apply(&self, report: &ApplyReport) {
        self.resources_applied.inc_by(report.changed() as u64);
        self.resources_deleted.inc_by(report.deleted as u64);
    }

    pub fn increment_requeues_total(&self, reason: &str) {
        self.requeues.with_label_values(&[reason]).inc();
    }

    /// Set `knative_up{type}` from the parent's readiness
    pub fn set_up(&self, up_type: &str, ready: bool) {
        self.knative_up
            .with_label_values(&[up_type])
            .set(if ready { 1.0 } else { 0.0 });
    }

    /// Drop the `knative_up{type}` series of a deleted parent
    pub fn remove_up(&self, up_type: &str) {
        if let Err(e) = self.knative_up.remove_label_values(&[up_type]) {
            debug!(up_type, error = %e, "knative_up series was not present");
        }
    }

    /// Value of `knative_up{type}`, if the series exists
    pub fn up(&self, up_type: &str) -> Option<f64> {
        let text = String::from_utf8(self.encode().ok()?).ok()?;
        let series = format!("knative_up{{type=\"{up_type}\"}} ");
        text.lines()
            .find_map(|line| line.strip_prefix(&series))
            .and_then(|value| value.trim().parse().ok())
    }

    /// Current values in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
