//! ---
//! ordset_section: "03-observability"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Prometheus instrumentation for reconciliation passes."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use ordset_metrics::SharedRegistry;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

/// Metrics published by the controller runtime.
#[derive(Clone)]
pub struct ControllerMetrics {
    syncs_total: IntCounterVec,
    sync_duration: HistogramVec,
    actions_total: IntCounterVec,
    active_workers: IntGauge,
}

impl ControllerMetrics {
    /// Register controller metrics with the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let syncs_total = IntCounterVec::new(
            Opts::new(
                "ordset_reconcile_passes_total",
                "Reconciliation passes by outcome",
            ),
            &["result"],
        )?;
        registry.register(Box::new(syncs_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "ordset_reconcile_duration_seconds",
            "Wall time of one reconciliation pass",
        )
        .buckets(prometheus::exponential_buckets(0.0005, 2.0, 14)?);
        let sync_duration = HistogramVec::new(histogram_opts, &["result"])?;
        registry.register(Box::new(sync_duration.clone()))?;

        let actions_total = IntCounterVec::new(
            Opts::new(
                "ordset_reconcile_actions_total",
                "Pod actions issued by the reconciler",
            ),
            &["action"],
        )?;
        registry.register(Box::new(actions_total.clone()))?;

        let active_workers = IntGauge::new(
            "ordset_reconcile_active_workers",
            "Worker loops currently running",
        )?;
        registry.register(Box::new(active_workers.clone()))?;

        Ok(Self {
            syncs_total,
            sync_duration,
            actions_total,
            active_workers,
        })
    }

    /// Count one pass ending with `result` after `elapsed`.
    pub fn observe_sync(&self, result: &str, elapsed: Duration) {
        self.syncs_total.with_label_values(&[result]).inc();
        self.sync_duration
            .with_label_values(&[result])
            .observe(elapsed.as_secs_f64());
    }

    /// Count one issued pod action.
    pub fn record_action(&self, action: &str) {
        self.actions_total.with_label_values(&[action]).inc();
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.inc();
    }

    pub(crate) fn worker_stopped(&self) {
        self.active_workers.dec();
    }

    /// Passes recorded with `result` so far.
    pub fn sync_count(&self, result: &str) -> u64 {
        self.syncs_total.with_label_values(&[result]).get()
    }

    /// Actions of `action` kind recorded so far.
    pub fn action_count(&self, action: &str) -> u64 {
        self.actions_total.with_label_values(&[action]).get()
    }
}

impl std::fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordset_metrics::new_registry;

    #[test]
    fn registers_and_counts() {
        let registry = new_registry();
        let metrics = ControllerMetrics::new(registry.clone()).unwrap();
        metrics.observe_sync("success", Duration::from_millis(3));
        metrics.record_action("create");
        metrics.record_action("create");
        assert_eq!(metrics.sync_count("success"), 1);
        assert_eq!(metrics.action_count("create"), 2);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"ordset_reconcile_passes_total".to_owned()));
        assert!(ControllerMetrics::new(registry).is_err());
    }
}
