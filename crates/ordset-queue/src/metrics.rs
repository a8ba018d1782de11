//! ---
//! ordset_section: "04-work-dispatch"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Prometheus instrumentation for work queues."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use anyhow::Result;
use ordset_metrics::SharedRegistry;
use prometheus::{IntCounterVec, IntGaugeVec, Opts};

/// Metrics shared by every queue registered against one registry, labelled by queue name.
#[derive(Clone)]
pub struct QueueMetrics {
    depth: IntGaugeVec,
    adds_total: IntCounterVec,
    retries_total: IntCounterVec,
}

impl QueueMetrics {
    /// Register the queue metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let depth = IntGaugeVec::new(
            Opts::new("ordset_workqueue_depth", "Keys waiting to be processed"),
            &["queue"],
        )?;
        registry.register(Box::new(depth.clone()))?;

        let adds_total = IntCounterVec::new(
            Opts::new(
                "ordset_workqueue_adds_total",
                "Keys accepted into the queue, excluding deduplicated adds",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(adds_total.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new(
                "ordset_workqueue_retries_total",
                "Rate-limited re-additions after a failed pass",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        Ok(Self {
            depth,
            adds_total,
            retries_total,
        })
    }

    pub(crate) fn set_depth(&self, queue: &str, depth: usize) {
        self.depth
            .with_label_values(&[queue])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub(crate) fn inc_adds(&self, queue: &str) {
        self.adds_total.with_label_values(&[queue]).inc();
    }

    pub(crate) fn inc_retries(&self, queue: &str) {
        self.retries_total.with_label_values(&[queue]).inc();
    }
}

impl std::fmt::Debug for QueueMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMetrics").finish_non_exhaustive()
    }
}
