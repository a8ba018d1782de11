//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Controller runtime wiring informers, queue, workers and resync."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ordset_api::{
    Bucket, Cache, InMemoryStore, Informer, ListWatch, Lister, Pod, Resource, ResourceClient,
    Revision, Workload,
};
use ordset_common::ControllerConfig;
use ordset_metrics::SharedRegistry;
use ordset_queue::{QueueMetrics, WorkQueue};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::events::{EventRecorder, TracingRecorder};
use crate::handlers::{DependentHandler, WorkloadHandler};
use crate::metrics::ControllerMetrics;
use crate::reconciler::{Clients, Listers, Reconciler};
use crate::retry::RetryPolicy;

const QUEUE_NAME: &str = "ordinalsets";

/// Write and watch access to one kind.
pub struct KindApi<R: Resource> {
    pub client: Arc<dyn ResourceClient<R>>,
    pub source: Arc<dyn ListWatch<R>>,
}

impl<R: Resource> KindApi<R> {
    /// Both halves served by one bucket.
    pub fn from_bucket(bucket: Arc<Bucket<R>>) -> Self {
        Self {
            client: bucket.clone(),
            source: bucket,
        }
    }
}

impl<R: Resource> Clone for KindApi<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            source: self.source.clone(),
        }
    }
}

/// Everything a controller instance needs. No state is shared between instances beyond
/// what is passed in here.
#[derive(Clone)]
pub struct ControllerContext {
    pub workloads: KindApi<Workload>,
    pub pods: KindApi<Pod>,
    pub revisions: KindApi<Revision>,
    pub config: ControllerConfig,
    pub recorder: Arc<dyn EventRecorder>,
    pub registry: Option<SharedRegistry>,
}

impl fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerContext")
            .field("config", &self.config)
            .field("metrics", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

impl ControllerContext {
    /// Context reading and writing `store`, logging events through `tracing`.
    pub fn in_memory(store: &InMemoryStore, config: ControllerConfig) -> Self {
        Self {
            workloads: KindApi::from_bucket(store.workloads()),
            pods: KindApi::from_bucket(store.pods()),
            revisions: KindApi::from_bucket(store.revisions()),
            config,
            recorder: Arc::new(TracingRecorder),
            registry: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// A configured but not yet running controller.
pub struct Controller {
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    workload_informer: Arc<Informer<Workload>>,
    pod_informer: Arc<Informer<Pod>>,
    revision_informer: Arc<Informer<Revision>>,
    reconciler: Arc<Reconciler>,
    metrics: Option<ControllerMetrics>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Wire informers, handlers, queue and reconciler. Nothing runs until [`start`].
    ///
    /// [`start`]: Controller::start
    pub fn new(context: ControllerContext) -> Result<Self> {
        context
            .config
            .validate()
            .context("invalid controller configuration")?;
        let (queue_metrics, metrics) = match &context.registry {
            Some(registry) => (
                Some(QueueMetrics::new(registry.clone())?),
                Some(ControllerMetrics::new(registry.clone())?),
            ),
            None => (None, None),
        };
        let queue = WorkQueue::from_config(QUEUE_NAME, &context.config.queue, queue_metrics);

        let workload_informer = Informer::new(context.workloads.source.clone());
        let pod_informer = Informer::new(context.pods.source.clone());
        let revision_informer = Informer::new(context.revisions.source.clone());
        let workload_lister: Arc<dyn Lister<Workload>> = workload_informer.lister();

        workload_informer.add_event_handler(Arc::new(WorkloadHandler::new(queue.clone())));
        pod_informer.add_event_handler(Arc::new(DependentHandler::<Pod>::new(
            queue.clone(),
            workload_lister.clone(),
        )));
        revision_informer.add_event_handler(Arc::new(DependentHandler::<Revision>::new(
            queue.clone(),
            workload_lister.clone(),
        )));

        let clients = Clients {
            workloads: context.workloads.client.clone(),
            pods: context.pods.client.clone(),
            revisions: context.revisions.client.clone(),
        };
        let listers = Listers {
            workloads: workload_lister,
            pods: pod_informer.lister(),
            revisions: revision_informer.lister(),
        };
        let retry = RetryPolicy::from(&context.config.conflict_retry);
        let mut reconciler = Reconciler::new(clients, listers, context.recorder.clone(), retry);
        if let Some(metrics) = &metrics {
            reconciler = reconciler.with_metrics(metrics.clone());
        }

        Ok(Self {
            config: context.config,
            queue,
            workload_informer,
            pod_informer,
            revision_informer,
            reconciler: Arc::new(reconciler),
            metrics,
        })
    }

    /// Queue feeding the workers.
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Start informers, wait for their caches, then start workers and the resync loop.
    pub async fn start(self) -> Result<ControllerHandle, ReconcileError> {
        let (shutdown_tx, _) = broadcast::channel(16);
        let mut tasks = vec![
            self.workload_informer.spawn(shutdown_tx.subscribe()),
            self.pod_informer.spawn(shutdown_tx.subscribe()),
            self.revision_informer.spawn(shutdown_tx.subscribe()),
        ];

        let timeout = self.config.cache_sync_timeout;
        let (workloads, pods, revisions) = tokio::join!(
            self.workload_informer.wait_for_sync(timeout),
            self.pod_informer.wait_for_sync(timeout),
            self.revision_informer.wait_for_sync(timeout),
        );
        let unsynced: Vec<&'static str> = [
            (workloads, Workload::KIND),
            (pods, Pod::KIND),
            (revisions, Revision::KIND),
        ]
        .into_iter()
        .filter_map(|(synced, kind)| (!synced).then_some(kind))
        .collect();
        if !unsynced.is_empty() {
            self.queue.shut_down();
            let _ = shutdown_tx.send(());
            futures::future::join_all(tasks).await;
            return Err(ReconcileError::CacheNotSynced {
                kinds: unsynced,
                timeout,
            });
        }

        for worker in 0..self.config.workers {
            tasks.push(tokio::spawn(run_worker(
                worker,
                self.queue.clone(),
                self.reconciler.clone(),
                self.metrics.clone(),
            )));
        }
        tasks.push(tokio::spawn(run_resync(
            self.queue.clone(),
            self.workload_informer.lister(),
            self.config.resync_period,
            shutdown_tx.subscribe(),
        )));

        info!(
            workers = self.config.workers,
            resync_period_ms = self.config.resync_period.as_millis() as u64,
            "controller started"
        );
        Ok(ControllerHandle {
            shutdown: shutdown_tx,
            queue: self.queue,
            workloads: self.workload_informer.lister(),
            pods: self.pod_informer.lister(),
            tasks,
        })
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    metrics: Option<ControllerMetrics>,
) {
    if let Some(metrics) = &metrics {
        metrics.worker_started();
    }
    while let Some(key) = queue.get().await {
        let started = Instant::now();
        let result = reconciler.sync(&key).await;
        let label = match &result {
            Ok(_) => {
                queue.forget(&key);
                "success"
            }
            Err(err) if err.is_requeueable() => {
                warn!(
                    worker,
                    workload = %key,
                    error = %err,
                    kind = err.kind(),
                    requeues = queue.num_requeues(&key),
                    "pass failed; requeueing with backoff"
                );
                queue.add_rate_limited(key.clone());
                "requeued"
            }
            Err(err) => {
                warn!(worker, workload = %key, error = %err, kind = err.kind(), "pass failed; waiting for resync");
                queue.forget(&key);
                "dropped"
            }
        };
        queue.done(&key);
        if let Some(metrics) = &metrics {
            metrics.observe_sync(label, started.elapsed());
        }
    }
    if let Some(metrics) = &metrics {
        metrics.worker_stopped();
    }
    debug!(worker, "worker exiting");
}

async fn run_resync(
    queue: Arc<WorkQueue>,
    workloads: Arc<Cache<Workload>>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let keys: Vec<String> = workloads.list_all().iter().map(Resource::key).collect();
                debug!(workloads = keys.len(), "periodic resync");
                for key in keys {
                    queue.add(key);
                }
            }
        }
    }
}

/// Running controller.
pub struct ControllerHandle {
    shutdown: broadcast::Sender<()>,
    queue: Arc<WorkQueue>,
    workloads: Arc<Cache<Workload>>,
    pods: Arc<Cache<Pod>>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("queue", &self.queue)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl ControllerHandle {
    /// Queue feeding the workers.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Cached view of workloads.
    pub fn workloads(&self) -> Arc<Cache<Workload>> {
        self.workloads.clone()
    }

    /// Cached view of pods.
    pub fn pods(&self) -> Arc<Cache<Pod>> {
        self.pods.clone()
    }

    /// Close the queue, stop informers and the resync loop, and wait for in-flight passes.
    pub async fn shutdown(self) -> Result<()> {
        self.queue.shut_down();
        let _ = self.shutdown.send(());
        for joined in futures::future::join_all(self.tasks).await {
            joined.context("controller task panicked")?;
        }
        info!("controller shutdown complete");
        Ok(())
    }
}
