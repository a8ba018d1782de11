//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Per-key reconciliation pass: ownership, revisions, planning, execution, status."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ordset_api::{
    pod_name, split_key, InMemoryStore, Lister, MetadataPatch, ObjectMeta, Pod, PodTemplate,
    Preconditions, Resource, ResourceClient, Revision, Workload, POD_NAME_LABEL,
    REVISION_LABEL,
};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::events::{EventReason, EventRecorder, EventType};
use crate::history::{HistoryManager, RevisionSet};
use crate::metrics::ControllerMetrics;
use crate::ownership::{claim, is_pod_member, is_revision_member, AdoptionGate};
use crate::planner::{plan, Action, PlanInput, Wait};
use crate::retry::RetryPolicy;
use crate::status::{compute_status, StatusWriter};

/// Store clients the reconciler writes through.
#[derive(Clone)]
pub struct Clients {
    pub workloads: Arc<dyn ResourceClient<Workload>>,
    pub pods: Arc<dyn ResourceClient<Pod>>,
    pub revisions: Arc<dyn ResourceClient<Revision>>,
}

impl Clients {
    /// Clients backed by the buckets of `store`.
    pub fn from_store(store: &InMemoryStore) -> Self {
        Self {
            workloads: store.workloads(),
            pods: store.pods(),
            revisions: store.revisions(),
        }
    }
}

/// Snapshot readers the reconciler plans from.
#[derive(Clone)]
pub struct Listers {
    pub workloads: Arc<dyn Lister<Workload>>,
    pub pods: Arc<dyn Lister<Pod>>,
    pub revisions: Arc<dyn Lister<Revision>>,
}

impl Listers {
    /// Strongly consistent listers reading `store` directly.
    pub fn from_store(store: &InMemoryStore) -> Self {
        Self {
            workloads: store.workloads(),
            pods: store.pods(),
            revisions: store.revisions(),
        }
    }
}

/// What one completed pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Kinds of the actions executed, in order.
    pub actions: Vec<&'static str>,
    /// Why the pass stopped short of convergence, if it did.
    pub waiting: Option<Wait>,
    /// Orphans adopted, pods and revisions together.
    pub adopted: usize,
    /// Dependents released.
    pub released: usize,
    /// Whether status was written.
    pub status_written: bool,
    /// Old revisions deleted.
    pub revisions_pruned: usize,
    /// Revision of the present template.
    pub update_revision: String,
}

/// Result of [`Reconciler::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The workload no longer exists.
    Missing,
    /// The workload is being deleted or selects nothing; nothing changed.
    Skipped,
    /// A full pass ran.
    Synced(PassReport),
}

impl SyncOutcome {
    /// Report of a full pass.
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            SyncOutcome::Synced(report) => Some(report),
            _ => None,
        }
    }
}

/// Drives one workload toward its spec per call.
pub struct Reconciler {
    clients: Clients,
    listers: Listers,
    history: HistoryManager,
    status: StatusWriter,
    recorder: Arc<dyn EventRecorder>,
    metrics: Option<ControllerMetrics>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("history", &self.history)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        clients: Clients,
        listers: Listers,
        recorder: Arc<dyn EventRecorder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            history: HistoryManager::new(clients.revisions.clone(), retry),
            status: StatusWriter::new(clients.workloads.clone(), retry),
            clients,
            listers,
            recorder,
            metrics: None,
        }
    }

    /// Count executed actions in `metrics`.
    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one pass for the workload at `key` (`namespace/name`).
    pub async fn sync(&self, key: &str) -> Result<SyncOutcome, ReconcileError> {
        let (namespace, name) =
            split_key(key).map_err(|_| ReconcileError::InvalidKey(key.to_owned()))?;
        let Some(workload) = self.listers.workloads.lookup(&namespace, &name) else {
            debug!(workload = %key, "workload gone");
            return Ok(SyncOutcome::Missing);
        };
        if workload.metadata.is_terminating() {
            debug!(workload = %key, "workload terminating; leaving dependents to collection");
            return Ok(SyncOutcome::Skipped);
        }
        if workload.spec.selector.is_empty() {
            warn!(workload = %key, "empty selector selects nothing; skipping");
            return Ok(SyncOutcome::Skipped);
        }

        let mut gate = AdoptionGate::new(self.clients.workloads.as_ref(), &workload);
        let pods = claim(
            self.clients.pods.as_ref(),
            &workload,
            self.listers.pods.select(&namespace, None),
            &|pod: &Pod| is_pod_member(&workload, pod),
            &mut gate,
            self.recorder.as_ref(),
        )
        .await?;
        let revisions = claim(
            self.clients.revisions.as_ref(),
            &workload,
            self.listers.revisions.select(&namespace, None),
            &|revision: &Revision| is_revision_member(&workload, revision),
            &mut gate,
            self.recorder.as_ref(),
        )
        .await?;
        let adopted = pods.adopted + revisions.adopted;
        let released = pods.released + revisions.released;
        let pods = pods.owned;

        let revision_set = self
            .history
            .resolve(&workload, revisions.owned, &pods)
            .await?;
        let plan = plan(&PlanInput {
            workload: &workload,
            pods: &pods,
            current_revision: &revision_set.current.metadata.name,
            update_revision: &revision_set.update.metadata.name,
        });
        if let Some(Wait::InvariantViolation(detail)) = &plan.waiting {
            self.recorder.record(
                &workload,
                EventType::Warning,
                EventReason::InvariantViolation,
                detail.clone(),
            );
            return Err(ReconcileError::InvariantViolation {
                workload: key.to_owned(),
                detail: detail.clone(),
            });
        }

        let mut executed = Vec::with_capacity(plan.actions.len());
        let mut failure = None;
        for action in &plan.actions {
            match self.execute(&workload, &revision_set, action).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_action(action.kind());
                    }
                    executed.push(action.kind());
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let status = compute_status(&workload, &pods, &revision_set);
        let persisted = self.status.persist(&workload, &status).await;
        if let Some(err) = failure {
            if let Err(status_err) = persisted {
                warn!(workload = %key, error = %status_err, "status not persisted after failed action");
            }
            return Err(err);
        }
        let status_written = persisted?;
        let revisions_pruned = self.history.truncate(&workload, &revision_set, &pods).await?;

        if !executed.is_empty() {
            info!(workload = %key, actions = ?executed, waiting = ?plan.waiting, "pass executed actions");
        } else {
            debug!(workload = %key, waiting = ?plan.waiting, "pass made no pod changes");
        }
        Ok(SyncOutcome::Synced(PassReport {
            actions: executed,
            waiting: plan.waiting,
            adopted,
            released,
            status_written,
            revisions_pruned,
            update_revision: revision_set.update.metadata.name,
        }))
    }

    async fn execute(
        &self,
        workload: &Workload,
        revisions: &RevisionSet,
        action: &Action,
    ) -> Result<(), ReconcileError> {
        match action {
            Action::Create { ordinal, revision } => {
                self.create_pod(workload, revisions, *ordinal, revision).await
            }
            Action::Delete { pod, uid, reason, .. } => {
                debug!(workload = %workload.key(), pod = %pod, reason = %reason, "deleting pod");
                self.delete_pod(workload, pod, uid).await
            }
            Action::Recreate {
                ordinal,
                pod,
                uid,
                revision,
            } => {
                self.recorder.record(
                    workload,
                    EventType::Warning,
                    EventReason::RecreatingFailedPod,
                    format!("pod {pod} failed; recreating"),
                );
                self.delete_pod(workload, pod, uid).await?;
                match self
                    .clients
                    .pods
                    .get(&workload.metadata.namespace, pod)
                    .await
                {
                    Err(err) if err.is_not_found() => {
                        self.create_pod(workload, revisions, *ordinal, revision)
                            .await
                    }
                    // Still terminating; the next pass creates the replacement.
                    Ok(_) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Action::RestoreIdentity { pod, uid, .. } => {
                let labels = BTreeMap::from([(POD_NAME_LABEL.to_owned(), pod.clone())]);
                match self
                    .clients
                    .pods
                    .patch(
                        &workload.metadata.namespace,
                        pod,
                        MetadataPatch::MergeLabels(labels),
                        Preconditions::uid(uid.clone()),
                    )
                    .await
                {
                    Ok(_) => {
                        info!(workload = %workload.key(), pod = %pod, "restored pod identity label");
                        Ok(())
                    }
                    Err(err) if err.is_not_found() => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    async fn create_pod(
        &self,
        workload: &Workload,
        revisions: &RevisionSet,
        ordinal: u32,
        revision: &str,
    ) -> Result<(), ReconcileError> {
        let template = revisions
            .template_for(revision)
            .ok_or_else(|| ReconcileError::InvariantViolation {
                workload: workload.key(),
                detail: format!("revision {revision} missing from history"),
            })?;
        let pod = new_pod(workload, ordinal, revision, template);
        let name = pod.metadata.name.clone();
        match self.clients.pods.create(pod).await {
            Ok(_) => {
                self.recorder.record(
                    workload,
                    EventType::Normal,
                    EventReason::SuccessfulCreate,
                    format!("create pod {name} in {} successful", workload.metadata.name),
                );
                Ok(())
            }
            Err(err) if err.is_already_exists() => Err(ReconcileError::StaleCache {
                key: workload.key(),
                detail: format!("pod {name} already exists"),
            }),
            Err(err) => {
                self.recorder.record(
                    workload,
                    EventType::Warning,
                    EventReason::FailedCreate,
                    format!("create pod {name} in {} failed: {err}", workload.metadata.name),
                );
                Err(err.into())
            }
        }
    }

    async fn delete_pod(&self, workload: &Workload, pod: &str, uid: &str) -> Result<(), ReconcileError> {
        let result = self
            .clients
            .pods
            .delete(
                &workload.metadata.namespace,
                pod,
                Preconditions::uid(uid.to_owned()),
            )
            .await;
        match result {
            Ok(()) => {
                self.recorder.record(
                    workload,
                    EventType::Normal,
                    EventReason::SuccessfulDelete,
                    format!("delete pod {pod} in {} successful", workload.metadata.name),
                );
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => {
                self.recorder.record(
                    workload,
                    EventType::Warning,
                    EventReason::FailedDelete,
                    format!("delete pod {pod} in {} failed: {err}", workload.metadata.name),
                );
                Err(err.into())
            }
        }
    }
}

/// Pod for `ordinal` stamped from `template` and labelled with `revision`.
pub fn new_pod(workload: &Workload, ordinal: u32, revision: &str, template: &PodTemplate) -> Pod {
    let name = pod_name(&workload.metadata.name, ordinal);
    let mut metadata = ObjectMeta::new(workload.metadata.namespace.clone(), name.clone());
    metadata.labels = template.labels.clone();
    metadata.labels.insert(POD_NAME_LABEL.to_owned(), name);
    metadata
        .labels
        .insert(REVISION_LABEL.to_owned(), revision.to_owned());
    metadata.annotations = template.annotations.clone();
    metadata.owner_references.push(workload.controller_owner_ref());
    Pod {
        metadata,
        spec: template.spec.clone(),
        status: Default::default(),
    }
}
