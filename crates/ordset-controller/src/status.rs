//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Aggregate workload status derivation and conflict-safe persistence."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::sync::Arc;

use ordset_api::{Pod, Resource, ResourceClient, Workload, WorkloadStatus};
use tracing::debug;

use crate::error::ReconcileError;
use crate::history::RevisionSet;
use crate::retry::{retry_on_conflict, RetryPolicy};

/// Status implied by the observed pods and resolved revisions.
///
/// Once every desired pod runs the update revision and is ready, the current revision
/// advances to the update revision.
pub fn compute_status(workload: &Workload, pods: &[Pod], revisions: &RevisionSet) -> WorkloadStatus {
    let current = revisions.current.metadata.name.as_str();
    let update = revisions.update.metadata.name.as_str();
    let mut status = WorkloadStatus {
        observed_generation: workload.metadata.generation,
        current_revision: current.to_owned(),
        update_revision: update.to_owned(),
        collision_count: revisions.collision_count,
        ..WorkloadStatus::default()
    };

    for pod in pods {
        status.replicas += 1;
        if pod.is_running_and_ready() {
            status.ready_replicas += 1;
        }
        if pod.is_terminating() {
            continue;
        }
        if pod.revision() == Some(current) {
            status.current_replicas += 1;
        }
        if pod.revision() == Some(update) {
            status.updated_replicas += 1;
        }
    }

    let rollout_complete = status.replicas == workload.spec.replicas
        && status.updated_replicas == status.replicas
        && status.ready_replicas == status.replicas;
    if rollout_complete && current != update {
        status.current_revision = update.to_owned();
        status.current_replicas = status.updated_replicas;
    }
    status
}

/// Writes workload status through the status sub-resource.
#[derive(Clone)]
pub struct StatusWriter {
    client: Arc<dyn ResourceClient<Workload>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StatusWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusWriter")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StatusWriter {
    /// Writer using `client`.
    pub fn new(client: Arc<dyn ResourceClient<Workload>>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Persist `status` unless the stored object already carries it. Returns whether a
    /// write happened.
    ///
    /// On a version conflict the latest workload is refetched and the same status is
    /// applied to it again.
    pub async fn persist(&self, workload: &Workload, status: &WorkloadStatus) -> Result<bool, ReconcileError> {
        if workload.status == *status {
            return Ok(false);
        }
        let namespace = workload.metadata.namespace.clone();
        let name = workload.metadata.name.clone();
        let written = retry_on_conflict(&self.retry, &workload.key(), |attempt| {
            let client = self.client.clone();
            let cached = workload.clone();
            let status = status.clone();
            let namespace = namespace.clone();
            let name = name.clone();
            async move {
                let mut latest = if attempt == 1 {
                    cached
                } else {
                    client.get(&namespace, &name).await?
                };
                if latest.status == status {
                    return Ok(false);
                }
                latest.status = status;
                client.update_status(latest).await.map(|_| true)
            }
        })
        .await?;
        if written {
            debug!(
                workload = %workload.key(),
                replicas = status.replicas,
                ready = status.ready_replicas,
                current = status.current_replicas,
                updated = status.updated_replicas,
                "status updated"
            );
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordset_api::{
        InMemoryStore, LabelSelector, ObjectMeta, Revision, StoreError, StoreOp, WorkloadSpec,
        REVISION_LABEL,
    };
    use std::time::Duration;

    fn revision(name: &str, number: i64) -> Revision {
        Revision {
            metadata: ObjectMeta::new("ns", name),
            data: Default::default(),
            revision: number,
        }
    }

    fn set(current: &str, update: &str) -> RevisionSet {
        RevisionSet {
            current: revision(current, 1),
            update: revision(update, 2),
            collision_count: 1,
            history: vec![revision(current, 1), revision(update, 2)],
        }
    }

    fn pod(revision: &str, ready: bool, terminating: bool) -> Pod {
        let mut pod = Pod::default();
        pod.metadata
            .labels
            .insert(REVISION_LABEL.to_owned(), revision.to_owned());
        if ready {
            pod.set_running(true);
        }
        if terminating {
            pod.metadata.deletion_timestamp = Some(chrono::Utc::now());
        }
        pod
    }

    fn workload(replicas: u32) -> Workload {
        let mut web = Workload::new(
            "ns",
            "web",
            WorkloadSpec {
                replicas,
                selector: LabelSelector::from_labels([("app", "web")]),
                ..WorkloadSpec::default()
            },
        );
        web.metadata.generation = 4;
        web
    }

    #[test]
    fn counts_pods_by_readiness_and_revision() {
        let pods = [
            pod("old", true, false),
            pod("old", false, false),
            pod("new", true, false),
            pod("new", true, true),
        ];
        let status = compute_status(&workload(3), &pods, &set("old", "new"));
        assert_eq!(status.observed_generation, 4);
        assert_eq!(status.replicas, 4);
        assert_eq!(status.ready_replicas, 3);
        assert_eq!(status.current_replicas, 2);
        assert_eq!(status.updated_replicas, 1);
        assert_eq!(status.current_revision, "old");
        assert_eq!(status.update_revision, "new");
        assert_eq!(status.collision_count, 1);
    }

    #[test]
    fn completed_rollout_advances_current_revision() {
        let pods = [pod("new", true, false), pod("new", true, false)];
        let status = compute_status(&workload(2), &pods, &set("old", "new"));
        assert_eq!(status.current_revision, "new");
        assert_eq!(status.current_replicas, 2);

        let partial = [pod("new", true, false)];
        let status = compute_status(&workload(2), &partial, &set("old", "new"));
        assert_eq!(status.current_revision, "old");
    }

    async fn stored(store: &InMemoryStore) -> Workload {
        store
            .workloads()
            .create(workload(1))
            .await
            .unwrap()
    }

    fn writer(store: &InMemoryStore) -> StatusWriter {
        StatusWriter::new(
            store.workloads(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let store = InMemoryStore::new();
        let web = stored(&store).await;
        let written = writer(&store).persist(&web, &web.status.clone()).await.unwrap();
        assert!(!written);
        assert_eq!(store.workloads().call_count(StoreOp::UpdateStatus), 0);
    }

    #[tokio::test]
    async fn conflict_refetches_and_reapplies() {
        let store = InMemoryStore::new();
        let web = stored(&store).await;
        let mut bumped = web.clone();
        bumped.metadata.labels.insert("touched".into(), "yes".into());
        store.workloads().update(bumped).await.unwrap();

        let status = WorkloadStatus {
            replicas: 1,
            ..WorkloadStatus::default()
        };
        let written = writer(&store).persist(&web, &status).await.unwrap();
        assert!(written);
        assert_eq!(store.workloads().call_count(StoreOp::UpdateStatus), 2);
        let latest = store.workloads().get("ns", "web").await.unwrap();
        assert_eq!(latest.status.replicas, 1);
        assert_eq!(latest.metadata.labels.get("touched").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn persistent_conflicts_surface_as_requeueable() {
        let store = InMemoryStore::new();
        let web = stored(&store).await;
        for _ in 0..3 {
            store.workloads().inject_failure(
                StoreOp::UpdateStatus,
                StoreError::Conflict {
                    kind: "OrdinalSet",
                    key: "ns/web".into(),
                    reason: "stale".into(),
                },
            );
        }
        let status = WorkloadStatus {
            replicas: 1,
            ..WorkloadStatus::default()
        };
        let err = writer(&store).persist(&web, &status).await.unwrap_err();
        assert!(matches!(err, ReconcileError::ConflictRetriesExhausted { .. }));
        assert!(err.is_requeueable());
    }
}
