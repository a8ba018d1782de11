//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Adoption and release of dependents by selector and owner identity."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use ordset_api::{
    parse_ordinal, pod_name, MetadataPatch, Pod, Preconditions, Resource, ResourceClient, Revision,
    StoreError, Workload,
};
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::events::{EventReason, EventRecorder, EventType};

/// Whether `pod` belongs to `workload` by selector and by ordinal name. The name must be
/// the canonical one for its ordinal, so `web-01` is not a member of `web`.
pub fn is_pod_member(workload: &Workload, pod: &Pod) -> bool {
    let parent = &workload.metadata.name;
    workload.spec.selector.matches(&pod.metadata.labels)
        && parse_ordinal(parent, &pod.metadata.name)
            .is_some_and(|ordinal| pod_name(parent, ordinal) == pod.metadata.name)
}

/// Whether `revision` belongs to `workload` by selector.
pub fn is_revision_member(workload: &Workload, revision: &Revision) -> bool {
    workload.spec.selector.matches(&revision.metadata.labels)
}

/// Lazily confirms, once per pass, that the workload still exists with the same uid and
/// is not being deleted before anything gets adopted. The cached copy may be stale.
pub struct AdoptionGate<'a> {
    client: &'a dyn ResourceClient<Workload>,
    workload: &'a Workload,
    verdict: Option<bool>,
}

impl<'a> AdoptionGate<'a> {
    /// Gate for `workload`, checked against `client` on first use.
    pub fn new(client: &'a dyn ResourceClient<Workload>, workload: &'a Workload) -> Self {
        Self {
            client,
            workload,
            verdict: None,
        }
    }

    async fn allows(&mut self) -> Result<bool, ReconcileError> {
        if let Some(verdict) = self.verdict {
            return Ok(verdict);
        }
        let meta = &self.workload.metadata;
        let allowed = match self.client.get(&meta.namespace, &meta.name).await {
            Ok(fresh) => fresh.metadata.uid == meta.uid && !fresh.metadata.is_terminating(),
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err.into()),
        };
        if !allowed {
            debug!(workload = %meta.key(), "workload gone or terminating; not adopting");
        }
        self.verdict = Some(allowed);
        Ok(allowed)
    }
}

/// Dependents a workload ended up owning after a claim pass.
#[derive(Debug, Clone)]
pub struct Claimed<R> {
    /// Owned dependents, adopted ones included.
    pub owned: Vec<R>,
    /// Orphans adopted this pass.
    pub adopted: usize,
    /// Dependents released this pass.
    pub released: usize,
}

/// Sort `candidates` into the set owned by `workload`.
///
/// Dependents controlled by another owner are skipped. Matching orphans are adopted and
/// owned dependents that stopped matching are released; both via patches preconditioned
/// on the dependent's uid, so losing a race to another writer only excludes the object.
pub async fn claim<R: Resource>(
    client: &dyn ResourceClient<R>,
    workload: &Workload,
    candidates: Vec<R>,
    is_member: &(dyn Fn(&R) -> bool + Send + Sync),
    gate: &mut AdoptionGate<'_>,
    recorder: &dyn EventRecorder,
) -> Result<Claimed<R>, ReconcileError> {
    let uid = workload.metadata.uid.as_str();
    let parent_terminating = workload.metadata.is_terminating();
    let mut claimed = Claimed {
        owned: Vec::with_capacity(candidates.len()),
        adopted: 0,
        released: 0,
    };

    for candidate in candidates {
        let owner_uid = candidate
            .metadata()
            .controller_ref()
            .map(|owner| owner.uid.clone());
        let namespace = candidate.metadata().namespace.clone();
        let name = candidate.metadata().name.clone();
        let preconditions = Preconditions::uid(candidate.metadata().uid.clone());

        match owner_uid.as_deref() {
            Some(owner) if owner != uid => continue,
            Some(_) => {
                if parent_terminating || is_member(&candidate) {
                    claimed.owned.push(candidate);
                    continue;
                }
                let patch = MetadataPatch::RemoveOwnerRef {
                    uid: uid.to_owned(),
                };
                match client.patch(&namespace, &name, patch, preconditions).await {
                    Ok(_) => {
                        info!(workload = %workload.key(), kind = R::KIND, dependent = %name, "released dependent no longer matching selector");
                        claimed.released += 1;
                    }
                    Err(err) if lost_race(&err) => {
                        debug!(workload = %workload.key(), kind = R::KIND, dependent = %name, "dependent changed before release");
                    }
                    Err(err) => {
                        recorder.record(
                            workload,
                            EventType::Warning,
                            EventReason::FailedAdoption,
                            format!("release {} {name} failed: {err}", R::KIND),
                        );
                        return Err(err.into());
                    }
                }
            }
            None => {
                if parent_terminating
                    || candidate.metadata().is_terminating()
                    || !is_member(&candidate)
                {
                    continue;
                }
                if !gate.allows().await? {
                    continue;
                }
                let patch = MetadataPatch::AddControllerRef(workload.controller_owner_ref());
                match client.patch(&namespace, &name, patch, preconditions).await {
                    Ok(adopted) => {
                        info!(workload = %workload.key(), kind = R::KIND, dependent = %name, "adopted orphan");
                        claimed.adopted += 1;
                        claimed.owned.push(adopted);
                    }
                    Err(err) if lost_race(&err) => {
                        debug!(workload = %workload.key(), kind = R::KIND, dependent = %name, error = %err, "lost adoption race");
                    }
                    Err(err) => {
                        recorder.record(
                            workload,
                            EventType::Warning,
                            EventReason::FailedAdoption,
                            format!("adopt {} {name} failed: {err}", R::KIND),
                        );
                        return Err(err.into());
                    }
                }
            }
        }
    }
    Ok(claimed)
}

fn lost_race(err: &StoreError) -> bool {
    err.is_not_found() || err.is_conflict()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use ordset_api::{
        InMemoryStore, LabelSelector, Lister, ObjectMeta, OwnerReference, PodTemplate, StoreOp,
        WorkloadSpec,
    };

    async fn workload(store: &InMemoryStore) -> Workload {
        let spec = WorkloadSpec {
            replicas: 2,
            selector: LabelSelector::from_labels([("app", "web")]),
            template: PodTemplate::default(),
            ..WorkloadSpec::default()
        };
        store
            .workloads()
            .create(Workload::new("ns", "web", spec))
            .await
            .unwrap()
    }

    async fn pod(store: &InMemoryStore, name: &str, app: &str, owner: Option<OwnerReference>) -> Pod {
        let mut meta = ObjectMeta::new("ns", name).with_labels([("app", app)]);
        meta.owner_references.extend(owner);
        store
            .pods()
            .create(Pod {
                metadata: meta,
                ..Pod::default()
            })
            .await
            .unwrap()
    }

    fn foreign_owner() -> OwnerReference {
        OwnerReference {
            kind: "OrdinalSet".into(),
            name: "other".into(),
            uid: "someone-else".into(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    async fn run_claim(store: &InMemoryStore, workload: &Workload) -> Claimed<Pod> {
        let workloads = store.workloads();
        let pods = store.pods();
        let candidates = pods.select("ns", None);
        let mut gate = AdoptionGate::new(workloads.as_ref(), workload);
        let log = EventLog::new();
        let member = |p: &Pod| is_pod_member(workload, p);
        claim(pods.as_ref(), workload, candidates, &member, &mut gate, &log)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn adopts_matching_orphans_and_skips_foreign_pods() {
        let store = InMemoryStore::new();
        let web = workload(&store).await;
        pod(&store, "web-0", "web", None).await;
        pod(&store, "web-1", "web", Some(foreign_owner())).await;
        pod(&store, "web-2", "db", None).await;
        pod(&store, "cache-0", "web", None).await;

        let claimed = run_claim(&store, &web).await;
        assert_eq!(claimed.adopted, 1);
        assert_eq!(claimed.owned.len(), 1);
        assert_eq!(claimed.owned[0].metadata.name, "web-0");

        let pods = store.pods();
        assert!(pods.lookup("ns", "web-0").unwrap().metadata.is_controlled_by(&web.metadata.uid));
        assert!(pods.lookup("ns", "web-1").unwrap().metadata.is_controlled_by("someone-else"));
        assert!(pods.lookup("ns", "web-2").unwrap().metadata.controller_ref().is_none());
        assert!(pods.lookup("ns", "cache-0").unwrap().metadata.controller_ref().is_none());
    }

    #[tokio::test]
    async fn non_canonical_ordinal_names_are_not_adopted() {
        let store = InMemoryStore::new();
        let web = workload(&store).await;
        pod(&store, "web-1", "web", None).await;
        pod(&store, "web-01", "web", None).await;
        pod(&store, "web-007", "web", None).await;

        let claimed = run_claim(&store, &web).await;
        assert_eq!(claimed.adopted, 1);
        assert_eq!(claimed.owned.len(), 1);
        assert_eq!(claimed.owned[0].metadata.name, "web-1");
        let pods = store.pods();
        assert!(pods.lookup("ns", "web-01").unwrap().metadata.controller_ref().is_none());
        assert!(pods.lookup("ns", "web-007").unwrap().metadata.controller_ref().is_none());
    }

    #[tokio::test]
    async fn releases_owned_pods_whose_labels_drifted() {
        let store = InMemoryStore::new();
        let web = workload(&store).await;
        pod(&store, "web-0", "db", Some(web.controller_owner_ref())).await;
        pod(&store, "web-1", "web", Some(web.controller_owner_ref())).await;

        let claimed = run_claim(&store, &web).await;
        assert_eq!(claimed.released, 1);
        assert_eq!(claimed.owned.len(), 1);
        let released = store.pods().lookup("ns", "web-0").unwrap();
        assert!(released.metadata.controller_ref().is_none());
    }

    #[tokio::test]
    async fn terminating_workload_adopts_nothing() {
        let store = InMemoryStore::new();
        let mut web = workload(&store).await;
        web.metadata.deletion_timestamp = Some(chrono::Utc::now());
        pod(&store, "web-0", "web", None).await;
        pod(&store, "web-1", "db", Some(web.controller_owner_ref())).await;

        let claimed = run_claim(&store, &web).await;
        assert_eq!(claimed.adopted, 0);
        assert_eq!(claimed.released, 0);
        assert_eq!(claimed.owned.len(), 1);
        assert_eq!(store.pods().call_count(StoreOp::Patch), 0);
    }

    #[tokio::test]
    async fn stale_cached_workload_does_not_adopt() {
        let store = InMemoryStore::new();
        let web = workload(&store).await;
        store
            .workloads()
            .delete("ns", "web", Preconditions::default())
            .await
            .unwrap();
        pod(&store, "web-0", "web", None).await;

        let claimed = run_claim(&store, &web).await;
        assert_eq!(claimed.adopted, 0);
        assert!(claimed.owned.is_empty());
        assert_eq!(store.pods().call_count(StoreOp::Patch), 0);
    }

    #[tokio::test]
    async fn lost_adoption_race_is_silent() {
        let store = InMemoryStore::new();
        let web = workload(&store).await;
        pod(&store, "web-0", "web", None).await;
        store.pods().inject_failure(
            StoreOp::Patch,
            StoreError::Conflict {
                kind: "Pod",
                key: "ns/web-0".into(),
                reason: "already controlled by OrdinalSet other".into(),
            },
        );
        let claimed = run_claim(&store, &web).await;
        assert_eq!(claimed.adopted, 0);
        assert!(claimed.owned.is_empty());
    }

    #[tokio::test]
    async fn transient_adoption_failure_is_reported() {
        let store = InMemoryStore::new();
        let web = workload(&store).await;
        pod(&store, "web-0", "web", None).await;
        store
            .pods()
            .inject_failure(StoreOp::Patch, StoreError::Transient("timeout".into()));

        let workloads = store.workloads();
        let pods = store.pods();
        let mut gate = AdoptionGate::new(workloads.as_ref(), &web);
        let log = EventLog::new();
        let member = |p: &Pod| is_pod_member(&web, p);
        let err = claim(pods.as_ref(), &web, pods.select("ns", None), &member, &mut gate, &log)
            .await
            .unwrap_err();
        assert!(err.is_requeueable());
        assert_eq!(log.with_reason(EventReason::FailedAdoption).len(), 1);
    }
}
