//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Content-hashed revision history: resolution, creation and truncation."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ordset_api::{
    ObjectMeta, Pod, PodTemplate, Preconditions, Resource, ResourceClient, Revision, Workload,
    REVISION_HASH_LABEL,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::retry::{retry_on_conflict, RetryPolicy};

/// Hex characters of the digest kept in revision names.
pub const HASH_LENGTH: usize = 10;

/// Collision salts tried before a pass gives up.
pub const MAX_COLLISION_ATTEMPTS: u32 = 16;

/// Deterministic hash of `template`, salted by `collision_count` when non-zero.
pub fn compute_hash(template: &PodTemplate, collision_count: u32) -> Result<String, ReconcileError> {
    let payload = serde_json::to_vec(template)?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    if collision_count > 0 {
        hasher.update(collision_count.to_le_bytes());
    }
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(HASH_LENGTH);
    Ok(encoded)
}

/// Name of the revision of `workload` with content hash `hash`.
pub fn revision_name(workload: &str, hash: &str) -> String {
    format!("{workload}-{hash}")
}

/// Unsaved revision capturing the workload's present template.
pub fn build_revision(
    workload: &Workload,
    number: i64,
    collision_count: u32,
) -> Result<Revision, ReconcileError> {
    let template = &workload.spec.template;
    let hash = compute_hash(template, collision_count)?;
    let mut labels = template.labels.clone();
    labels.insert(REVISION_HASH_LABEL.to_owned(), hash.clone());
    let mut metadata = ObjectMeta::new(
        workload.metadata.namespace.clone(),
        revision_name(&workload.metadata.name, &hash),
    );
    metadata.labels = labels;
    metadata.owner_references.push(workload.controller_owner_ref());
    Ok(Revision {
        metadata,
        data: template.clone(),
        revision: number,
    })
}

/// Sequence number following the newest entry in `history`.
pub fn next_revision_number(history: &[Revision]) -> i64 {
    history.iter().map(|r| r.revision).max().unwrap_or(0) + 1
}

fn sort_history(history: &mut [Revision]) {
    history.sort_by(|a, b| {
        a.revision
            .cmp(&b.revision)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
}

/// Revisions a pass works against.
#[derive(Debug, Clone)]
pub struct RevisionSet {
    /// Revision stable pods run.
    pub current: Revision,
    /// Revision of the present template.
    pub update: Revision,
    /// Collision salt after resolution; persisted into status.
    pub collision_count: u32,
    /// Every owned revision, oldest first.
    pub history: Vec<Revision>,
}

impl RevisionSet {
    /// Template stored under revision `name`.
    pub fn template_for(&self, name: &str) -> Option<&PodTemplate> {
        [&self.update, &self.current]
            .into_iter()
            .chain(self.history.iter())
            .find(|r| r.metadata.name == name)
            .map(|r| &r.data)
    }
}

/// Creates, reuses and garbage-collects revisions for workloads.
#[derive(Clone)]
pub struct HistoryManager {
    client: Arc<dyn ResourceClient<Revision>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HistoryManager {
    /// Manager writing through `client`.
    pub fn new(client: Arc<dyn ResourceClient<Revision>>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Work out the current and update revisions, creating or rolling back to a revision
    /// for the present template as needed.
    pub async fn resolve(
        &self,
        workload: &Workload,
        owned: Vec<Revision>,
        pods: &[Pod],
    ) -> Result<RevisionSet, ReconcileError> {
        let mut history = owned;
        sort_history(&mut history);
        let mut collision_count = workload.status.collision_count;
        let update = self
            .find_or_create(workload, &mut history, &mut collision_count)
            .await?;

        let current = select_current(workload, &history, pods).unwrap_or_else(|| update.clone());
        Ok(RevisionSet {
            current,
            update,
            collision_count,
            history,
        })
    }

    /// Revision matching the live template. An older identical entry is renumbered to
    /// the head of `history`; otherwise a new entry is created, salting its name with
    /// `collision_count` until a free one is found. `history` is kept sorted.
    pub async fn find_or_create(
        &self,
        workload: &Workload,
        history: &mut Vec<Revision>,
        collision_count: &mut u32,
    ) -> Result<Revision, ReconcileError> {
        let next_number = next_revision_number(history);
        let template = &workload.spec.template;
        let found = match history.iter().rposition(|r| r.data == *template) {
            Some(idx) if idx + 1 == history.len() => history[idx].clone(),
            Some(idx) => {
                let bumped = self.bump_revision(&history[idx], next_number).await?;
                info!(workload = %workload.key(), revision = %bumped.metadata.name, number = next_number, "rolled back to earlier revision");
                history[idx] = bumped.clone();
                bumped
            }
            None => {
                let created = self
                    .create_revision(workload, next_number, collision_count)
                    .await?;
                history.push(created.clone());
                created
            }
        };
        sort_history(history);
        Ok(found)
    }

    async fn bump_revision(&self, revision: &Revision, number: i64) -> Result<Revision, ReconcileError> {
        let namespace = revision.metadata.namespace.clone();
        let name = revision.metadata.name.clone();
        retry_on_conflict(&self.retry, &revision.key(), |attempt| {
            let client = self.client.clone();
            let cached = revision.clone();
            let namespace = namespace.clone();
            let name = name.clone();
            async move {
                let mut latest = if attempt == 1 {
                    cached
                } else {
                    client.get(&namespace, &name).await?
                };
                if latest.revision == number {
                    return Ok(latest);
                }
                latest.revision = number;
                client.update(latest).await
            }
        })
        .await
    }

    async fn create_revision(
        &self,
        workload: &Workload,
        number: i64,
        collision_count: &mut u32,
    ) -> Result<Revision, ReconcileError> {
        for _ in 0..MAX_COLLISION_ATTEMPTS {
            let candidate = build_revision(workload, number, *collision_count)?;
            let name = candidate.metadata.name.clone();
            match self.client.create(candidate).await {
                Ok(created) => {
                    info!(workload = %workload.key(), revision = %name, number, "created revision");
                    return Ok(created);
                }
                Err(err) if err.is_already_exists() => {
                    let existing = self
                        .client
                        .get(&workload.metadata.namespace, &name)
                        .await?;
                    if existing.data == workload.spec.template
                        && existing.metadata.is_controlled_by(&workload.metadata.uid)
                    {
                        return Ok(existing);
                    }
                    *collision_count = collision_count.saturating_add(1);
                    warn!(workload = %workload.key(), revision = %name, collision_count = *collision_count, "revision name taken by different content");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ReconcileError::CollisionLimit {
            workload: workload.key(),
            attempts: MAX_COLLISION_ATTEMPTS,
        })
    }

    /// Delete the oldest revisions not referenced by `set` or any pod until at most
    /// `revision_history_limit` of them remain. Returns how many were deleted.
    pub async fn truncate(
        &self,
        workload: &Workload,
        set: &RevisionSet,
        pods: &[Pod],
    ) -> Result<usize, ReconcileError> {
        let mut live: HashSet<&str> = HashSet::new();
        live.insert(set.current.metadata.name.as_str());
        live.insert(set.update.metadata.name.as_str());
        live.extend(pods.iter().filter_map(Pod::revision));

        let stale: Vec<&Revision> = set
            .history
            .iter()
            .filter(|r| !live.contains(r.metadata.name.as_str()))
            .collect();
        let limit = workload.spec.revision_history_limit as usize;
        if stale.len() <= limit {
            return Ok(0);
        }
        let excess = stale.len() - limit;

        let mut deleted = 0;
        for revision in stale.into_iter().take(excess) {
            let meta = &revision.metadata;
            match self
                .client
                .delete(&meta.namespace, &meta.name, Preconditions::uid(meta.uid.clone()))
                .await
            {
                Ok(()) => {
                    debug!(workload = %workload.key(), revision = %meta.name, "deleted old revision");
                    deleted += 1;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(deleted)
    }
}

/// The recorded current revision while it still exists, otherwise the revision most live
/// pods carry.
fn select_current(workload: &Workload, history: &[Revision], pods: &[Pod]) -> Option<Revision> {
    let recorded = workload.status.current_revision.as_str();
    if !recorded.is_empty() {
        if let Some(found) = history.iter().find(|r| r.metadata.name == recorded) {
            return Some(found.clone());
        }
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for pod in pods.iter().filter(|p| !p.is_terminating()) {
        if let Some(revision) = pod.revision() {
            *counts.entry(revision).or_insert(0) += 1;
        }
    }
    history
        .iter()
        .filter_map(|r| counts.get(r.metadata.name.as_str()).map(|n| (*n, r)))
        .max_by(|(a, ra), (b, rb)| a.cmp(b).then(ra.revision.cmp(&rb.revision)))
        .map(|(_, r)| r.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordset_api::{
        Container, InMemoryStore, LabelSelector, Lister, REVISION_LABEL, WorkloadSpec,
    };
    use std::time::Duration;

    fn template(image: &str) -> PodTemplate {
        PodTemplate {
            labels: [("app".to_owned(), "web".to_owned())].into_iter().collect(),
            spec: ordset_api::PodSpec {
                containers: vec![Container {
                    name: "app".into(),
                    image: image.into(),
                    ..Container::default()
                }],
                ..Default::default()
            },
            ..PodTemplate::default()
        }
    }

    async fn workload(store: &InMemoryStore, image: &str, limit: u32) -> Workload {
        let spec = WorkloadSpec {
            replicas: 1,
            selector: LabelSelector::from_labels([("app", "web")]),
            template: template(image),
            revision_history_limit: limit,
            ..WorkloadSpec::default()
        };
        store
            .workloads()
            .create(Workload::new("ns", "web", spec))
            .await
            .unwrap()
    }

    fn manager(store: &InMemoryStore) -> HistoryManager {
        HistoryManager::new(
            store.revisions(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::ZERO),
        )
    }

    fn pod_on(revision: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata
            .labels
            .insert(REVISION_LABEL.to_owned(), revision.to_owned());
        pod
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = template("nginx:1.25");
        assert_eq!(compute_hash(&a, 0).unwrap(), compute_hash(&a.clone(), 0).unwrap());
        assert_eq!(compute_hash(&a, 0).unwrap().len(), HASH_LENGTH);

        let mut labelled = a.clone();
        labelled.labels.insert("tier".into(), "front".into());
        let mut annotated = a.clone();
        annotated.annotations.insert("note".into(), "x".into());
        let mut env = a.clone();
        env.spec.containers[0].env.insert("MODE".into(), "fast".into());
        let mut grace = a.clone();
        grace.spec.termination_grace_period_seconds = Some(5);

        let base = compute_hash(&a, 0).unwrap();
        for changed in [&labelled, &annotated, &env, &grace, &template("nginx:1.26")] {
            assert_ne!(compute_hash(changed, 0).unwrap(), base);
        }
        assert_ne!(compute_hash(&a, 1).unwrap(), base);
        assert_ne!(compute_hash(&a, 1).unwrap(), compute_hash(&a, 2).unwrap());
    }

    #[tokio::test]
    async fn first_resolve_creates_revision_one() {
        let store = InMemoryStore::new();
        let web = workload(&store, "nginx:1.25", 10).await;
        let set = manager(&store).resolve(&web, Vec::new(), &[]).await.unwrap();
        assert_eq!(set.update.revision, 1);
        assert_eq!(set.current.metadata.name, set.update.metadata.name);
        assert_eq!(set.collision_count, 0);
        assert_eq!(
            set.update.metadata.name,
            format!("web-{}", compute_hash(&web.spec.template, 0).unwrap())
        );
        assert!(set.update.metadata.is_controlled_by(&web.metadata.uid));
        assert_eq!(store.revisions().list_all().len(), 1);

        let again = manager(&store)
            .resolve(&web, store.revisions().list_all(), &[])
            .await
            .unwrap();
        assert_eq!(again.update.metadata.name, set.update.metadata.name);
        assert_eq!(store.revisions().list_all().len(), 1);
    }

    #[tokio::test]
    async fn template_change_keeps_recorded_current() {
        let store = InMemoryStore::new();
        let mut web = workload(&store, "nginx:1.25", 10).await;
        let first = manager(&store).resolve(&web, Vec::new(), &[]).await.unwrap();
        web.status.current_revision = first.update.metadata.name.clone();

        web.spec.template = template("nginx:1.26");
        let second = manager(&store)
            .resolve(&web, store.revisions().list_all(), &[])
            .await
            .unwrap();
        assert_eq!(second.update.revision, 2);
        assert_eq!(second.current.metadata.name, first.update.metadata.name);
        assert_eq!(second.history.len(), 2);
    }

    #[tokio::test]
    async fn current_falls_back_to_majority_of_pods() {
        let store = InMemoryStore::new();
        let mut web = workload(&store, "nginx:1.25", 10).await;
        let first = manager(&store).resolve(&web, Vec::new(), &[]).await.unwrap();
        web.spec.template = template("nginx:1.26");
        let old = first.update.metadata.name.clone();
        let pods = vec![pod_on(&old), pod_on(&old), pod_on("web-unknown")];
        let set = manager(&store)
            .resolve(&web, store.revisions().list_all(), &pods)
            .await
            .unwrap();
        assert_eq!(set.current.metadata.name, old);
        assert_ne!(set.update.metadata.name, old);
    }

    #[tokio::test]
    async fn reverting_template_bumps_old_revision() {
        let store = InMemoryStore::new();
        let mut web = workload(&store, "nginx:1.25", 10).await;
        let first = manager(&store).resolve(&web, Vec::new(), &[]).await.unwrap();
        web.spec.template = template("nginx:1.26");
        manager(&store)
            .resolve(&web, store.revisions().list_all(), &[])
            .await
            .unwrap();

        web.spec.template = template("nginx:1.25");
        let reverted = manager(&store)
            .resolve(&web, store.revisions().list_all(), &[])
            .await
            .unwrap();
        assert_eq!(reverted.update.metadata.name, first.update.metadata.name);
        assert_eq!(reverted.update.revision, 3);
        assert_eq!(store.revisions().list_all().len(), 2);
    }

    #[tokio::test]
    async fn collision_salts_name_without_overwriting() {
        let store = InMemoryStore::new();
        let web = workload(&store, "nginx:1.25", 10).await;
        let squatter_name = revision_name("web", &compute_hash(&web.spec.template, 0).unwrap());
        let squatter = store
            .revisions()
            .create(Revision {
                metadata: ObjectMeta::new("ns", squatter_name.clone()),
                data: template("busybox"),
                revision: 7,
            })
            .await
            .unwrap();

        let set = manager(&store).resolve(&web, Vec::new(), &[]).await.unwrap();
        assert_eq!(set.collision_count, 1);
        assert_ne!(set.update.metadata.name, squatter_name);
        assert_eq!(
            set.update.metadata.name,
            revision_name("web", &compute_hash(&web.spec.template, 1).unwrap())
        );
        let untouched = store.revisions().lookup("ns", &squatter_name).unwrap();
        assert_eq!(untouched, squatter);
    }

    #[tokio::test]
    async fn truncate_keeps_live_revisions() {
        let store = InMemoryStore::new();
        let mut web = workload(&store, "img:0", 1).await;
        for i in 1..=4 {
            web.spec.template = template(&format!("img:{i}"));
            manager(&store)
                .resolve(&web, store.revisions().list_all(), &[])
                .await
                .unwrap();
        }
        let mut history = store.revisions().list_all();
        sort_history(&mut history);
        assert_eq!(history.len(), 4);
        let oldest = history[0].metadata.name.clone();
        let pinned_by_pod = history[1].metadata.name.clone();

        web.status.current_revision = oldest.clone();
        let set = manager(&store)
            .resolve(&web, store.revisions().list_all(), &[])
            .await
            .unwrap();
        assert_eq!(set.current.metadata.name, oldest);

        let pods = vec![pod_on(&pinned_by_pod)];
        let deleted = manager(&store).truncate(&web, &set, &pods).await.unwrap();
        assert_eq!(deleted, 0, "only one non-live revision remains, within the limit");

        let deleted = manager(&store).truncate(&web, &set, &[]).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining: Vec<String> = store
            .revisions()
            .list_all()
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert!(remaining.contains(&oldest));
        assert!(remaining.contains(&set.update.metadata.name));
        assert!(!remaining.contains(&pinned_by_pod));
    }
}
