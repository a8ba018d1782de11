//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "In-memory object store with watch streams and fault injection."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use strum::{AsRefStr, Display};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::client::{Lister, MetadataPatch, Preconditions, ResourceClient};
use crate::error::StoreError;
use crate::informer::ListWatch;
use crate::meta::object_key;
use crate::pod::Pod;
use crate::resource::Resource;
use crate::revision::Revision;
use crate::selector::LabelSelector;
use crate::workload::Workload;

const WATCH_CAPACITY: usize = 1024;

/// Client operations, used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum StoreOp {
    /// `get`
    Get,
    /// `list`
    List,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `update_status`
    UpdateStatus,
    /// `delete`
    Delete,
    /// `patch`
    Patch,
}

impl StoreOp {
    /// Whether the operation writes to the store.
    pub fn is_mutation(self) -> bool {
        !matches!(self, StoreOp::Get | StoreOp::List)
    }
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    /// Object was created.
    Added(R),
    /// Object was changed.
    Modified(R),
    /// Object was removed. Carries the final state.
    Deleted(R),
}

impl<R> WatchEvent<R> {
    /// Object the event refers to.
    pub fn object(&self) -> &R {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

struct BucketState<R> {
    objects: BTreeMap<String, R>,
    failures: VecDeque<(StoreOp, StoreError)>,
    calls: HashMap<StoreOp, u64>,
}

/// Storage for one object kind. Resource versions come from a clock shared with the
/// other buckets of the same [`InMemoryStore`].
pub struct Bucket<R: Resource> {
    clock: Arc<AtomicU64>,
    state: Mutex<BucketState<R>>,
    events: broadcast::Sender<WatchEvent<R>>,
    graceful_deletion: AtomicBool,
}

impl<R: Resource> fmt::Debug for Bucket<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Bucket")
            .field("kind", &R::KIND)
            .field("objects", &state.objects.len())
            .field("pending_failures", &state.failures.len())
            .field(
                "graceful_deletion",
                &self.graceful_deletion.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl<R: Resource> Bucket<R> {
    /// Empty bucket drawing resource versions from `clock`.
    pub fn new(clock: Arc<AtomicU64>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            clock,
            state: Mutex::new(BucketState {
                objects: BTreeMap::new(),
                failures: VecDeque::new(),
                calls: HashMap::new(),
            }),
            events,
            graceful_deletion: AtomicBool::new(false),
        }
    }

    /// When enabled, `delete` only sets the deletion timestamp and the object stays
    /// visible until [`Bucket::purge`] removes it.
    pub fn set_graceful_deletion(&self, enabled: bool) {
        self.graceful_deletion.store(enabled, Ordering::Relaxed);
    }

    /// Fail the next call of `op` with `error`.
    pub fn inject_failure(&self, op: StoreOp, error: StoreError) {
        self.state.lock().failures.push_back((op, error));
    }

    /// Number of client calls of `op` so far, including failed ones.
    pub fn call_count(&self, op: StoreOp) -> u64 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of mutating client calls so far.
    pub fn mutation_count(&self) -> u64 {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutation())
            .map(|(_, count)| *count)
            .sum()
    }

    /// Reset call accounting.
    pub fn reset_call_counts(&self) {
        self.state.lock().calls.clear();
    }

    /// Subscribe to changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }

    /// Remove an object unconditionally, completing a graceful deletion.
    pub fn purge(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = object_key(namespace, name);
        let mut state = self.state.lock();
        let mut gone = state
            .objects
            .remove(&key)
            .ok_or_else(|| StoreError::not_found(R::KIND, &key))?;
        gone.metadata_mut().resource_version = self.next_version();
        trace!(kind = R::KIND, key = %key, "purged");
        self.emit(WatchEvent::Deleted(gone));
        Ok(())
    }

    fn next_version(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: WatchEvent<R>) {
        // No receivers is fine; watchers come and go.
        let _ = self.events.send(event);
    }

    fn record(state: &mut BucketState<R>, op: StoreOp) -> Result<(), StoreError> {
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, error)) = state.failures.remove(pos) {
                return Err(error);
            }
        }
        Ok(())
    }

    fn check_version(stored: &R, requested: u64) -> Result<(), StoreError> {
        let current = stored.metadata().resource_version;
        if requested != 0 && requested != current {
            return Err(StoreError::conflict(
                R::KIND,
                stored.key(),
                format!("resource version {requested} is stale, current is {current}"),
            ));
        }
        Ok(())
    }

    fn check_preconditions(stored: &R, preconditions: &Preconditions) -> Result<(), StoreError> {
        let meta = stored.metadata();
        if let Some(uid) = &preconditions.uid {
            if *uid != meta.uid {
                return Err(StoreError::conflict(
                    R::KIND,
                    meta.key(),
                    format!("uid precondition failed: expected {uid}, found {}", meta.uid),
                ));
            }
        }
        if let Some(version) = preconditions.resource_version {
            Self::check_version(stored, version)?;
        }
        Ok(())
    }

    fn stored(state: &BucketState<R>, key: &str) -> Result<R, StoreError> {
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(R::KIND, key))
    }

    fn commit(&self, state: &mut BucketState<R>, mut next: R) -> R {
        next.metadata_mut().resource_version = self.next_version();
        state.objects.insert(next.key(), next.clone());
        self.emit(WatchEvent::Modified(next.clone()));
        next
    }

    fn do_get(&self, namespace: &str, name: &str) -> Result<R, StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::Get)?;
        Self::stored(&state, &object_key(namespace, name))
    }

    fn do_list(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<R>, StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::List)?;
        Ok(filter_objects(state.objects.values(), namespace, selector))
    }

    fn do_create(&self, mut object: R) -> Result<R, StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::Create)?;
        let key = object.key();
        if object.metadata().name.is_empty() {
            return Err(StoreError::invalid(R::KIND, key, "name is required"));
        }
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: R::KIND, key });
        }
        let version = self.next_version();
        let meta = object.metadata_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = version;
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;
        state.objects.insert(key.clone(), object.clone());
        trace!(kind = R::KIND, key = %key, version, "created");
        self.emit(WatchEvent::Added(object.clone()));
        Ok(object)
    }

    fn do_update(&self, object: R) -> Result<R, StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::Update)?;
        let key = object.key();
        let stored = Self::stored(&state, &key)?;
        Self::check_version(&stored, object.metadata().resource_version)?;
        if !object.metadata().uid.is_empty() && object.metadata().uid != stored.metadata().uid {
            return Err(StoreError::conflict(R::KIND, key, "uid does not match"));
        }
        object
            .validate_update(&stored)
            .map_err(|reason| StoreError::invalid(R::KIND, &key, reason))?;

        let mut next = object;
        next.copy_status_from(&stored);
        {
            let prev = stored.metadata();
            let meta = next.metadata_mut();
            meta.uid = prev.uid.clone();
            meta.creation_timestamp = prev.creation_timestamp;
            meta.deletion_timestamp = prev.deletion_timestamp;
            meta.resource_version = prev.resource_version;
            meta.generation = prev.generation;
        }
        if next.spec_differs(&stored) {
            next.metadata_mut().generation += 1;
        }
        if next == stored {
            return Ok(stored);
        }
        Ok(self.commit(&mut state, next))
    }

    fn do_update_status(&self, object: R) -> Result<R, StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::UpdateStatus)?;
        let stored = Self::stored(&state, &object.key())?;
        Self::check_version(&stored, object.metadata().resource_version)?;
        let mut next = stored.clone();
        next.copy_status_from(&object);
        if next == stored {
            return Ok(stored);
        }
        Ok(self.commit(&mut state, next))
    }

    fn do_delete(
        &self,
        namespace: &str,
        name: &str,
        preconditions: &Preconditions,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::Delete)?;
        let key = object_key(namespace, name);
        let stored = Self::stored(&state, &key)?;
        Self::check_preconditions(&stored, preconditions)?;
        if self.graceful_deletion.load(Ordering::Relaxed) {
            if stored.metadata().is_terminating() {
                return Ok(());
            }
            let mut next = stored;
            next.metadata_mut().deletion_timestamp = Some(Utc::now());
            self.commit(&mut state, next);
            trace!(kind = R::KIND, key = %key, "graceful deletion started");
            return Ok(());
        }
        state.objects.remove(&key);
        let mut gone = stored;
        gone.metadata_mut().resource_version = self.next_version();
        trace!(kind = R::KIND, key = %key, "deleted");
        self.emit(WatchEvent::Deleted(gone));
        Ok(())
    }

    fn do_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: MetadataPatch,
        preconditions: &Preconditions,
    ) -> Result<R, StoreError> {
        let mut state = self.state.lock();
        Self::record(&mut state, StoreOp::Patch)?;
        let key = object_key(namespace, name);
        let stored = Self::stored(&state, &key)?;
        Self::check_preconditions(&stored, preconditions)?;

        let mut next = stored.clone();
        match patch {
            MetadataPatch::AddControllerRef(owner) => {
                if let Some(existing) = next.metadata().controller_ref() {
                    if existing.uid == owner.uid {
                        return Ok(stored);
                    }
                    return Err(StoreError::conflict(
                        R::KIND,
                        key,
                        format!("already controlled by {} {}", existing.kind, existing.name),
                    ));
                }
                let refs = &mut next.metadata_mut().owner_references;
                refs.retain(|r| r.uid != owner.uid);
                refs.push(owner);
            }
            MetadataPatch::RemoveOwnerRef { uid } => {
                next.metadata_mut()
                    .owner_references
                    .retain(|r| r.uid != uid);
            }
            MetadataPatch::MergeLabels(labels) => {
                next.metadata_mut().labels.extend(labels);
            }
        }
        if next == stored {
            return Ok(stored);
        }
        Ok(self.commit(&mut state, next))
    }
}

fn filter_objects<'a, R: Resource>(
    objects: impl Iterator<Item = &'a R>,
    namespace: &str,
    selector: Option<&LabelSelector>,
) -> Vec<R> {
    objects
        .filter(|obj| namespace.is_empty() || obj.metadata().namespace == namespace)
        .filter(|obj| {
            selector
                .map(|s| s.matches(&obj.metadata().labels))
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

#[async_trait]
impl<R: Resource> ResourceClient<R> for Bucket<R> {
    async fn get(&self, namespace: &str, name: &str) -> Result<R, StoreError> {
        self.do_get(namespace, name)
    }

    async fn list(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<R>, StoreError> {
        self.do_list(namespace, selector)
    }

    async fn create(&self, object: R) -> Result<R, StoreError> {
        self.do_create(object)
    }

    async fn update(&self, object: R) -> Result<R, StoreError> {
        self.do_update(object)
    }

    async fn update_status(&self, object: R) -> Result<R, StoreError> {
        self.do_update_status(object)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        preconditions: Preconditions,
    ) -> Result<(), StoreError> {
        self.do_delete(namespace, name, &preconditions)
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: MetadataPatch,
        preconditions: Preconditions,
    ) -> Result<R, StoreError> {
        self.do_patch(namespace, name, patch, &preconditions)
    }
}

impl<R: Resource> Lister<R> for Bucket<R> {
    fn lookup(&self, namespace: &str, name: &str) -> Option<R> {
        self.state
            .lock()
            .objects
            .get(&object_key(namespace, name))
            .cloned()
    }

    fn select(&self, namespace: &str, selector: Option<&LabelSelector>) -> Vec<R> {
        filter_objects(self.state.lock().objects.values(), namespace, selector)
    }

    fn list_all(&self) -> Vec<R> {
        self.state.lock().objects.values().cloned().collect()
    }
}

impl<R: Resource> ListWatch<R> for Bucket<R> {
    fn list_and_watch(&self) -> (Vec<R>, broadcast::Receiver<WatchEvent<R>>) {
        // Events are sent under the state lock, so the snapshot and the
        // subscription line up exactly.
        let state = self.state.lock();
        let receiver = self.events.subscribe();
        (state.objects.values().cloned().collect(), receiver)
    }
}

/// In-memory store holding workloads, pods and revisions.
#[derive(Clone)]
pub struct InMemoryStore {
    clock: Arc<AtomicU64>,
    workloads: Arc<Bucket<Workload>>,
    pods: Arc<Bucket<Pod>>,
    revisions: Arc<Bucket<Revision>>,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("resource_version", &self.resource_version())
            .field("workloads", &self.workloads)
            .field("pods", &self.pods)
            .field("revisions", &self.revisions)
            .finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        let clock = Arc::new(AtomicU64::new(0));
        Self {
            workloads: Arc::new(Bucket::new(clock.clone())),
            pods: Arc::new(Bucket::new(clock.clone())),
            revisions: Arc::new(Bucket::new(clock.clone())),
            clock,
        }
    }

    /// Workload bucket.
    pub fn workloads(&self) -> Arc<Bucket<Workload>> {
        self.workloads.clone()
    }

    /// Pod bucket.
    pub fn pods(&self) -> Arc<Bucket<Pod>> {
        self.pods.clone()
    }

    /// Revision bucket.
    pub fn revisions(&self) -> Arc<Bucket<Revision>> {
        self.revisions.clone()
    }

    /// Latest resource version handed out.
    pub fn resource_version(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Mutating client calls across all buckets.
    pub fn mutation_count(&self) -> u64 {
        self.workloads.mutation_count() + self.pods.mutation_count() + self.revisions.mutation_count()
    }

    /// Reset call accounting on all buckets.
    pub fn reset_call_counts(&self) {
        self.workloads.reset_call_counts();
        self.pods.reset_call_counts();
        self.revisions.reset_call_counts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ObjectMeta, OwnerReference};
    use crate::workload::WorkloadSpec;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta::new("ns", name).with_labels([("app", "web")]),
            ..Pod::default()
        }
    }

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            kind: "OrdinalSet".into(),
            name: "web".into(),
            uid: uid.into(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        let created = pods.create(pod("web-0")).await.unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.resource_version, 1);
        assert!(created.metadata.creation_timestamp.is_some());
        let err = pods.create(pod("web-0")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn resource_versions_are_shared_across_kinds() {
        let store = InMemoryStore::new();
        store.pods().create(pod("web-0")).await.unwrap();
        let workload = store
            .workloads()
            .create(Workload::new("ns", "web", WorkloadSpec::default()))
            .await
            .unwrap();
        assert_eq!(workload.metadata.resource_version, 2);
        assert_eq!(store.resource_version(), 2);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = InMemoryStore::new();
        let workloads = store.workloads();
        let created = workloads
            .create(Workload::new("ns", "web", WorkloadSpec::default()))
            .await
            .unwrap();
        let mut first = created.clone();
        first.spec.replicas = 3;
        let updated = workloads.update(first).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);

        let mut stale = created;
        stale.spec.replicas = 5;
        let err = workloads.update(stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_and_status_are_separate() {
        let store = InMemoryStore::new();
        let workloads = store.workloads();
        let created = workloads
            .create(Workload::new("ns", "web", WorkloadSpec::default()))
            .await
            .unwrap();

        let mut status_write = created.clone();
        status_write.status.replicas = 7;
        status_write.spec.replicas = 9;
        let after_status = workloads.update_status(status_write).await.unwrap();
        assert_eq!(after_status.status.replicas, 7);
        assert_eq!(after_status.spec.replicas, created.spec.replicas);
        assert_eq!(after_status.metadata.generation, 1);

        let mut spec_write = after_status.clone();
        spec_write.status.replicas = 0;
        let after_spec = workloads.update(spec_write).await.unwrap();
        assert_eq!(after_spec.status.replicas, 7);
        assert_eq!(
            after_spec.metadata.resource_version,
            after_status.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn revision_data_is_immutable() {
        let store = InMemoryStore::new();
        let revisions = store.revisions();
        let created = revisions
            .create(Revision {
                metadata: ObjectMeta::new("ns", "web-abc"),
                data: Default::default(),
                revision: 1,
            })
            .await
            .unwrap();
        let mut bumped = created.clone();
        bumped.revision = 4;
        assert_eq!(revisions.update(bumped).await.unwrap().revision, 4);

        let mut mutated = revisions.do_get("ns", "web-abc").unwrap();
        mutated.data.labels.insert("x".into(), "y".into());
        let err = revisions.update(mutated).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn controller_ref_patch_respects_existing_controller() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        let created = pods.create(pod("web-0")).await.unwrap();
        let uid = created.metadata.uid.clone();

        let adopted = pods
            .patch(
                "ns",
                "web-0",
                MetadataPatch::AddControllerRef(owner("owner-a")),
                Preconditions::uid(uid.clone()),
            )
            .await
            .unwrap();
        assert!(adopted.metadata.is_controlled_by("owner-a"));

        let err = pods
            .patch(
                "ns",
                "web-0",
                MetadataPatch::AddControllerRef(owner("owner-b")),
                Preconditions::uid(uid.clone()),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = pods
            .patch(
                "ns",
                "web-0",
                MetadataPatch::RemoveOwnerRef {
                    uid: "owner-a".into(),
                },
                Preconditions::uid("someone-else"),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let released = pods
            .patch(
                "ns",
                "web-0",
                MetadataPatch::RemoveOwnerRef {
                    uid: "owner-a".into(),
                },
                Preconditions::uid(uid),
            )
            .await
            .unwrap();
        assert!(released.metadata.controller_ref().is_none());
    }

    #[tokio::test]
    async fn graceful_deletion_keeps_object_until_purged() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        pods.set_graceful_deletion(true);
        pods.create(pod("web-0")).await.unwrap();

        pods.delete("ns", "web-0", Preconditions::default())
            .await
            .unwrap();
        let terminating = pods.do_get("ns", "web-0").unwrap();
        assert!(terminating.is_terminating());
        let version = terminating.metadata.resource_version;

        pods.delete("ns", "web-0", Preconditions::default())
            .await
            .unwrap();
        assert_eq!(
            pods.do_get("ns", "web-0").unwrap().metadata.resource_version,
            version
        );

        pods.purge("ns", "web-0").unwrap();
        assert!(pods.do_get("ns", "web-0").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_failures_fire_once_and_are_counted() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        pods.inject_failure(StoreOp::Create, StoreError::Transient("disk full".into()));
        let err = pods.create(pod("web-0")).await.unwrap_err();
        assert!(err.is_transient());
        pods.create(pod("web-0")).await.unwrap();
        assert_eq!(pods.call_count(StoreOp::Create), 2);
        assert_eq!(store.mutation_count(), 2);
        pods.list("ns", None).await.unwrap();
        assert_eq!(store.mutation_count(), 2);
    }

    #[tokio::test]
    async fn watchers_see_changes_in_order() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        let mut events = pods.subscribe();
        pods.create(pod("web-0")).await.unwrap();
        pods.delete("ns", "web-0", Preconditions::default())
            .await
            .unwrap();
        assert!(matches!(events.recv().await.unwrap(), WatchEvent::Added(_)));
        match events.recv().await.unwrap() {
            WatchEvent::Deleted(p) => assert_eq!(p.metadata.resource_version, 2),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_selector() {
        let store = InMemoryStore::new();
        let pods = store.pods();
        pods.create(pod("web-0")).await.unwrap();
        let mut other = pod("db-0");
        other.metadata.labels.insert("app".into(), "db".into());
        pods.create(other).await.unwrap();
        let mut elsewhere = pod("web-0");
        elsewhere.metadata.namespace = "other".into();
        pods.create(elsewhere).await.unwrap();

        let selector = LabelSelector::from_labels([("app", "web")]);
        let listed = pods.list("ns", Some(&selector)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(pods.select("", None).len(), 3);
        assert_eq!(pods.list_all().len(), 3);
    }
}
