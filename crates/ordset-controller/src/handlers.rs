//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Watch event handlers translating changes into queued workload keys."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
//! Handlers only enqueue keys; reconciliation always happens on a worker.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ordset_api::{EventHandler, Lister, ObjectMeta, Resource, Workload, WORKLOAD_KIND};
use ordset_queue::WorkQueue;
use tracing::trace;

/// Enqueues a workload whenever it changes.
pub struct WorkloadHandler {
    queue: Arc<WorkQueue>,
}

impl WorkloadHandler {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self { queue }
    }
}

impl fmt::Debug for WorkloadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadHandler")
            .field("queue", &self.queue.name())
            .finish()
    }
}

impl EventHandler<Workload> for WorkloadHandler {
    fn on_add(&self, object: &Workload) {
        self.queue.add(object.key());
    }

    fn on_update(&self, _old: &Workload, new: &Workload) {
        self.queue.add(new.key());
    }

    fn on_delete(&self, object: &Workload) {
        self.queue.add(object.key());
    }
}

/// Maps changes of pods and revisions onto the workloads that own, or could adopt, them.
pub struct DependentHandler<R> {
    queue: Arc<WorkQueue>,
    workloads: Arc<dyn Lister<Workload>>,
    _kind: PhantomData<fn(R)>,
}

impl<R: Resource> DependentHandler<R> {
    pub fn new(queue: Arc<WorkQueue>, workloads: Arc<dyn Lister<Workload>>) -> Self {
        Self {
            queue,
            workloads,
            _kind: PhantomData,
        }
    }

    /// Key of the cached workload controlling `meta`, if the reference still resolves.
    fn resolve_owner(&self, meta: &ObjectMeta) -> Option<String> {
        let owner = meta.controller_ref()?;
        if owner.kind != WORKLOAD_KIND {
            return None;
        }
        let workload = self.workloads.lookup(&meta.namespace, &owner.name)?;
        (workload.metadata.uid == owner.uid).then(|| workload.key())
    }

    fn enqueue_owner(&self, meta: &ObjectMeta) {
        if let Some(key) = self.resolve_owner(meta) {
            trace!(kind = R::KIND, dependent = %meta.key(), workload = %key, "enqueue owner");
            self.queue.add(key);
        }
    }

    fn enqueue_selecting(&self, meta: &ObjectMeta) {
        for workload in self.workloads.select(&meta.namespace, None) {
            if workload.spec.selector.matches(&meta.labels) {
                trace!(kind = R::KIND, dependent = %meta.key(), workload = %workload.key(), "enqueue possible adopter");
                self.queue.add(workload.key());
            }
        }
    }
}

impl<R> fmt::Debug for DependentHandler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentHandler")
            .field("queue", &self.queue.name())
            .finish_non_exhaustive()
    }
}

impl<R: Resource> EventHandler<R> for DependentHandler<R> {
    fn on_add(&self, object: &R) {
        let meta = object.metadata();
        if meta.is_terminating() {
            self.on_delete(object);
            return;
        }
        if meta.controller_ref().is_some() {
            self.enqueue_owner(meta);
        } else {
            self.enqueue_selecting(meta);
        }
    }

    fn on_update(&self, old: &R, new: &R) {
        let (old_meta, new_meta) = (old.metadata(), new.metadata());
        if old_meta.resource_version == new_meta.resource_version {
            return;
        }
        let labels_changed = old_meta.labels != new_meta.labels;
        let owner_changed = old_meta.controller_ref() != new_meta.controller_ref();
        if owner_changed && old_meta.controller_ref().is_some() {
            self.enqueue_owner(old_meta);
        }
        if new_meta.controller_ref().is_some() {
            self.enqueue_owner(new_meta);
        } else if labels_changed || owner_changed {
            self.enqueue_selecting(new_meta);
        }
    }

    fn on_delete(&self, object: &R) {
        self.enqueue_owner(object.metadata());
    }
}
