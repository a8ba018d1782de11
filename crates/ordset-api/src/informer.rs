//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "List-and-watch cache that fans changes out to event handlers."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::Lister;
use crate::meta::object_key;
use crate::resource::Resource;
use crate::selector::LabelSelector;
use crate::store::WatchEvent;

/// Source of a consistent snapshot plus the change stream that follows it.
pub trait ListWatch<R: Resource>: Send + Sync {
    /// Current objects and a receiver for every change after them.
    fn list_and_watch(&self) -> (Vec<R>, broadcast::Receiver<WatchEvent<R>>);
}

/// Callbacks invoked from the informer task. Implementations must not block.
pub trait EventHandler<R: Resource>: Send + Sync {
    /// Object appeared in the cache.
    fn on_add(&self, object: &R);
    /// Object changed, or was re-delivered by a relist.
    fn on_update(&self, old: &R, new: &R);
    /// Object left the cache. Carries its final known state.
    fn on_delete(&self, object: &R);
}

/// Read-only snapshot maintained by an [`Informer`].
pub struct Cache<R> {
    objects: RwLock<BTreeMap<String, R>>,
}

impl<R> fmt::Debug for Cache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("objects", &self.objects.read().len())
            .finish()
    }
}

impl<R: Resource> Cache<R> {
    fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn insert(&self, object: R) -> Option<R> {
        self.objects.write().insert(object.key(), object)
    }

    fn remove(&self, key: &str) -> Option<R> {
        self.objects.write().remove(key)
    }

    fn replace(&self, objects: BTreeMap<String, R>) -> BTreeMap<String, R> {
        std::mem::replace(&mut *self.objects.write(), objects)
    }
}

impl<R: Resource> Lister<R> for Cache<R> {
    fn lookup(&self, namespace: &str, name: &str) -> Option<R> {
        self.objects.read().get(&object_key(namespace, name)).cloned()
    }

    fn select(&self, namespace: &str, selector: Option<&LabelSelector>) -> Vec<R> {
        self.objects
            .read()
            .values()
            .filter(|obj| namespace.is_empty() || obj.metadata().namespace == namespace)
            .filter(|obj| {
                selector
                    .map(|s| s.matches(&obj.metadata().labels))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    fn list_all(&self) -> Vec<R> {
        self.objects.read().values().cloned().collect()
    }
}

/// Keeps a [`Cache`] in step with a [`ListWatch`] source and notifies handlers.
///
/// The informer relists whenever its watch stream lags, replaying the difference to
/// handlers as adds, updates and deletes.
pub struct Informer<R: Resource> {
    source: Arc<dyn ListWatch<R>>,
    cache: Arc<Cache<R>>,
    handlers: RwLock<Vec<Arc<dyn EventHandler<R>>>>,
    synced: watch::Sender<bool>,
}

impl<R: Resource> fmt::Debug for Informer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &R::KIND)
            .field("cache", &self.cache)
            .field("handlers", &self.handlers.read().len())
            .field("synced", &*self.synced.borrow())
            .finish()
    }
}

impl<R: Resource> Informer<R> {
    /// New, not yet running informer.
    pub fn new(source: Arc<dyn ListWatch<R>>) -> Arc<Self> {
        let (synced, _) = watch::channel(false);
        Arc::new(Self {
            source,
            cache: Arc::new(Cache::new()),
            handlers: RwLock::new(Vec::new()),
            synced,
        })
    }

    /// Register a handler. Handlers added after start only see later changes.
    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler<R>>) {
        self.handlers.write().push(handler);
    }

    /// Reader over the cache.
    pub fn lister(&self) -> Arc<Cache<R>> {
        self.cache.clone()
    }

    /// True once the initial list has been loaded.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the cache has synced, giving up after `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let mut synced = self.synced.subscribe();
        let outcome = tokio::time::timeout(timeout, synced.wait_for(|done| *done)).await;
        matches!(outcome, Ok(Ok(_)))
    }

    /// Run the list-and-watch loop on the current runtime until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let informer = Arc::clone(self);
        tokio::spawn(async move { informer.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let (objects, mut events) = self.source.list_and_watch();
            self.relist(objects);
            self.synced.send_replace(true);
            debug!(kind = R::KIND, objects = self.cache.len(), "informer cache synced");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(kind = R::KIND, "informer stopping");
                        return;
                    }
                    received = events.recv() => match received {
                        Ok(event) => self.apply(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(kind = R::KIND, skipped, "watch stream lagged; relisting");
                            break;
                        }
                        Err(RecvError::Closed) => {
                            debug!(kind = R::KIND, "watch stream closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn EventHandler<R>>> {
        self.handlers.read().clone()
    }

    fn apply(&self, event: WatchEvent<R>) {
        let handlers = self.handlers();
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                match self.cache.insert(object.clone()) {
                    Some(old) => handlers.iter().for_each(|h| h.on_update(&old, &object)),
                    None => handlers.iter().for_each(|h| h.on_add(&object)),
                }
            }
            WatchEvent::Deleted(object) => {
                self.cache.remove(&object.key());
                handlers.iter().for_each(|h| h.on_delete(&object));
            }
        }
    }

    fn relist(&self, objects: Vec<R>) {
        let fresh: BTreeMap<String, R> = objects.into_iter().map(|o| (o.key(), o)).collect();
        let previous = self.cache.replace(fresh.clone());
        let handlers = self.handlers();
        for (key, object) in &fresh {
            match previous.get(key) {
                Some(old) => handlers.iter().for_each(|h| h.on_update(old, object)),
                None => handlers.iter().for_each(|h| h.on_add(object)),
            }
        }
        for (key, old) in &previous {
            if !fresh.contains_key(key) {
                handlers.iter().for_each(|h| h.on_delete(old));
            }
        }
    }
}
