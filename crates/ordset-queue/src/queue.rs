//! ---
//! ordset_section: "04-work-dispatch"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Single-flight work queue with delayed and rate-limited adds."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ordset_common::QueueConfig;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::backoff::Backoff;
use crate::metrics::QueueMetrics;

/// Timer that will add a key back once `ready_at` passes.
struct Delayed {
    ready_at: Instant,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    waiting: HashMap<String, Delayed>,
    shutting_down: bool,
}

/// Deduplicating queue of object keys.
///
/// Invariants: a key is in `queue` only if it is in `dirty`, and never while it is in
/// `processing`. At most one delay timer exists per key in `waiting`.
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: Backoff,
    metrics: Option<QueueMetrics>,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl WorkQueue {
    /// New queue retrying failed keys along `backoff`.
    pub fn new(name: impl Into<String>, backoff: Backoff) -> Arc<Self> {
        Self::build(name.into(), backoff, None)
    }

    /// New queue built from configuration, publishing metrics when given.
    pub fn from_config(
        name: impl Into<String>,
        config: &QueueConfig,
        metrics: Option<QueueMetrics>,
    ) -> Arc<Self> {
        Self::build(name.into(), Backoff::from(config), metrics)
    }

    fn build(name: String, backoff: Backoff, metrics: Option<QueueMetrics>) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
            metrics,
        })
    }

    /// Queue name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `key` unless it is already waiting.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if let Some(metrics) = &self.metrics {
            metrics.inc_adds(&self.name);
        }
        if state.processing.contains(&key) {
            trace!(queue = %self.name, key = %key, "key in flight; marked dirty");
            return;
        }
        state.queue.push_back(key);
        self.publish_depth(state.queue.len());
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue `key` once `delay` has elapsed.
    ///
    /// A key keeps only its earliest pending deadline; a later one is ignored and an
    /// earlier one replaces the running timer.
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        if let Some(pending) = state.waiting.get(&key) {
            if pending.ready_at <= ready_at {
                trace!(queue = %self.name, key = %key, "earlier delayed add already pending");
                return;
            }
            pending.timer.abort();
        }
        let queue = Arc::clone(self);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            queue.fire(&timer_key, ready_at);
        });
        state.waiting.insert(key, Delayed { ready_at, timer });
    }

    fn fire(&self, key: &str, ready_at: Instant) {
        let mut state = self.state.lock();
        let current = state.waiting.get(key).map(|pending| pending.ready_at);
        if current != Some(ready_at) {
            return;
        }
        state.waiting.remove(key);
        drop(state);
        self.add(key.to_owned());
    }

    /// Keys waiting on a delay timer.
    pub fn delayed_len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Enqueue `key` after its per-key backoff and count one more failure for it.
    pub fn add_rate_limited(self: &Arc<Self>, key: impl Into<String>) {
        let key = key.into();
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_retries(&self.name);
        }
        debug!(queue = %self.name, key = %key, delay_ms = delay.as_millis() as u64, "requeue with backoff");
        self.add_after(key, delay);
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &str) {
        self.state.lock().failures.remove(key);
    }

    /// Number of rate-limited requeues since the last [`WorkQueue::forget`].
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let remaining = state.queue.len();
                    self.publish_depth(remaining);
                    drop(state);
                    if remaining > 0 {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release `key`. If it was added again while in flight it is queued once more.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains(key) {
            return;
        }
        state.queue.push_back(key.to_owned());
        self.publish_depth(state.queue.len());
        drop(state);
        self.notify.notify_one();
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when no key is waiting.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Stop handing out keys. Pending keys and delay timers are dropped and every
    /// blocked [`WorkQueue::get`] returns `None`.
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        let dropped = state.queue.len();
        state.queue.clear();
        state.dirty.clear();
        for (_, pending) in state.waiting.drain() {
            pending.timer.abort();
        }
        self.publish_depth(0);
        drop(state);
        debug!(queue = %self.name, dropped, "work queue shut down");
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    fn publish_depth(&self, depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_depth(&self.name, depth);
        }
    }
}
