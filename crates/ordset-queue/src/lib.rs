//! ---
//! ordset_section: "04-work-dispatch"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Deduplicating, rate-limited queue of object keys."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
//! Work queue feeding reconcile workers.
//!
//! A key is held by at most one worker at a time. Adding a key that is already queued
//! is a no-op; adding a key that is being processed marks it dirty so it resurfaces
//! once the worker calls [`WorkQueue::done`].

mod backoff;
mod metrics;
mod queue;

pub use backoff::Backoff;
pub use metrics::QueueMetrics;
pub use queue::WorkQueue;
