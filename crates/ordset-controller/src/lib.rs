//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Reconciliation engine for ordinal workloads."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
//! Reconciles ordinal workloads: claims pods and revisions, keeps a content-hashed
//! revision history, plans ordinal-ordered pod actions, executes them and persists
//! aggregate status. [`Controller`] runs the whole loop behind informers and a work
//! queue; [`Reconciler`] performs a single pass and can be driven directly.

pub mod controller;
pub mod error;
pub mod events;
pub mod handlers;
pub mod history;
pub mod metrics;
pub mod ownership;
pub mod planner;
pub mod reconciler;
pub mod retry;
pub mod status;

pub use controller::{Controller, ControllerContext, ControllerHandle, KindApi};
pub use error::ReconcileError;
pub use events::{EventLog, EventReason, EventRecorder, EventType, RecordedEvent, TracingRecorder};
pub use handlers::{DependentHandler, WorkloadHandler};
pub use history::{compute_hash, HistoryManager, RevisionSet};
pub use metrics::ControllerMetrics;
pub use ownership::{claim, AdoptionGate, Claimed};
pub use planner::{plan, Action, DeleteReason, Plan, PlanInput, Wait};
pub use reconciler::{Clients, Listers, PassReport, Reconciler, SyncOutcome};
pub use retry::{retry_on_conflict, RetryPolicy};
pub use status::{compute_status, StatusWriter};
