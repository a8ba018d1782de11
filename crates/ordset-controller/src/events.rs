//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Domain notifications attached to workloads."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use ordset_api::{Resource, Workload};
use parking_lot::Mutex;
use strum::{AsRefStr, Display};
use tracing::{info, warn};

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum EventType {
    /// Expected progress.
    Normal,
    /// Something needs attention.
    Warning,
}

/// Why an event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum EventReason {
    /// A pod was created.
    SuccessfulCreate,
    /// Pod creation failed.
    FailedCreate,
    /// A pod was deleted.
    SuccessfulDelete,
    /// Pod deletion failed.
    FailedDelete,
    /// A failed pod is being replaced.
    RecreatingFailedPod,
    /// Claiming or releasing a dependent failed.
    FailedAdoption,
    /// The observed state was ambiguous.
    InvariantViolation,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// `namespace/name` of the workload.
    pub object: String,
    /// Severity.
    pub event_type: EventType,
    /// Reason.
    pub reason: EventReason,
    /// Human readable detail.
    pub message: String,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Sink for workload events.
pub trait EventRecorder: Send + Sync {
    /// Attach an event to `workload`.
    fn record(
        &self,
        workload: &Workload,
        event_type: EventType,
        reason: EventReason,
        message: String,
    );
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(
        &self,
        workload: &Workload,
        event_type: EventType,
        reason: EventReason,
        message: String,
    ) {
        let key = workload.key();
        match event_type {
            EventType::Normal => {
                info!(target: "ordset::events", workload = %key, reason = %reason, "{message}")
            }
            EventType::Warning => {
                warn!(target: "ordset::events", workload = %key, reason = %reason, "{message}")
            }
        }
    }
}

/// Keeps every event in memory. Useful for tests and diagnostics.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Events with the given reason, oldest first.
    pub fn with_reason(&self, reason: EventReason) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    /// Drop all events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventRecorder for EventLog {
    fn record(
        &self,
        workload: &Workload,
        event_type: EventType,
        reason: EventReason,
        message: String,
    ) {
        self.events.lock().push(RecordedEvent {
            object: workload.key(),
            event_type,
            reason,
            message,
            timestamp: Utc::now(),
        });
    }
}
