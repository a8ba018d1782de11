//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Error taxonomy for reconciliation passes."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::time::Duration;

use ordset_api::StoreError;
use thiserror::Error;

/// Failure of one reconciliation pass or of controller startup.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The object store rejected a call.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Optimistic-concurrency conflicts persisted past the retry budget.
    #[error("conflict on {key} persisted after {attempts} attempts")]
    ConflictRetriesExhausted {
        /// Object being written.
        key: String,
        /// Attempts made.
        attempts: usize,
    },
    /// Revision name collisions could not be resolved.
    #[error("revision name for {workload} still collides after {attempts} attempts")]
    CollisionLimit {
        /// Owning workload key.
        workload: String,
        /// Attempts made.
        attempts: u32,
    },
    /// The observed state is ambiguous; nothing was changed.
    #[error("invariant violation on {workload}: {detail}")]
    InvariantViolation {
        /// Workload key.
        workload: String,
        /// What was ambiguous.
        detail: String,
    },
    /// The cache lags a write this pass depends on.
    #[error("stale cache for {key}: {detail}")]
    StaleCache {
        /// Object key.
        key: String,
        /// What was stale.
        detail: String,
    },
    /// A queue key did not have the `namespace/name` shape.
    #[error("malformed key {0}")]
    InvalidKey(String),
    /// A template could not be serialized for hashing.
    #[error("template encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Watch caches did not fill before the deadline.
    #[error("caches for {kinds:?} not synced within {timeout:?}")]
    CacheNotSynced {
        /// Kinds still unsynced.
        kinds: Vec<&'static str>,
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

impl ReconcileError {
    /// Whether the key should be retried with backoff.
    pub fn is_requeueable(&self) -> bool {
        match self {
            ReconcileError::Store(err) => !matches!(err, StoreError::Invalid { .. }),
            ReconcileError::ConflictRetriesExhausted { .. }
            | ReconcileError::CollisionLimit { .. }
            | ReconcileError::StaleCache { .. } => true,
            ReconcileError::InvariantViolation { .. }
            | ReconcileError::InvalidKey(_)
            | ReconcileError::Encoding(_)
            | ReconcileError::CacheNotSynced { .. } => false,
        }
    }

    /// Whether the failure was a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Store(err) if err.is_not_found())
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store(StoreError::NotFound { .. }) => "not_found",
            ReconcileError::Store(StoreError::AlreadyExists { .. }) => "already_exists",
            ReconcileError::Store(StoreError::Conflict { .. }) => "conflict",
            ReconcileError::Store(StoreError::Invalid { .. }) => "invalid",
            ReconcileError::Store(StoreError::Transient(_)) => "transient",
            ReconcileError::ConflictRetriesExhausted { .. } => "conflict_exhausted",
            ReconcileError::CollisionLimit { .. } => "collision_limit",
            ReconcileError::InvariantViolation { .. } => "invariant_violation",
            ReconcileError::StaleCache { .. } => "stale_cache",
            ReconcileError::InvalidKey(_) => "invalid_key",
            ReconcileError::Encoding(_) => "encoding",
            ReconcileError::CacheNotSynced { .. } => "cache_not_synced",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ReconcileError::from(StoreError::Transient("timeout".into())).is_requeueable());
        assert!(ReconcileError::StaleCache {
            key: "ns/web".into(),
            detail: "pod exists".into()
        }
        .is_requeueable());
        assert!(!ReconcileError::InvariantViolation {
            workload: "ns/web".into(),
            detail: "duplicate ordinal 1".into()
        }
        .is_requeueable());
        assert!(!ReconcileError::InvalidKey("a/b/c".into()).is_requeueable());

        let missing = ReconcileError::from(StoreError::NotFound {
            kind: "Pod",
            key: "ns/web-0".into(),
        });
        assert!(missing.is_not_found());
        assert_eq!(missing.kind(), "not_found");
    }
}
