//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Error taxonomy returned by object-store operations."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use thiserror::Error;

/// Failure reported by the object store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The named object does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: &'static str,
        /// `namespace/name` key.
        key: String,
    },
    /// An object with the same key already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the existing object.
        kind: &'static str,
        /// `namespace/name` key.
        key: String,
    },
    /// A precondition or resource version check failed.
    #[error("conflict on {kind} {key}: {reason}")]
    Conflict {
        /// Kind of the contested object.
        kind: &'static str,
        /// `namespace/name` key.
        key: String,
        /// Why the write was rejected.
        reason: String,
    },
    /// The request was malformed or attempted an illegal mutation.
    #[error("invalid {kind} {key}: {reason}")]
    Invalid {
        /// Kind of the rejected object.
        kind: &'static str,
        /// `namespace/name` key.
        key: String,
        /// Why the write was rejected.
        reason: String,
    },
    /// Temporary failure; the caller should retry later.
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl StoreError {
    /// True for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True for [`StoreError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// True for [`StoreError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// True for [`StoreError::Transient`].
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn conflict(
        kind: &'static str,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        StoreError::Conflict {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(
        kind: &'static str,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        StoreError::Invalid {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }
}
