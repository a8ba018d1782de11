//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Typed object-store client and cache reader interfaces."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::meta::OwnerReference;
use crate::resource::Resource;
use crate::selector::LabelSelector;

/// Conditions a write must satisfy against the stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    /// Stored uid must equal this value.
    pub uid: Option<String>,
    /// Stored resource version must equal this value.
    pub resource_version: Option<u64>,
}

impl Preconditions {
    /// Require the stored object to have `uid`.
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            resource_version: None,
        }
    }
}

/// Metadata-only mutation applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataPatch {
    /// Add a controller owner reference. Fails with a conflict when another controller
    /// already owns the object.
    AddControllerRef(OwnerReference),
    /// Drop every owner reference with the given uid.
    RemoveOwnerRef {
        /// Owner uid to remove.
        uid: String,
    },
    /// Insert or overwrite the given labels.
    MergeLabels(BTreeMap<String, String>),
}

/// Authoritative, asynchronous access to one object kind.
#[async_trait]
pub trait ResourceClient<R: Resource>: Send + Sync {
    /// Read the latest stored object.
    async fn get(&self, namespace: &str, name: &str) -> Result<R, StoreError>;

    /// List objects in `namespace`, optionally filtered by selector.
    async fn list(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<R>, StoreError>;

    /// Create a new object. Status is ignored.
    async fn create(&self, object: R) -> Result<R, StoreError>;

    /// Replace metadata and spec. A non-zero resource version must match the store.
    async fn update(&self, object: R) -> Result<R, StoreError>;

    /// Replace the status sub-resource only.
    async fn update_status(&self, object: R) -> Result<R, StoreError>;

    /// Delete, or start graceful deletion of, an object.
    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        preconditions: Preconditions,
    ) -> Result<(), StoreError>;

    /// Apply a metadata patch.
    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: MetadataPatch,
        preconditions: Preconditions,
    ) -> Result<R, StoreError>;
}

/// Synchronous read access to a possibly stale snapshot.
pub trait Lister<R: Resource>: Send + Sync {
    /// Cached object by name.
    fn lookup(&self, namespace: &str, name: &str) -> Option<R>;

    /// Cached objects in `namespace`, optionally filtered by selector.
    fn select(&self, namespace: &str, selector: Option<&LabelSelector>) -> Vec<R>;

    /// Every cached object.
    fn list_all(&self) -> Vec<R>;
}
