//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Object model and store access for ordinal workloads."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
//! Object model for ordinal workloads together with the narrow interfaces the
//! reconciliation core consumes: a typed object-store client, an in-memory store that
//! implements it, and an informer-style watch cache.
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod informer;
pub mod meta;
pub mod pod;
pub mod resource;
pub mod revision;
pub mod selector;
pub mod store;
pub mod workload;

pub use client::{Lister, MetadataPatch, Preconditions, ResourceClient};
pub use error::StoreError;
pub use informer::{Cache, EventHandler, Informer, ListWatch};
pub use meta::{object_key, split_key, ObjectMeta, OwnerReference};
pub use pod::{
    parse_ordinal, pod_name, ConditionStatus, Pod, PodCondition, PodPhase, PodStatus,
    POD_NAME_LABEL, READY_CONDITION, REVISION_LABEL,
};
pub use resource::Resource;
pub use revision::{Revision, REVISION_HASH_LABEL};
pub use selector::{LabelSelector, LabelSelectorRequirement, SelectorOperator};
pub use store::{Bucket, InMemoryStore, StoreOp, WatchEvent};
pub use workload::{
    Container, PodManagementPolicy, PodSpec, PodTemplate, UpdateStrategy, Workload,
    WorkloadSpec, WorkloadStatus, DEFAULT_REVISION_HISTORY_LIMIT, WORKLOAD_KIND,
};
