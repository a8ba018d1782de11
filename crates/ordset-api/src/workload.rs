//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Ordinal workload resource definition."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::meta::{ObjectMeta, OwnerReference};
use crate::resource::Resource;
use crate::selector::LabelSelector;

/// Kind name of the workload resource.
pub const WORKLOAD_KIND: &str = "OrdinalSet";

/// Number of revisions kept when a workload sets no limit.
pub const DEFAULT_REVISION_HISTORY_LIMIT: u32 = 10;

fn default_revision_history_limit() -> u32 {
    DEFAULT_REVISION_HISTORY_LIMIT
}

fn default_replicas() -> u32 {
    1
}

/// A single container in a pod template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name, unique within the pod.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command-line arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Exposed ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
}

/// Desired state of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers to run.
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Node placement constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Grace period honoured on deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Template every pod of a workload is stamped from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    /// Labels applied to every pod.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations applied to every pod.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Pod spec.
    #[serde(default)]
    pub spec: PodSpec,
}

/// How template changes are rolled out to existing pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UpdateStrategy {
    /// Replace pods automatically, highest ordinal first. Ordinals below `partition` keep
    /// the current revision.
    RollingUpdate {
        /// Lowest ordinal that receives the update revision.
        #[serde(default)]
        partition: u32,
    },
    /// Only pods deleted externally are recreated at the update revision.
    OnDelete,
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        UpdateStrategy::RollingUpdate { partition: 0 }
    }
}

/// Whether pod creation and deletion is serialized by ordinal.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
pub enum PodManagementPolicy {
    /// One pod at a time, each waiting for its predecessor to be running and ready.
    #[default]
    OrderedReady,
    /// All creations and deletions are issued at once.
    Parallel,
}

/// Desired state of an ordinal workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Number of pods, ordinals `0..replicas`.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Selects the pods and revisions this workload may own.
    pub selector: LabelSelector,
    /// Pod template.
    pub template: PodTemplate,
    /// Rollout strategy.
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    /// Ordering policy.
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    /// Revisions retained beyond the live ones.
    #[serde(default = "default_revision_history_limit")]
    pub revision_history_limit: u32,
}

/// Observed state of an ordinal workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Generation the status was computed for.
    #[serde(default)]
    pub observed_generation: i64,
    /// Owned pods, terminating ones included.
    #[serde(default)]
    pub replicas: u32,
    /// Owned pods that are running and ready.
    #[serde(default)]
    pub ready_replicas: u32,
    /// Live owned pods labelled with the current revision.
    #[serde(default)]
    pub current_replicas: u32,
    /// Live owned pods labelled with the update revision.
    #[serde(default)]
    pub updated_replicas: u32,
    /// Revision the stable pods run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_revision: String,
    /// Revision derived from the present template.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_revision: String,
    /// Salt used to resolve revision name collisions.
    #[serde(default)]
    pub collision_count: u32,
}

/// Ordinal workload: a set of identically templated pods with stable ordinal names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: WorkloadSpec,
    /// Observed state, written only by the controller.
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    /// New workload with empty status.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: WorkloadSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: WorkloadStatus::default(),
        }
    }

    /// Controller owner reference pointing at this workload.
    pub fn controller_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            kind: WORKLOAD_KIND.to_owned(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    /// Partition for rolling updates; zero for other strategies.
    pub fn partition(&self) -> u32 {
        match self.spec.update_strategy {
            UpdateStrategy::RollingUpdate { partition } => partition,
            UpdateStrategy::OnDelete => 0,
        }
    }
}

impl Resource for Workload {
    const KIND: &'static str = WORKLOAD_KIND;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec_differs(&self, other: &Self) -> bool {
        self.spec != other.spec
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}
