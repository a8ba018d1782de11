//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Pod resource and ordinal naming helpers."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::meta::ObjectMeta;
use crate::resource::Resource;
use crate::workload::PodSpec;

/// Label carrying the pod's own name, used for per-ordinal addressing.
pub const POD_NAME_LABEL: &str = "ordset.io/pod-name";

/// Label carrying the name of the revision a pod was created from.
pub const REVISION_LABEL: &str = "ordset.io/revision";

/// Condition type reported when a pod is ready to serve.
pub const READY_CONDITION: &str = "Ready";

/// Name of the pod at `ordinal` of workload `parent`.
pub fn pod_name(parent: &str, ordinal: u32) -> String {
    format!("{parent}-{ordinal}")
}

/// Ordinal encoded in `name` if it has the form `{parent}-{ordinal}`.
pub fn parse_ordinal(parent: &str, name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(parent)?.strip_prefix('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Lifecycle phase of a pod.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
pub enum PodPhase {
    /// Accepted but not yet running.
    #[default]
    Pending,
    /// At least one container is running.
    Running,
    /// All containers exited successfully.
    Succeeded,
    /// All containers exited and at least one failed.
    Failed,
    /// State could not be determined.
    Unknown,
}

/// Tri-state condition value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Not known.
    #[default]
    Unknown,
}

/// A single observed pod condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    /// Condition type, e.g. [`READY_CONDITION`].
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Condition value.
    pub status: ConditionStatus,
}

/// Observed pod state, written by the node agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: PodPhase,
    /// Observed conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PodCondition>,
}

/// A pod: one running instance stamped from a workload template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: PodSpec,
    /// Observed state.
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// Whether the ready condition is true.
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == READY_CONDITION && c.status == ConditionStatus::True)
    }

    /// Running phase with a true ready condition.
    pub fn is_running_and_ready(&self) -> bool {
        self.status.phase == PodPhase::Running && self.is_ready()
    }

    /// Terminal failure.
    pub fn is_failed(&self) -> bool {
        self.status.phase == PodPhase::Failed
    }

    /// Graceful deletion has started.
    pub fn is_terminating(&self) -> bool {
        self.metadata.is_terminating()
    }

    /// Revision recorded on the pod's label.
    pub fn revision(&self) -> Option<&str> {
        self.metadata.labels.get(REVISION_LABEL).map(String::as_str)
    }

    /// Mark the pod running with the given readiness. Used by node agents.
    pub fn set_running(&mut self, ready: bool) {
        self.status.phase = PodPhase::Running;
        let status = if ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == READY_CONDITION)
        {
            Some(condition) => condition.status = status,
            None => self.status.conditions.push(PodCondition {
                condition_type: READY_CONDITION.to_owned(),
                status,
            }),
        }
    }
}

impl Resource for Pod {
    const KIND: &'static str = "Pod";

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
