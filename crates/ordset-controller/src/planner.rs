//! ---
//! ordset_section: "05-reconciliation"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Ordinal planner: desired versus observed pods to mutating actions."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
//! Pure planning step of a reconciliation pass.
//!
//! The planner walks the ordinals the way a careful operator would: fix `0..replicas`
//! in ascending order, then remove condemned ordinals from the top down, then roll
//! outdated pods from the highest ordinal down to the partition. Under `OrderedReady` it
//! stops at the first action or the first pod that is not yet settled, so at most one
//! ordinal is ever in transition. Under `Parallel` it batches everything except the
//! rolling replacement, which stays one pod at a time.

use std::collections::BTreeMap;

use ordset_api::{
    parse_ordinal, Pod, PodManagementPolicy, UpdateStrategy, Workload, POD_NAME_LABEL,
};
use strum::{AsRefStr, Display};

/// Why a pod is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum DeleteReason {
    /// Ordinal is at or above the desired replica count.
    Condemned,
    /// Pod runs a revision other than the update revision.
    Outdated,
}

/// A single mutation the reconciler should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create the pod for `ordinal` from `revision`.
    Create {
        /// Ordinal to fill.
        ordinal: u32,
        /// Revision whose template stamps the pod.
        revision: String,
    },
    /// Delete a failed pod and create its replacement.
    Recreate {
        /// Ordinal of the failed pod.
        ordinal: u32,
        /// Pod name.
        pod: String,
        /// Pod uid, used as delete precondition.
        uid: String,
        /// Revision for the replacement.
        revision: String,
    },
    /// Delete a pod.
    Delete {
        /// Ordinal of the pod.
        ordinal: u32,
        /// Pod name.
        pod: String,
        /// Pod uid, used as delete precondition.
        uid: String,
        /// Why.
        reason: DeleteReason,
    },
    /// Put back the pod's identity label.
    RestoreIdentity {
        /// Ordinal of the pod.
        ordinal: u32,
        /// Pod name.
        pod: String,
        /// Pod uid, used as patch precondition.
        uid: String,
    },
}

impl Action {
    /// Ordinal the action touches.
    pub fn ordinal(&self) -> u32 {
        match self {
            Action::Create { ordinal, .. }
            | Action::Recreate { ordinal, .. }
            | Action::Delete { ordinal, .. }
            | Action::RestoreIdentity { ordinal, .. } => *ordinal,
        }
    }

    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Recreate { .. } => "recreate",
            Action::Delete {
                reason: DeleteReason::Condemned,
                ..
            } => "delete_condemned",
            Action::Delete {
                reason: DeleteReason::Outdated,
                ..
            } => "delete_outdated",
            Action::RestoreIdentity { .. } => "restore_identity",
        }
    }
}

/// Why the planner stopped short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait {
    /// Pod at `ordinal` is not running and ready yet.
    Ready {
        /// Ordinal being waited on.
        ordinal: u32,
    },
    /// Pod at `ordinal` is still terminating.
    Termination {
        /// Ordinal being waited on.
        ordinal: u32,
    },
    /// The observed pods are ambiguous; no action is safe.
    InvariantViolation(String),
}

/// Planner output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Actions in execution order.
    pub actions: Vec<Action>,
    /// Set when progress is blocked.
    pub waiting: Option<Wait>,
}

impl Plan {
    fn blocked(wait: Wait) -> Self {
        Self {
            actions: Vec::new(),
            waiting: Some(wait),
        }
    }

    fn wait(mut self, wait: Wait) -> Self {
        self.waiting.get_or_insert(wait);
        self
    }

    /// True when there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Everything the planner looks at.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    /// The workload.
    pub workload: &'a Workload,
    /// Pods the workload owns.
    pub pods: &'a [Pod],
    /// Name of the current revision.
    pub current_revision: &'a str,
    /// Name of the update revision.
    pub update_revision: &'a str,
}

impl<'a> PlanInput<'a> {
    fn revision_for(&self, ordinal: u32) -> &'a str {
        match self.workload.spec.update_strategy {
            UpdateStrategy::RollingUpdate { partition } if ordinal < partition => {
                self.current_revision
            }
            _ => self.update_revision,
        }
    }
}

fn identity_matches(pod: &Pod) -> bool {
    pod.metadata.labels.get(POD_NAME_LABEL) == Some(&pod.metadata.name)
}

/// Compute the actions that move the observed pods toward the workload's spec.
pub fn plan(input: &PlanInput<'_>) -> Plan {
    let workload = input.workload;
    let replicas = workload.spec.replicas;
    let monotonic = workload.spec.pod_management_policy == PodManagementPolicy::OrderedReady;

    let mut by_ordinal: BTreeMap<u32, &Pod> = BTreeMap::new();
    for pod in input.pods {
        let Some(ordinal) = parse_ordinal(&workload.metadata.name, &pod.metadata.name) else {
            continue;
        };
        if let Some(previous) = by_ordinal.insert(ordinal, pod) {
            return Plan::blocked(Wait::InvariantViolation(format!(
                "pods {} and {} both resolve to ordinal {ordinal}",
                previous.metadata.name, pod.metadata.name
            )));
        }
    }

    let mut plan = Plan::default();

    for ordinal in 0..replicas {
        let Some(pod) = by_ordinal.get(&ordinal).copied() else {
            plan.actions.push(Action::Create {
                ordinal,
                revision: input.revision_for(ordinal).to_owned(),
            });
            if monotonic {
                return plan;
            }
            continue;
        };
        if pod.is_failed() && !pod.is_terminating() {
            plan.actions.push(Action::Recreate {
                ordinal,
                pod: pod.metadata.name.clone(),
                uid: pod.metadata.uid.clone(),
                revision: input.revision_for(ordinal).to_owned(),
            });
            if monotonic {
                return plan;
            }
            continue;
        }
        if pod.is_terminating() {
            if monotonic {
                return plan.wait(Wait::Termination { ordinal });
            }
            continue;
        }
        if monotonic && !pod.is_running_and_ready() {
            return plan.wait(Wait::Ready { ordinal });
        }
        if !identity_matches(pod) {
            plan.actions.push(Action::RestoreIdentity {
                ordinal,
                pod: pod.metadata.name.clone(),
                uid: pod.metadata.uid.clone(),
            });
            if monotonic {
                return plan;
            }
        }
    }

    let condemned: Vec<(u32, &Pod)> = by_ordinal
        .range(replicas..)
        .rev()
        .map(|(ordinal, pod)| (*ordinal, *pod))
        .collect();
    if monotonic {
        if let Some((ordinal, _)) = condemned.iter().find(|(_, pod)| pod.is_terminating()) {
            return plan.wait(Wait::Termination { ordinal: *ordinal });
        }
        if let Some((ordinal, pod)) = condemned.first() {
            plan.actions.push(condemn(*ordinal, pod));
            return plan;
        }
    } else {
        for (ordinal, pod) in &condemned {
            if !pod.is_terminating() {
                plan.actions.push(condemn(*ordinal, pod));
            }
        }
    }

    let UpdateStrategy::RollingUpdate { partition } = workload.spec.update_strategy else {
        return plan;
    };
    for ordinal in (partition..replicas).rev() {
        let Some(pod) = by_ordinal.get(&ordinal).copied() else {
            return plan.wait(Wait::Ready { ordinal });
        };
        if pod.revision() != Some(input.update_revision) && !pod.is_terminating() {
            plan.actions.push(Action::Delete {
                ordinal,
                pod: pod.metadata.name.clone(),
                uid: pod.metadata.uid.clone(),
                reason: DeleteReason::Outdated,
            });
            return plan;
        }
        if pod.is_terminating() {
            return plan.wait(Wait::Termination { ordinal });
        }
        if !pod.is_running_and_ready() {
            return plan.wait(Wait::Ready { ordinal });
        }
    }
    plan
}

fn condemn(ordinal: u32, pod: &Pod) -> Action {
    Action::Delete {
        ordinal,
        pod: pod.metadata.name.clone(),
        uid: pod.metadata.uid.clone(),
        reason: DeleteReason::Condemned,
    }
}
