//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Immutable pod-template snapshots."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;
use crate::resource::Resource;
use crate::workload::PodTemplate;

/// Label carrying the content hash a revision was named after.
pub const REVISION_HASH_LABEL: &str = "ordset.io/revision-hash";

/// Snapshot of a workload's pod template.
///
/// `data` is immutable once stored; only `revision` and metadata may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Captured template.
    pub data: PodTemplate,
    /// Sequence number, strictly increasing per workload.
    pub revision: i64,
}

impl Revision {
    /// Content hash recorded when the revision was created.
    pub fn hash(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(REVISION_HASH_LABEL)
            .map(String::as_str)
    }
}

impl Resource for Revision {
    const KIND: &'static str = "Revision";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate_update(&self, previous: &Self) -> Result<(), String> {
        if self.data != previous.data {
            return Err("revision data is immutable".to_owned());
        }
        Ok(())
    }
}
