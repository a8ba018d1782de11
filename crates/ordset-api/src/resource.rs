//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Trait shared by every stored object kind."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::meta::ObjectMeta;

/// An object kind the store can hold.
///
/// Stores use the hooks below to keep the spec and status sub-resources apart: a plain
/// update never changes status, and a status update never changes anything else.
pub trait Resource:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Kind name, used in owner references and error messages.
    const KIND: &'static str;

    /// Object metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// `namespace/name` key.
    fn key(&self) -> String {
        self.metadata().key()
    }

    /// Whether the desired-state part differs from `other`. Drives generation bumps.
    fn spec_differs(&self, _other: &Self) -> bool {
        false
    }

    /// Copy the status sub-resource from `other` into `self`.
    fn copy_status_from(&mut self, _other: &Self) {}

    /// Reject updates that mutate immutable fields.
    fn validate_update(&self, _previous: &Self) -> Result<(), String> {
        Ok(())
    }
}
