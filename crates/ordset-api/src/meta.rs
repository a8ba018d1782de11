//! ---
//! ordset_section: "02-object-model"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Common object metadata and owner references."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Build the `namespace/name` key used by caches and the work queue.
pub fn object_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Split a queue key back into namespace and name.
pub fn split_key(key: &str) -> Result<(String, String), StoreError> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((String::new(), name.to_owned())),
        (Some(namespace), Some(name), None) if !name.is_empty() => {
            Ok((namespace.to_owned(), name.to_owned()))
        }
        _ => Err(StoreError::invalid("key", key, "expected namespace/name")),
    }
}

/// Reference from a dependent object to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// Unique identity of the owner.
    pub uid: String,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
    /// Whether deletion of the owner waits on this dependent.
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Metadata carried by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within the namespace.
    pub name: String,
    /// Namespace the object lives in.
    #[serde(default)]
    pub namespace: String,
    /// Identity assigned by the store at creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Store-assigned version, bumped on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Incremented by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,
    /// Identifying labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owners of this object. At most one may be the controller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Set by the store on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set when graceful deletion has started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata with a name and namespace and nothing else.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Builder-style label assignment.
    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// `namespace/name` key.
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }

    /// The controller owner reference, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// True when the controller owner reference points at `uid`.
    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller_ref().map(|r| r.uid == uid).unwrap_or(false)
    }

    /// True once graceful deletion has started.
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_split() {
        let key = object_key("prod", "web");
        assert_eq!(key, "prod/web");
        assert_eq!(
            split_key(&key).unwrap(),
            ("prod".to_owned(), "web".to_owned())
        );
        assert_eq!(split_key("web").unwrap(), (String::new(), "web".to_owned()));
        assert!(split_key("a/b/c").is_err());
        assert!(split_key("prod/").is_err());
    }

    #[test]
    fn controller_ref_ignores_non_controller_owners() {
        let mut meta = ObjectMeta::new("ns", "web-0");
        meta.owner_references.push(OwnerReference {
            kind: "Thing".into(),
            name: "other".into(),
            uid: "u-1".into(),
            controller: false,
            block_owner_deletion: false,
        });
        assert!(meta.controller_ref().is_none());
        meta.owner_references.push(OwnerReference {
            kind: "OrdinalSet".into(),
            name: "web".into(),
            uid: "u-2".into(),
            controller: true,
            block_owner_deletion: true,
        });
        assert!(meta.is_controlled_by("u-2"));
        assert!(!meta.is_controlled_by("u-1"));
    }
}
