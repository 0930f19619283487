//! Object metadata shared by every stored resource.
//!
//! Mirrors the subset of Kubernetes `ObjectMeta` the controller relies on:
//! identity, optimistic-concurrency version, finalizers, the deletion marker,
//! labels and owner references.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::OwnerReferenceError;

/// Namespaced identity of an object (`namespace/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from an owned object to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    pub fn is_controller(&self) -> bool {
        self.controller.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Optimistic-concurrency token; every write must present the current value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set by the store when deletion was requested while finalizers remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn contains_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Adds the finalizer. Returns true if the set changed.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.contains_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Removes every occurrence of the finalizer. Returns true if the set changed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    /// The owner reference marked as controller, if any.
    pub fn controller_reference(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.is_controller())
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|r| r.uid == uid)
    }
}

/// A typed object kept in the state store.
///
/// Stored objects serialize to `{metadata, spec, status}`;
/// the store relies on the `spec` and `status` keys to separate the main
/// resource from the status sub-resource.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const API_VERSION: &'static str;
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Records `owner` as the managing controller of `object`.
///
/// Fails if the owner was never persisted, lives in another namespace, or the
/// object already has a different controller. Re-applying the same owner is a
/// no-op.
pub fn set_controller_reference<O: Resource, C: Resource>(
    owner: &O,
    object: &mut C,
) -> Result<(), OwnerReferenceError> {
    let owner_meta = owner.meta();
    let uid = owner_meta
        .uid
        .clone()
        .ok_or_else(|| OwnerReferenceError::MissingUid {
            kind: O::KIND.to_string(),
            key: owner_meta.key(),
        })?;

    let object_meta = object.meta_mut();
    if owner_meta.namespace != object_meta.namespace {
        return Err(OwnerReferenceError::NamespaceMismatch {
            owner_namespace: owner_meta.namespace.clone(),
            object_namespace: object_meta.namespace.clone(),
        });
    }

    if let Some(existing) = object_meta.controller_reference()
        && existing.uid != uid
    {
        return Err(OwnerReferenceError::AlreadyOwned {
            object: object_meta.key(),
            kind: existing.kind.clone(),
            name: existing.name.clone(),
        });
    }

    let reference = OwnerReference {
        api_version: O::API_VERSION.to_string(),
        kind: O::KIND.to_string(),
        name: owner_meta.name.clone(),
        uid: uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    object_meta.owner_references.retain(|r| r.uid != uid);
    object_meta.owner_references.push(reference);
    Ok(())
}
