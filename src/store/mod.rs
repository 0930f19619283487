//! State-store client abstraction.
//!
//! The reconciler talks to the store only through [`Client`]. Every write is
//! optimistic: the caller presents the `resourceVersion` it observed and the
//! store rejects the write with [`StoreError::Conflict`] if the object moved on.
//! The status sub-resource is written separately through
//! [`Client::update_status`].

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::api::{ObjectKey, OwnerReference, Resource};
use crate::errors::StoreError;

pub use memory::InMemoryStore;

/// Kind of change reported on the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change notification for one stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub kind: String,
    pub key: ObjectKey,
    /// Controller reference of the changed object, used to route child
    /// events to their owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<OwnerReference>,
}

/// Abstraction over the shared state store.
/// Real implementations talk to a cluster API; [`InMemoryStore`] is the
/// reference implementation used by the CLI host and tests.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    async fn get<K: Resource>(&self, key: &ObjectKey) -> Result<K, StoreError>;

    /// All objects of kind `K`, optionally restricted to one namespace, sorted by key.
    async fn list<K: Resource>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] if an object with the same key exists.
    async fn create<K: Resource>(&self, object: &K) -> Result<K, StoreError>;

    /// Writes metadata and spec. Status changes in `object` are ignored.
    async fn update<K: Resource>(&self, object: &K) -> Result<K, StoreError>;

    /// Writes the status sub-resource. Spec and metadata changes are ignored.
    async fn update_status<K: Resource>(&self, object: &K) -> Result<K, StoreError>;

    /// Requests deletion. Objects with finalizers only get a deletion marker.
    async fn delete<K: Resource>(&self, key: &ObjectKey) -> Result<(), StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;

    /// Resolves once the client's view of the store is complete.
    async fn wait_for_sync(&self) -> Result<(), StoreError>;
}
