//! In-memory state store with cluster-like semantics.
//!
//! Objects are held as JSON documents keyed by kind and namespaced name. The
//! store assigns uids and a store-wide monotonically increasing
//! `resourceVersion`, enforces optimistic concurrency on every write, honours
//! finalizers on deletion and garbage-collects objects whose owner was removed.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use super::{Client, WatchEvent, WatchEventType};
use crate::api::{ObjectKey, ObjectMeta, Resource};
use crate::errors::StoreError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

type StoreKey = (String, ObjectKey);

pub struct InMemoryStore {
    objects: DashMap<StoreKey, Value>,
    revision: AtomicU64,
    writes: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            objects: DashMap::new(),
            revision: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            events,
        }
    }

    /// Number of successful writes (create, update, status update, delete
    /// marker, removal) since the store was created. No-op writes are not
    /// counted.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects of the given kind.
    pub fn count(&self, kind: &str) -> usize {
        self.objects.iter().filter(|e| e.key().0 == kind).count()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, event_type: WatchEventType, kind: &str, meta: &ObjectMeta) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(WatchEvent {
            event_type,
            kind: kind.to_string(),
            key: meta.key(),
            controller: meta.controller_reference().cloned(),
        });
    }

    /// Deletes one object, honouring finalizers, then cascades to dependents
    /// if it was physically removed.
    fn delete_entry(&self, id: &StoreKey) -> Result<(), StoreError> {
        let removed = {
            let Some(mut entry) = self.objects.get_mut(id) else {
                return Err(StoreError::NotFound {
                    kind: id.0.clone(),
                    key: id.1.clone(),
                });
            };
            let mut meta = meta_of(entry.value(), &id.0)?;
            if !meta.finalizers.is_empty() {
                if meta.deletion_timestamp.is_none() {
                    meta.deletion_timestamp = Some(Utc::now());
                    meta.resource_version = Some(self.next_revision());
                    set_meta(entry.value_mut(), &meta)?;
                    self.record_write();
                    self.emit(WatchEventType::Modified, &id.0, &meta);
                    debug!(kind = %id.0, key = %id.1, "Marked object for deletion");
                }
                None
            } else {
                Some(meta)
            }
        };

        if let Some(meta) = removed {
            self.remove_entry(id, &meta);
        }
        Ok(())
    }

    /// Physically removes an object and garbage-collects its dependents.
    fn remove_entry(&self, id: &StoreKey, meta: &ObjectMeta) {
        if self.objects.remove(id).is_none() {
            return;
        }
        self.record_write();
        self.emit(WatchEventType::Deleted, &id.0, meta);
        debug!(kind = %id.0, key = %id.1, "Removed object");

        let Some(uid) = meta.uid.as_deref() else {
            return;
        };
        let dependents: Vec<StoreKey> = self
            .objects
            .iter()
            .filter(|entry| {
                meta_of(entry.value(), &entry.key().0)
                    .map(|m| m.is_owned_by(uid))
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for dependent in dependents {
            // A dependent may already be gone through another cascade path.
            let _ = self.delete_entry(&dependent);
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn meta_of(value: &Value, kind: &str) -> Result<ObjectMeta, StoreError> {
    let metadata = value.get("metadata").cloned().ok_or_else(|| StoreError::Invalid {
        kind: kind.to_string(),
        message: "missing metadata".to_string(),
    })?;
    Ok(serde_json::from_value(metadata)?)
}

fn set_meta(value: &mut Value, meta: &ObjectMeta) -> Result<(), StoreError> {
    let metadata = serde_json::to_value(meta)?;
    if let Value::Object(map) = value {
        map.insert("metadata".to_string(), metadata);
    }
    Ok(())
}

fn section(value: &Value, name: &str) -> Value {
    value
        .get(name)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn set_section(value: &mut Value, name: &str, section: Value) {
    if let Value::Object(map) = value {
        map.insert(name.to_string(), section);
    }
}

fn to_document<K: Resource>(object: &K) -> Result<Value, StoreError> {
    let value = serde_json::to_value(object)?;
    if !value.is_object() {
        return Err(StoreError::Invalid {
            kind: K::KIND.to_string(),
            message: "object must serialize to a JSON object".to_string(),
        });
    }
    Ok(value)
}

fn check_version(
    kind: &str,
    key: &ObjectKey,
    stored: &ObjectMeta,
    observed: &ObjectMeta,
) -> Result<(), StoreError> {
    let Some(observed_version) = observed.resource_version.as_deref() else {
        return Err(StoreError::Invalid {
            kind: kind.to_string(),
            message: format!("resourceVersion must be specified to update {}", key),
        });
    };
    let current = stored.resource_version.as_deref().unwrap_or_default();
    if observed_version != current {
        return Err(StoreError::Conflict {
            kind: kind.to_string(),
            key: key.clone(),
            observed: observed_version.to_string(),
            current: current.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Client for InMemoryStore {
    async fn get<K: Resource>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let id = (K::KIND.to_string(), key.clone());
        let value = self
            .objects
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: K::KIND.to_string(),
                key: key.clone(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list<K: Resource>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        let mut values: Vec<(ObjectKey, Value)> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == K::KIND)
            .filter(|entry| namespace.is_none_or(|ns| entry.key().1.namespace == ns))
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    async fn create<K: Resource>(&self, object: &K) -> Result<K, StoreError> {
        let mut meta = object.meta().clone();
        if meta.name.is_empty() {
            return Err(StoreError::Invalid {
                kind: K::KIND.to_string(),
                message: "metadata.name is required".to_string(),
            });
        }
        let key = meta.key();
        let id = (K::KIND.to_string(), key.clone());

        let mut document = to_document(object)?;
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;

        let stored = match self.objects.entry(id) {
            Entry::Occupied(_) => {
                return Err(StoreError::AlreadyExists {
                    kind: K::KIND.to_string(),
                    key,
                });
            }
            Entry::Vacant(vacant) => {
                meta.resource_version = Some(self.next_revision());
                set_meta(&mut document, &meta)?;
                // Status is a sub-resource; it cannot be set on create.
                set_section(&mut document, "status", Value::Object(Map::new()));
                vacant.insert(document.clone());
                document
            }
        };

        self.record_write();
        self.emit(WatchEventType::Added, K::KIND, &meta);
        Ok(serde_json::from_value(stored)?)
    }

    async fn update<K: Resource>(&self, object: &K) -> Result<K, StoreError> {
        let key = object.key();
        let id = (K::KIND.to_string(), key.clone());
        let incoming = to_document(object)?;

        let (stored, meta) = {
            let Some(mut entry) = self.objects.get_mut(&id) else {
                return Err(StoreError::NotFound {
                    kind: K::KIND.to_string(),
                    key,
                });
            };
            let current_meta = meta_of(entry.value(), K::KIND)?;
            check_version(K::KIND, &key, &current_meta, object.meta())?;

            let mut meta = object.meta().clone();
            meta.uid = current_meta.uid.clone();
            meta.creation_timestamp = current_meta.creation_timestamp;
            meta.deletion_timestamp = current_meta.deletion_timestamp;

            let mut candidate = incoming;
            set_section(&mut candidate, "status", section(entry.value(), "status"));
            set_meta(&mut candidate, &meta)?;
            if &candidate == entry.value() {
                return Ok(serde_json::from_value(candidate)?);
            }

            meta.resource_version = Some(self.next_revision());
            set_meta(&mut candidate, &meta)?;
            *entry.value_mut() = candidate.clone();
            (candidate, meta)
        };

        self.record_write();
        if meta.is_deleting() && meta.finalizers.is_empty() {
            self.remove_entry(&id, &meta);
        } else {
            self.emit(WatchEventType::Modified, K::KIND, &meta);
        }
        Ok(serde_json::from_value(stored)?)
    }

    async fn update_status<K: Resource>(&self, object: &K) -> Result<K, StoreError> {
        let key = object.key();
        let id = (K::KIND.to_string(), key.clone());
        let incoming = to_document(object)?;

        let (stored, meta) = {
            let Some(mut entry) = self.objects.get_mut(&id) else {
                return Err(StoreError::NotFound {
                    kind: K::KIND.to_string(),
                    key,
                });
            };
            let mut meta = meta_of(entry.value(), K::KIND)?;
            check_version(K::KIND, &key, &meta, object.meta())?;

            let mut candidate = entry.value().clone();
            set_section(&mut candidate, "status", section(&incoming, "status"));
            if &candidate == entry.value() {
                return Ok(serde_json::from_value(candidate)?);
            }

            meta.resource_version = Some(self.next_revision());
            set_meta(&mut candidate, &meta)?;
            *entry.value_mut() = candidate.clone();
            (candidate, meta)
        };

        self.record_write();
        self.emit(WatchEventType::Modified, K::KIND, &meta);
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: Resource>(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.delete_entry(&(K::KIND.to_string(), key.clone()))
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    async fn wait_for_sync(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
