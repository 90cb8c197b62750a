//! In-memory stores
//!
//! Stand-ins for the API server used by tests. They follow the API server
//! semantics the reconcilers rely on: apply keeps a published status, and a
//! deleted object is erased once its last finalizer is removed.

use crate::crd::{
    selector, GroupReplicationStatus, ReplicationStatus, UnifiedVolumeGroupReplication,
    UnifiedVolumeGroupReplicationSpec, UnifiedVolumeReplication, UnifiedVolumeReplicationClass,
    UnifiedVolumeReplicationSpec,
};
use crate::domain::ports::{
    BackendObjectStore, IntentKey, IntentKind, NativeApi, NativeObject, ReplicationStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, Time};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

type ObjectKey = (NativeApi, String, String);
type NamespacedName = (String, String);

// =============================================================================
// Backend Object Store
// =============================================================================

/// In-memory backend object store with fault injection
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, NativeObject>>,
    /// When set, every call fails with this reason
    failure: RwLock<Option<String>>,
    applies: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until [`clear_failure`](Self::clear_failure)
    pub async fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write().await = Some(reason.into());
    }

    pub async fn clear_failure(&self) {
        *self.failure.write().await = None;
    }

    /// Publish a status on an object, as the backend controller would
    pub async fn set_status(
        &self,
        api: &NativeApi,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<()> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(&(*api, namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: api.kind.to_string(),
                name: name.to_string(),
            })?;
        object.status = Some(status);
        Ok(())
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Every stored object
    pub async fn objects(&self) -> Vec<NativeObject> {
        self.objects.read().await.values().cloned().collect()
    }

    /// Number of apply calls, failed ones included
    pub fn apply_calls(&self) -> u64 {
        self.applies.load(Ordering::Relaxed)
    }

    /// Number of delete calls, failed ones included
    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    async fn check_failure(&self, operation: &str) -> Result<()> {
        match self.failure.read().await.as_ref() {
            Some(reason) => Err(Error::BackendOperationFailed {
                backend: "memory".into(),
                operation: operation.into(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendObjectStore for InMemoryObjectStore {
    async fn get(&self, api: &NativeApi, namespace: &str, name: &str) -> Result<Option<NativeObject>> {
        self.check_failure("get").await?;
        Ok(self
            .objects
            .read()
            .await
            .get(&(*api, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn apply(&self, mut object: NativeObject) -> Result<NativeObject> {
        self.applies.fetch_add(1, Ordering::Relaxed);
        self.check_failure("apply").await?;

        let key = (object.api, object.namespace.clone(), object.name.clone());
        let mut objects = self.objects.write().await;
        if let Some(existing) = objects.get(&key) {
            object.status = existing.status.clone();
        }
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(&self, api: &NativeApi, namespace: &str, name: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_failure("delete").await?;
        Ok(self
            .objects
            .write()
            .await
            .remove(&(*api, namespace.to_string(), name.to_string()))
            .is_some())
    }

    async fn list(
        &self,
        api: &NativeApi,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NativeObject>> {
        self.check_failure("list").await?;
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|o| o.api == *api && o.namespace == namespace)
            .filter(|o| labels.iter().all(|(k, v)| o.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Replication Store
// =============================================================================

/// In-memory cluster state: classes, PVC labels, and both intent kinds
#[derive(Default)]
pub struct InMemoryReplicationStore {
    classes: RwLock<BTreeMap<String, UnifiedVolumeReplicationClass>>,
    volumes: RwLock<BTreeMap<NamespacedName, BTreeMap<String, String>>>,
    volume_intents: RwLock<BTreeMap<NamespacedName, UnifiedVolumeReplication>>,
    group_intents: RwLock<BTreeMap<NamespacedName, UnifiedVolumeGroupReplication>>,
}

fn namespaced(namespace: &str, name: &str) -> NamespacedName {
    (namespace.to_string(), name.to_string())
}

fn not_found(key: &IntentKey) -> Error {
    Error::ResourceNotFound {
        kind: key.kind.to_string(),
        name: format!("{}/{}", key.namespace, key.name),
    }
}

/// Advance the resourceVersion, as the API server does on every write
fn bump(meta: &mut ObjectMeta) {
    let version = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    meta.resource_version = Some((version + 1).to_string());
}

/// Reject a write made against a stale copy
fn check_version(key: &IntentKey, meta: &ObjectMeta, expected: Option<&str>) -> Result<()> {
    match expected {
        Some(expected) if meta.resource_version.as_deref() != Some(expected) => {
            Err(Error::Conflict {
                kind: key.kind.to_string(),
                name: format!("{}/{}", key.namespace, key.name),
                expected: expected.to_string(),
            })
        }
        _ => Ok(()),
    }
}

impl InMemoryReplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_class(&self, class: UnifiedVolumeReplicationClass) {
        self.classes
            .write()
            .await
            .insert(class.name().to_string(), class);
    }

    pub async fn remove_class(&self, name: &str) {
        self.classes.write().await.remove(name);
    }

    /// Register a PVC with its labels
    pub async fn insert_volume(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.volumes
            .write()
            .await
            .insert(namespaced(namespace, name), labels);
    }

    /// Store a volume intent; generation and resourceVersion default to 1
    pub async fn insert_volume_intent(&self, mut intent: UnifiedVolumeReplication) {
        intent.metadata.generation.get_or_insert(1);
        intent.metadata.resource_version.get_or_insert_with(|| "1".to_string());
        let key = namespaced(
            intent.metadata.namespace.as_deref().unwrap_or_default(),
            intent.metadata.name.as_deref().unwrap_or_default(),
        );
        self.volume_intents.write().await.insert(key, intent);
    }

    pub async fn volume_intent(&self, namespace: &str, name: &str) -> Option<UnifiedVolumeReplication> {
        self.volume_intents
            .read()
            .await
            .get(&namespaced(namespace, name))
            .cloned()
    }

    /// Mutate a volume intent's spec, bumping its generation
    pub async fn update_volume_intent(
        &self,
        namespace: &str,
        name: &str,
        update: impl FnOnce(&mut UnifiedVolumeReplicationSpec),
    ) {
        if let Some(intent) = self
            .volume_intents
            .write()
            .await
            .get_mut(&namespaced(namespace, name))
        {
            update(&mut intent.spec);
            intent.metadata.generation = Some(intent.metadata.generation.unwrap_or(0) + 1);
            bump(&mut intent.metadata);
        }
    }

    /// Request deletion of a volume intent. Erased at once without finalizers.
    pub async fn delete_volume_intent(&self, namespace: &str, name: &str) {
        let mut intents = self.volume_intents.write().await;
        let key = namespaced(namespace, name);
        let erase = match intents.get_mut(&key) {
            Some(intent) => {
                intent.metadata.deletion_timestamp = Some(Time(Utc::now()));
                bump(&mut intent.metadata);
                intent.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty())
            }
            None => false,
        };
        if erase {
            intents.remove(&key);
        }
    }

    /// Store a group intent; generation and resourceVersion default to 1
    pub async fn insert_group_intent(&self, mut intent: UnifiedVolumeGroupReplication) {
        intent.metadata.generation.get_or_insert(1);
        intent.metadata.resource_version.get_or_insert_with(|| "1".to_string());
        let key = namespaced(
            intent.metadata.namespace.as_deref().unwrap_or_default(),
            intent.metadata.name.as_deref().unwrap_or_default(),
        );
        self.group_intents.write().await.insert(key, intent);
    }

    pub async fn group_intent(&self, namespace: &str, name: &str) -> Option<UnifiedVolumeGroupReplication> {
        self.group_intents
            .read()
            .await
            .get(&namespaced(namespace, name))
            .cloned()
    }

    /// Mutate a group intent's spec, bumping its generation
    pub async fn update_group_intent(
        &self,
        namespace: &str,
        name: &str,
        update: impl FnOnce(&mut UnifiedVolumeGroupReplicationSpec),
    ) {
        if let Some(intent) = self
            .group_intents
            .write()
            .await
            .get_mut(&namespaced(namespace, name))
        {
            update(&mut intent.spec);
            intent.metadata.generation = Some(intent.metadata.generation.unwrap_or(0) + 1);
            bump(&mut intent.metadata);
        }
    }

    /// Request deletion of a group intent. Erased at once without finalizers.
    pub async fn delete_group_intent(&self, namespace: &str, name: &str) {
        let mut intents = self.group_intents.write().await;
        let key = namespaced(namespace, name);
        let erase = match intents.get_mut(&key) {
            Some(intent) => {
                intent.metadata.deletion_timestamp = Some(Time(Utc::now()));
                bump(&mut intent.metadata);
                intent.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty())
            }
            None => false,
        };
        if erase {
            intents.remove(&key);
        }
    }
}

#[async_trait]
impl ReplicationStore for InMemoryReplicationStore {
    async fn get_class(&self, name: &str) -> Result<Option<UnifiedVolumeReplicationClass>> {
        Ok(self.classes.read().await.get(name).cloned())
    }

    async fn list_volumes(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<String>> {
        let volumes = self.volumes.read().await;
        let mut matched = Vec::new();
        for ((ns, name), labels) in volumes.iter() {
            if ns == namespace && selector::matches(selector, labels)? {
                matched.push(name.clone());
            }
        }
        Ok(matched)
    }

    async fn set_finalizers(
        &self,
        key: &IntentKey,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<()> {
        let id = namespaced(&key.namespace, &key.name);
        match key.kind {
            IntentKind::Volume => {
                let mut intents = self.volume_intents.write().await;
                let intent = intents.get_mut(&id).ok_or_else(|| not_found(key))?;
                check_version(key, &intent.metadata, resource_version)?;
                intent.metadata.finalizers = Some(finalizers.to_vec());
                bump(&mut intent.metadata);
                if intent.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
                    intents.remove(&id);
                }
            }
            IntentKind::Group => {
                let mut intents = self.group_intents.write().await;
                let intent = intents.get_mut(&id).ok_or_else(|| not_found(key))?;
                check_version(key, &intent.metadata, resource_version)?;
                intent.metadata.finalizers = Some(finalizers.to_vec());
                bump(&mut intent.metadata);
                if intent.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
                    intents.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn patch_volume_status(&self, key: &IntentKey, status: &ReplicationStatus) -> Result<()> {
        let mut intents = self.volume_intents.write().await;
        let intent = intents
            .get_mut(&namespaced(&key.namespace, &key.name))
            .ok_or_else(|| not_found(key))?;
        intent.status = Some(status.clone());
        bump(&mut intent.metadata);
        Ok(())
    }

    async fn patch_group_status(&self, key: &IntentKey, status: &GroupReplicationStatus) -> Result<()> {
        let mut intents = self.group_intents.write().await;
        let intent = intents
            .get_mut(&namespaced(&key.namespace, &key.name))
            .ok_or_else(|| not_found(key))?;
        intent.status = Some(status.clone());
        bump(&mut intent.metadata);
        Ok(())
    }
}
