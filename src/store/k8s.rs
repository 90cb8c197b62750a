//! Kubernetes-backed stores
//!
//! Backend-native objects are written as `DynamicObject`s with server-side
//! apply; intents and classes go through typed `kube::Api` handles.

use crate::crd::{
    selector, GroupReplicationStatus, ReplicationStatus, UnifiedVolumeGroupReplication,
    UnifiedVolumeReplication, UnifiedVolumeReplicationClass,
};
use crate::domain::ports::{
    BackendObjectStore, IntentKey, IntentKind, NativeApi, NativeObject, ReplicationStore,
    MANAGED_BY,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams,
};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// Render a label map as an equality-based selector
fn label_query(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Swallow 404 responses
fn ignore_not_found<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result.map_err(Error::from) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Backend Object Store
// =============================================================================

/// Backend object store talking to the API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
    field_manager: String,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: MANAGED_BY.to_string(),
        }
    }

    fn api(&self, api: &NativeApi, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(api.group, api.version, api.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, api.plural);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    fn to_native(api: &NativeApi, object: DynamicObject) -> NativeObject {
        NativeObject {
            api: *api,
            namespace: object.metadata.namespace.clone().unwrap_or_default(),
            name: object.name_any(),
            labels: object.metadata.labels.clone().unwrap_or_default(),
            spec: object.data.get("spec").cloned().unwrap_or(Value::Null),
            status: object.data.get("status").cloned(),
        }
    }
}

#[async_trait]
impl BackendObjectStore for KubeObjectStore {
    async fn get(&self, api: &NativeApi, namespace: &str, name: &str) -> Result<Option<NativeObject>> {
        let object = self.api(api, namespace).get_opt(name).await?;
        Ok(object.map(|o| Self::to_native(api, o)))
    }

    async fn apply(&self, object: NativeObject) -> Result<NativeObject> {
        let body = json!({
            "apiVersion": object.api.api_version(),
            "kind": object.api.kind,
            "metadata": {
                "name": object.name,
                "namespace": object.namespace,
                "labels": object.labels,
            },
            "spec": object.spec,
        });

        debug!("Server-side apply {} {}/{}", object.api, object.namespace, object.name);
        let params = PatchParams::apply(&self.field_manager).force();
        let applied = self
            .api(&object.api, &object.namespace)
            .patch(&object.name, &params, &Patch::Apply(&body))
            .await?;

        Ok(Self::to_native(&object.api, applied))
    }

    async fn delete(&self, api: &NativeApi, namespace: &str, name: &str) -> Result<bool> {
        let deleted = ignore_not_found(
            self.api(api, namespace)
                .delete(name, &DeleteParams::default())
                .await,
        )?;
        Ok(deleted.is_some())
    }

    async fn list(
        &self,
        api: &NativeApi,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NativeObject>> {
        let params = ListParams::default().labels(&label_query(labels));
        let list = self.api(api, namespace).list(&params).await?;
        Ok(list
            .items
            .into_iter()
            .map(|o| Self::to_native(api, o))
            .collect())
    }
}

// =============================================================================
// Replication Store
// =============================================================================

/// Cluster store talking to the API server
#[derive(Clone)]
pub struct KubeReplicationStore {
    client: Client,
}

impl KubeReplicationStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, key: &IntentKey) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &key.namespace)
    }

    async fn patch_metadata<K>(&self, key: &IntentKey, patch: &Value) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = self.namespaced(key);
        // The object may already be gone once the last finalizer is dropped
        ignore_not_found(
            api.patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
                .await,
        )?;
        Ok(())
    }

    async fn patch_status<K, S>(&self, key: &IntentKey, status: &S) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
        S: Serialize,
    {
        let api: Api<K> = self.namespaced(key);
        let patch = json!({ "status": status });
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReplicationStore for KubeReplicationStore {
    async fn get_class(&self, name: &str) -> Result<Option<UnifiedVolumeReplicationClass>> {
        let api: Api<UnifiedVolumeReplicationClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_volumes(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<String>> {
        let query = selector::to_query(selector)?;
        let mut params = ListParams::default();
        if !query.is_empty() {
            params = params.labels(&query);
        }

        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&params).await?;
        Ok(list.items.iter().map(|pvc| pvc.name_any()).collect())
    }

    async fn set_finalizers(
        &self,
        key: &IntentKey,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<()> {
        // A resourceVersion in the patch makes the API server reject it with
        // 409 if the object changed since it was read
        let mut metadata = json!({ "finalizers": finalizers });
        if let Some(version) = resource_version {
            metadata["resourceVersion"] = json!(version);
        }
        let patch = json!({ "metadata": metadata });
        match key.kind {
            IntentKind::Volume => self.patch_metadata::<UnifiedVolumeReplication>(key, &patch).await,
            IntentKind::Group => {
                self.patch_metadata::<UnifiedVolumeGroupReplication>(key, &patch)
                    .await
            }
        }
    }

    async fn patch_volume_status(&self, key: &IntentKey, status: &ReplicationStatus) -> Result<()> {
        self.patch_status::<UnifiedVolumeReplication, _>(key, status).await
    }

    async fn patch_group_status(&self, key: &IntentKey, status: &GroupReplicationStatus) -> Result<()> {
        self.patch_status::<UnifiedVolumeGroupReplication, _>(key, status)
            .await
    }
}
