//! Ceph Replication Adapter
//!
//! Drives RBD mirroring through csi-addons `VolumeReplication` objects, and
//! `VolumeGroupReplication` for groups (native grouping).

use super::{observe, owned_object, StatusPaths};
use crate::controlplane::translation::{to_backend_mode, to_backend_state};
use crate::domain::ports::{
    BackendKind, BackendObjectStoreRef, NativeApi, ObservedReplication, ReplicationAdapter,
    ReplicationRequest, ReplicationTarget,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

/// csi-addons single-volume replication resource
pub const CEPH_VOLUME_REPLICATION: NativeApi = NativeApi {
    group: "replication.storage.openshift.io",
    version: "v1alpha1",
    kind: "VolumeReplication",
    plural: "volumereplications",
};

/// csi-addons group replication resource
pub const CEPH_VOLUME_GROUP_REPLICATION: NativeApi = NativeApi {
    group: "replication.storage.openshift.io",
    version: "v1alpha1",
    kind: "VolumeGroupReplication",
    plural: "volumegroupreplications",
};

const PATHS: StatusPaths = StatusPaths {
    state: "/state",
    spec_state: "/replicationState",
    last_sync_time: Some("/lastSyncTime"),
    last_sync_duration: Some("/lastSyncDuration"),
};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for Ceph adapter
#[derive(Debug, Clone)]
pub struct CephConfig {
    /// Class parameter naming the native VolumeReplicationClass
    pub replication_class_key: String,
    /// Class parameter naming the native VolumeGroupReplicationClass
    pub group_replication_class_key: String,
}

impl Default for CephConfig {
    fn default() -> Self {
        Self {
            replication_class_key: "volumeReplicationClass".to_string(),
            group_replication_class_key: "volumeGroupReplicationClass".to_string(),
        }
    }
}

// =============================================================================
// Ceph Adapter
// =============================================================================

/// Adapter for Ceph RBD mirroring
pub struct CephAdapter {
    config: CephConfig,
    store: BackendObjectStoreRef,
}

impl CephAdapter {
    /// Create a new Ceph adapter
    pub fn new(config: CephConfig, store: BackendObjectStoreRef) -> Self {
        Self { config, store }
    }

    fn api(target: &ReplicationTarget) -> NativeApi {
        if target.grouped {
            CEPH_VOLUME_GROUP_REPLICATION
        } else {
            CEPH_VOLUME_REPLICATION
        }
    }

    /// Native class name; falls back to the uniform class name
    fn native_class(&self, request: &ReplicationRequest) -> String {
        let key = if request.target.grouped {
            &self.config.group_replication_class_key
        } else {
            &self.config.replication_class_key
        };
        request
            .parameters
            .get(key)
            .cloned()
            .unwrap_or_else(|| request.class_name.clone())
    }

    fn spec(&self, request: &ReplicationRequest) -> Result<serde_json::Value> {
        let state = to_backend_state(BackendKind::Ceph, request.role);
        let mode = to_backend_mode(BackendKind::Ceph, request.mode);

        if request.target.grouped {
            Ok(json!({
                "volumeGroupReplicationClassName": self.native_class(request),
                "replicationState": state,
                "mirroringMode": mode,
                "autoResync": request.auto_resync,
                "source": { "persistentVolumeClaims": request.volumes },
            }))
        } else {
            let pvc = request.volumes.first().ok_or_else(|| Error::BackendOperationFailed {
                backend: "ceph".into(),
                operation: "reconcile".into(),
                reason: "request carries no volume".into(),
            })?;
            Ok(json!({
                "volumeReplicationClass": self.native_class(request),
                "replicationState": state,
                "mirroringMode": mode,
                "autoResync": request.auto_resync,
                "dataSource": {
                    "apiGroup": "",
                    "kind": "PersistentVolumeClaim",
                    "name": pvc,
                },
            }))
        }
    }
}

#[async_trait]
impl ReplicationAdapter for CephAdapter {
    async fn reconcile(&self, request: &ReplicationRequest) -> Result<ObservedReplication> {
        let api = Self::api(&request.target);
        let object = owned_object(
            api,
            &request.target,
            request.target.name.clone(),
            self.spec(request)?,
        );

        debug!(
            "Applying Ceph {} {}/{} (state {})",
            api.kind,
            object.namespace,
            object.name,
            to_backend_state(BackendKind::Ceph, request.role)
        );
        let stored = self.store.apply(object).await?;

        Ok(observe(BackendKind::Ceph, &stored, &PATHS))
    }

    async fn delete(&self, target: &ReplicationTarget) -> Result<()> {
        let api = Self::api(target);
        if self.store.delete(&api, &target.namespace, &target.name).await? {
            info!("Deleted Ceph {} {}/{}", api.kind, target.namespace, target.name);
        } else {
            debug!("Ceph {} {}/{} already absent", api.kind, target.namespace, target.name);
        }
        Ok(())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Ceph
    }
}
