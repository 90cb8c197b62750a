//! PowerStore Replication Adapter
//!
//! Drives Dell PowerStore replication through `DellCSIReplicationGroup`
//! objects. PowerStore replicates protection groups natively, so a group
//! intent maps to one object carrying every member volume.

use super::{group_object_name, observe, owned_object, StatusPaths};
use crate::controlplane::translation::{to_backend_mode, to_backend_state};
use crate::domain::ports::{
    BackendKind, BackendObjectStoreRef, NativeApi, ObservedReplication, ReplicationAdapter,
    ReplicationRequest, ReplicationTarget,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

/// Dell CSI replication group resource
pub const POWERSTORE_REPLICATION_GROUP: NativeApi = NativeApi {
    group: "replication.storage.dell.com",
    version: "v1",
    kind: "DellCSIReplicationGroup",
    plural: "dellcsireplicationgroups",
};

const PATHS: StatusPaths = StatusPaths {
    state: "/replicationLinkState/state",
    spec_state: "/action",
    last_sync_time: Some("/replicationLinkState/lastSuccessfulUpdate"),
    last_sync_duration: None,
};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for PowerStore adapter
#[derive(Debug, Clone)]
pub struct PowerStoreConfig {
    /// Class parameter naming the remote PowerStore system
    pub remote_system_key: String,
    /// Class parameter holding the recovery point objective
    pub rpo_key: String,
    /// RPO used when the class does not set one
    pub default_rpo: String,
}

impl Default for PowerStoreConfig {
    fn default() -> Self {
        Self {
            remote_system_key: "remoteSystem".to_string(),
            rpo_key: "rpo".to_string(),
            default_rpo: "Five_Minutes".to_string(),
        }
    }
}

// =============================================================================
// PowerStore Adapter
// =============================================================================

/// Adapter for Dell PowerStore
pub struct PowerStoreAdapter {
    config: PowerStoreConfig,
    store: BackendObjectStoreRef,
}

impl PowerStoreAdapter {
    /// Create a new PowerStore adapter
    pub fn new(config: PowerStoreConfig, store: BackendObjectStoreRef) -> Self {
        Self { config, store }
    }

    /// Volume and group intents share one native kind, so group-owned
    /// objects get a name of their own
    fn object_name(target: &ReplicationTarget) -> String {
        if target.grouped {
            group_object_name(target, None)
        } else {
            target.name.clone()
        }
    }
}

#[async_trait]
impl ReplicationAdapter for PowerStoreAdapter {
    async fn reconcile(&self, request: &ReplicationRequest) -> Result<ObservedReplication> {
        if request.volumes.is_empty() {
            return Err(Error::BackendOperationFailed {
                backend: "powerstore".into(),
                operation: "reconcile".into(),
                reason: "request carries no volume".into(),
            });
        }

        let rpo = request
            .parameters
            .get(&self.config.rpo_key)
            .unwrap_or(&self.config.default_rpo);

        let mut spec = json!({
            "action": to_backend_state(BackendKind::PowerStore, request.role),
            "mode": to_backend_mode(BackendKind::PowerStore, request.mode),
            "rpo": rpo,
            "volumes": request.volumes,
        });
        if let Some(remote) = request.parameters.get(&self.config.remote_system_key) {
            spec["remoteSystem"] = json!(remote);
        }

        let object = owned_object(
            POWERSTORE_REPLICATION_GROUP,
            &request.target,
            Self::object_name(&request.target),
            spec,
        );
        debug!(
            "Applying DellCSIReplicationGroup {}/{} with {} volume(s)",
            object.namespace,
            object.name,
            request.volumes.len()
        );
        let stored = self.store.apply(object).await?;

        Ok(observe(BackendKind::PowerStore, &stored, &PATHS))
    }

    async fn delete(&self, target: &ReplicationTarget) -> Result<()> {
        let name = Self::object_name(target);
        if self
            .store
            .delete(&POWERSTORE_REPLICATION_GROUP, &target.namespace, &name)
            .await?
        {
            info!("Deleted DellCSIReplicationGroup {}/{}", target.namespace, name);
        }
        Ok(())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::PowerStore
    }
}
