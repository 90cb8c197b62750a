//! Trident Replication Adapter
//!
//! Drives NetApp SnapMirror through `TridentMirrorRelationship` objects.
//! Trident has no native volume grouping, so a group intent gets one
//! relationship per member volume and an aggregated status.

use super::{group_object_name, observe, owned_object, StatusPaths};
use crate::controlplane::translation::{to_backend_mode, to_backend_state};
use crate::domain::ports::{
    BackendKind, BackendObjectStoreRef, NativeApi, NativeObject, ObservedReplication,
    ReplicationAdapter, ReplicationRequest, ReplicationTarget,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Trident mirror relationship resource
pub const TRIDENT_MIRROR_RELATIONSHIP: NativeApi = NativeApi {
    group: "trident.netapp.io",
    version: "v1",
    kind: "TridentMirrorRelationship",
    plural: "tridentmirrorrelationships",
};

const PATHS: StatusPaths = StatusPaths {
    state: "/conditions/0/state",
    spec_state: "/state",
    last_sync_time: Some("/conditions/0/lastTransferTime"),
    last_sync_duration: None,
};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for Trident adapter
#[derive(Debug, Clone)]
pub struct TridentConfig {
    /// Class parameter holding the remote volume handle
    pub remote_volume_key: String,
    /// Class parameter holding the SnapMirror schedule
    pub schedule_key: String,
}

impl Default for TridentConfig {
    fn default() -> Self {
        Self {
            remote_volume_key: "remoteVolumeHandle".to_string(),
            schedule_key: "replicationSchedule".to_string(),
        }
    }
}

// =============================================================================
// Trident Adapter
// =============================================================================

/// Adapter for NetApp Trident
pub struct TridentAdapter {
    config: TridentConfig,
    store: BackendObjectStoreRef,
}

impl TridentAdapter {
    /// Create a new Trident adapter
    pub fn new(config: TridentConfig, store: BackendObjectStoreRef) -> Self {
        Self { config, store }
    }

    /// Relationship name for one volume of the target
    fn relationship_name(target: &ReplicationTarget, pvc: &str) -> String {
        if target.grouped {
            group_object_name(target, Some(pvc))
        } else {
            target.name.clone()
        }
    }

    fn relationship(&self, request: &ReplicationRequest, pvc: &str) -> NativeObject {
        let mut mapping = json!({ "localPVCName": pvc });
        if let Some(remote) = request.parameters.get(&self.config.remote_volume_key) {
            mapping["remoteVolumeHandle"] = json!(remote);
        }

        let mut spec = json!({
            "state": to_backend_state(BackendKind::Trident, request.role),
            "replicationPolicy": to_backend_mode(BackendKind::Trident, request.mode),
            "volumeMappings": [mapping],
        });
        if let Some(schedule) = request.parameters.get(&self.config.schedule_key) {
            spec["replicationSchedule"] = json!(schedule);
        }

        owned_object(
            TRIDENT_MIRROR_RELATIONSHIP,
            &request.target,
            Self::relationship_name(&request.target, pvc),
            spec,
        )
    }

    /// Delete relationships owned by `target` that are not in `keep`
    async fn prune(&self, target: &ReplicationTarget, keep: &BTreeSet<String>) -> Result<()> {
        let owned = self
            .store
            .list(&TRIDENT_MIRROR_RELATIONSHIP, &target.namespace, &target.owner_labels())
            .await?;

        for object in owned.iter().filter(|o| !keep.contains(&o.name)) {
            info!(
                "Removing Trident relationship {}/{} (volume left the group)",
                object.namespace, object.name
            );
            self.store
                .delete(&TRIDENT_MIRROR_RELATIONSHIP, &object.namespace, &object.name)
                .await?;
        }
        Ok(())
    }
}

/// Combine per-volume observations into one.
///
/// A role is reported only when every member reports the same role.
fn aggregate(observations: Vec<ObservedReplication>) -> ObservedReplication {
    let roles: BTreeSet<_> = observations.iter().map(|o| o.role.map(|r| r.as_str())).collect();
    let role = match (roles.len(), observations.first()) {
        (1, Some(first)) => first.role,
        _ => None,
    };

    let states: BTreeSet<String> = observations
        .iter()
        .filter_map(|o| o.native_state.clone())
        .collect();
    let native_state = match states.len() {
        0 => None,
        1 => states.into_iter().next(),
        _ => Some(format!("mixed({})", states.into_iter().collect::<Vec<_>>().join(","))),
    };

    // Oldest member sync bounds the group
    let last_sync_time = if observations.iter().all(|o| o.last_sync_time.is_some()) {
        observations.iter().filter_map(|o| o.last_sync_time).min()
    } else {
        None
    };

    ObservedReplication {
        role,
        native_state,
        objects: observations.into_iter().flat_map(|o| o.objects).collect(),
        last_sync_time,
        last_sync_duration: None,
    }
}

#[async_trait]
impl ReplicationAdapter for TridentAdapter {
    async fn reconcile(&self, request: &ReplicationRequest) -> Result<ObservedReplication> {
        if request.volumes.is_empty() {
            return Err(Error::BackendOperationFailed {
                backend: "trident".into(),
                operation: "reconcile".into(),
                reason: "request carries no volume".into(),
            });
        }

        let mut observations = Vec::with_capacity(request.volumes.len());
        let mut keep = BTreeSet::new();

        for pvc in &request.volumes {
            let object = self.relationship(request, pvc);
            debug!(
                "Applying TridentMirrorRelationship {}/{} (state {})",
                object.namespace,
                object.name,
                object.spec_str("/state").unwrap_or_default()
            );
            keep.insert(object.name.clone());
            let stored = self.store.apply(object).await?;
            observations.push(observe(BackendKind::Trident, &stored, &PATHS));
        }

        if !request.target.grouped {
            return Ok(observations.remove(0));
        }

        self.prune(&request.target, &keep).await?;
        Ok(aggregate(observations))
    }

    async fn delete(&self, target: &ReplicationTarget) -> Result<()> {
        if target.grouped {
            self.prune(target, &BTreeSet::new()).await?;
            return Ok(());
        }

        if self
            .store
            .delete(&TRIDENT_MIRROR_RELATIONSHIP, &target.namespace, &target.name)
            .await?
        {
            info!("Deleted TridentMirrorRelationship {}/{}", target.namespace, target.name);
        }
        Ok(())
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Trident
    }
}
