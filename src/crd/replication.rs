//! UnifiedVolumeReplication CRD
//!
//! Declares the desired replication role of a single PersistentVolumeClaim,
//! independent of the storage backend that ends up serving it.

use crate::crd::status::ReplicationStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// UnifiedVolumeReplication CRD
// =============================================================================

/// UnifiedVolumeReplication declares the replication role one volume should
/// have. The backend is derived from the referenced replication class.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.unified.io",
    version = "v1alpha1",
    kind = "UnifiedVolumeReplication",
    plural = "unifiedvolumereplications",
    shortname = "uvr",
    status = "ReplicationStatus",
    namespaced,
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.replicationClass"}"#,
    printcolumn = r#"{"name": "PVC", "type": "string", "jsonPath": ".spec.persistentVolumeClaim"}"#,
    printcolumn = r#"{"name": "Desired", "type": "string", "jsonPath": ".spec.replicationState"}"#,
    printcolumn = r#"{"name": "Observed", "type": "string", "jsonPath": ".status.observedRole"}"#,
    printcolumn = r#"{"name": "Backend", "type": "string", "jsonPath": ".status.observedBackend"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedVolumeReplicationSpec {
    /// Name of the cluster-scoped UnifiedVolumeReplicationClass
    pub replication_class: String,

    /// Name of the PVC in the same namespace
    pub persistent_volume_claim: String,

    /// Desired role
    pub replication_state: ReplicationRole,

    /// Consistency mode
    #[serde(default)]
    pub replication_mode: ReplicationMode,

    /// Resync automatically after a split-brain
    #[serde(default)]
    pub auto_resync: Option<bool>,
}

// =============================================================================
// Uniform Vocabulary
// =============================================================================

/// Uniform replication role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationRole {
    Primary,
    Secondary,
    Resync,
}

impl ReplicationRole {
    /// Every role, in declaration order
    pub const ALL: [ReplicationRole; 3] = [
        ReplicationRole::Primary,
        ReplicationRole::Secondary,
        ReplicationRole::Resync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationRole::Primary => "primary",
            ReplicationRole::Secondary => "secondary",
            ReplicationRole::Resync => "resync",
        }
    }
}

impl std::fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform replication consistency mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    Synchronous,
    #[default]
    Asynchronous,
    Eventual,
}

impl ReplicationMode {
    /// Every mode, in declaration order
    pub const ALL: [ReplicationMode; 3] = [
        ReplicationMode::Synchronous,
        ReplicationMode::Asynchronous,
        ReplicationMode::Eventual,
    ];
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::Synchronous => write!(f, "synchronous"),
            ReplicationMode::Asynchronous => write!(f, "asynchronous"),
            ReplicationMode::Eventual => write!(f, "eventual"),
        }
    }
}
