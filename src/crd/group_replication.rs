//! UnifiedVolumeGroupReplication CRD
//!
//! Same intent as UnifiedVolumeReplication, but addressed to every PVC in the
//! namespace that matches a label selector.

use crate::crd::replication::{ReplicationMode, ReplicationRole};
use crate::crd::status::ReplicationStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// UnifiedVolumeGroupReplication manages a set of volumes as one unit.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.unified.io",
    version = "v1alpha1",
    kind = "UnifiedVolumeGroupReplication",
    plural = "unifiedvolumegroupreplications",
    shortname = "uvgr",
    status = "GroupReplicationStatus",
    namespaced,
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.replicationClass"}"#,
    printcolumn = r#"{"name": "Desired", "type": "string", "jsonPath": ".spec.replicationState"}"#,
    printcolumn = r#"{"name": "Observed", "type": "string", "jsonPath": ".status.observedRole"}"#,
    printcolumn = r#"{"name": "Backend", "type": "string", "jsonPath": ".status.observedBackend"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedVolumeGroupReplicationSpec {
    /// Name of the cluster-scoped UnifiedVolumeReplicationClass
    pub replication_class: String,

    /// Selects the member PVCs in the same namespace
    pub selector: LabelSelector,

    /// Desired role for every member
    pub replication_state: ReplicationRole,

    /// Consistency mode
    #[serde(default)]
    pub replication_mode: ReplicationMode,

    /// Resync automatically after a split-brain
    #[serde(default)]
    pub auto_resync: Option<bool>,
}

/// Status of a group intent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupReplicationStatus {
    #[serde(flatten)]
    pub replication: ReplicationStatus,

    /// PVC names matched at the last pass, sorted by name
    #[serde(default)]
    pub persistent_volume_claims_ref_list: Vec<String>,
}
