//! UnifiedVolumeReplicationClass CRD
//!
//! Cluster-scoped configuration naming the storage provisioner and the
//! opaque backend parameters referenced by intents.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// UnifiedVolumeReplicationClass ties intents to a storage provisioner.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "replication.unified.io",
    version = "v1alpha1",
    kind = "UnifiedVolumeReplicationClass",
    plural = "unifiedvolumereplicationclasses",
    shortname = "uvrc",
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedVolumeReplicationClassSpec {
    /// CSI provisioner name (e.g. rbd.csi.ceph.com)
    pub provisioner: String,

    /// Backend-specific parameters, passed through untouched
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl UnifiedVolumeReplicationClass {
    /// Build a class in code (tests, standalone wiring)
    pub fn with_provisioner(name: &str, provisioner: &str) -> Self {
        Self::new(
            name,
            UnifiedVolumeReplicationClassSpec {
                provisioner: provisioner.to_string(),
                parameters: BTreeMap::new(),
            },
        )
    }

    /// Get the name of this class
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }
}
