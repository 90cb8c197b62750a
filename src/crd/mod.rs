//! Custom Resource Definitions for the Unified Replication Operator
//!
//! This module contains all CRD types:
//! - UnifiedVolumeReplication: replication intent for one PVC
//! - UnifiedVolumeGroupReplication: replication intent for a labelled set of PVCs
//! - UnifiedVolumeReplicationClass: provisioner and backend parameters

pub mod group_replication;
pub mod replication;
pub mod replication_class;
pub mod selector;
pub mod status;

pub use group_replication::*;
pub use replication::*;
pub use replication_class::*;
pub use status::*;

use kube::CustomResourceExt;

/// Render every CRD manifest as a multi-document YAML stream
pub fn crd_manifests() -> crate::error::Result<String> {
    let crds = [
        UnifiedVolumeReplication::crd(),
        UnifiedVolumeGroupReplication::crd(),
        UnifiedVolumeReplicationClass::crd(),
    ];

    let mut out = String::new();
    for crd in crds {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| crate::error::Error::Internal(format!("CRD serialization failed: {}", e)))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_manifests_contain_all_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("kind: UnifiedVolumeReplication\n"));
        assert!(yaml.contains("kind: UnifiedVolumeGroupReplication\n"));
        assert!(yaml.contains("kind: UnifiedVolumeReplicationClass\n"));
        assert!(yaml.contains("scope: Cluster"));
        assert_eq!(yaml.matches("---\n").count(), 3);
    }
}
