//! Storage Backend Adapters
//!
//! Provides replication adapters for different storage backends:
//! - Ceph: csi-addons VolumeReplication / VolumeGroupReplication
//! - Trident: TridentMirrorRelationship
//! - PowerStore: DellCSIReplicationGroup

pub mod ceph;
pub mod powerstore;
pub mod trident;

pub use ceph::*;
pub use powerstore::*;
pub use trident::*;

use crate::controlplane::translation::from_backend_state;
use crate::domain::ports::{
    BackendKind, BackendObjectStoreRef, NativeApi, NativeObject, ObservedReplication,
    ReplicationAdapterRef, ReplicationTarget,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Longest name the API server accepts for a namespaced custom resource
const MAX_NAME_LEN: usize = 253;
/// Hex digits of the owner digest kept in group-owned names
const DIGEST_LEN: usize = 12;

/// Factory for creating replication adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Create the adapter for a backend kind
    pub fn create(
        kind: BackendKind,
        store: BackendObjectStoreRef,
        config: &BackendConfig,
    ) -> ReplicationAdapterRef {
        match kind {
            BackendKind::Ceph => Arc::new(CephAdapter::new(config.ceph.clone(), store)),
            BackendKind::Trident => Arc::new(TridentAdapter::new(config.trident.clone(), store)),
            BackendKind::PowerStore => {
                Arc::new(PowerStoreAdapter::new(config.powerstore.clone(), store))
            }
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub ceph: CephConfig,
    pub trident: TridentConfig,
    pub powerstore: PowerStoreConfig,
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Where a backend publishes the fields read back into uniform status
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusPaths {
    /// Native state in `.status`
    pub state: &'static str,
    /// Native state in `.spec`, used until the backend publishes status
    pub spec_state: &'static str,
    pub last_sync_time: Option<&'static str>,
    pub last_sync_duration: Option<&'static str>,
}

/// Build a native object owned by `target`
pub(crate) fn owned_object(
    api: NativeApi,
    target: &ReplicationTarget,
    name: String,
    spec: Value,
) -> NativeObject {
    NativeObject {
        api,
        namespace: target.namespace.clone(),
        name,
        labels: target.owner_labels(),
        spec,
        status: None,
    }
}

/// Name of a native object owned by a group intent, or of the object kept
/// for one `member` volume of it.
///
/// Volume intents own objects named exactly after the intent. Group-owned
/// names end in a digest of the owner and member, so a group never lands on
/// a name another group or one of its own members uses, and lands on a
/// volume intent's name only if that intent is named after the digest.
pub(crate) fn group_object_name(target: &ReplicationTarget, member: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"group\0");
    hasher.update(target.namespace.as_bytes());
    hasher.update(b"\0");
    hasher.update(target.name.as_bytes());
    if let Some(member) = member {
        hasher.update(b"\0");
        hasher.update(member.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    let room = MAX_NAME_LEN - DIGEST_LEN - 2;
    let prefix = match target.name.char_indices().nth(room) {
        Some((end, _)) => &target.name[..end],
        None => target.name.as_str(),
    };
    format!(
        "{}-g{}",
        prefix.trim_end_matches(&['-', '.'][..]),
        &digest[..DIGEST_LEN]
    )
}

/// Read an object's status back into uniform vocabulary
pub(crate) fn observe(
    backend: BackendKind,
    object: &NativeObject,
    paths: &StatusPaths,
) -> ObservedReplication {
    let native_state = object
        .status_str(paths.state)
        .or_else(|| object.spec_str(paths.spec_state))
        .map(str::to_string);

    let role = native_state
        .as_deref()
        .and_then(|state| from_backend_state(backend, state));

    let last_sync_time = paths
        .last_sync_time
        .and_then(|p| object.status_str(p))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc));

    let last_sync_duration = paths
        .last_sync_duration
        .and_then(|p| object.status_str(p))
        .map(str::to_string);

    ObservedReplication {
        role,
        native_state,
        objects: vec![object.name.clone()],
        last_sync_time,
        last_sync_duration,
    }
}
