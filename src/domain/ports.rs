//! Domain Ports - Core trait definitions for the replication operator
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems. Adapters implement these traits to provide concrete
//! functionality.

use crate::crd::{
    GroupReplicationStatus, ReplicationMode, ReplicationRole, ReplicationStatus,
    UnifiedVolumeReplicationClass,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label marking every backend-native object this operator writes
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY: &str = "unified-replication-operator";
/// Label naming the owning intent
pub const LABEL_OWNER: &str = "replication.unified.io/owner";
/// Label naming the owning intent kind (`volume` or `group`)
pub const LABEL_OWNER_KIND: &str = "replication.unified.io/owner-kind";

// =============================================================================
// Backend Kind
// =============================================================================

/// Storage backends supported by the operator.
///
/// This is a closed set; an unknown provisioner is an error, never a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    Ceph,
    Trident,
    PowerStore,
}

impl BackendKind {
    /// Every backend, in declaration order
    pub const ALL: [BackendKind; 3] = [BackendKind::Ceph, BackendKind::Trident, BackendKind::PowerStore];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ceph => "ceph",
            BackendKind::Trident => "trident",
            BackendKind::PowerStore => "powerstore",
        }
    }

    /// Inverse of [`as_str`](Self::as_str)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Backend-Native Objects
// =============================================================================

/// Group/version/kind coordinates of a backend-native resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeApi {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl NativeApi {
    /// `group/version` string
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl std::fmt::Display for NativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.plural, self.group)
    }
}

/// A backend-native replication object as written to or read from its store
#[derive(Debug, Clone, PartialEq)]
pub struct NativeObject {
    pub api: NativeApi,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub spec: Value,
    /// Published by the backend; never written by the operator
    pub status: Option<Value>,
}

impl NativeObject {
    /// Read a string field from the status by JSON pointer (e.g. `/state`)
    pub fn status_str(&self, pointer: &str) -> Option<&str> {
        self.status.as_ref()?.pointer(pointer)?.as_str()
    }

    /// Read a string field from the spec by JSON pointer
    pub fn spec_str(&self, pointer: &str) -> Option<&str> {
        self.spec.pointer(pointer)?.as_str()
    }
}

// =============================================================================
// Replication Request/Response
// =============================================================================

/// Identity of the intent a backend-native object belongs to.
///
/// Native object names are derived from this, never generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicationTarget {
    pub namespace: String,
    pub name: String,
    /// Whether the owner is a group intent
    pub grouped: bool,
}

impl ReplicationTarget {
    /// Labels stamped on every native object owned by this target
    pub fn owner_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
        labels.insert(LABEL_OWNER.to_string(), self.name.clone());
        labels.insert(
            LABEL_OWNER_KIND.to_string(),
            if self.grouped { "group" } else { "volume" }.to_string(),
        );
        labels
    }
}

/// Uniform request handed to a backend adapter
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationRequest {
    pub target: ReplicationTarget,
    /// Name of the class the request was resolved from
    pub class_name: String,
    pub role: ReplicationRole,
    pub mode: ReplicationMode,
    pub auto_resync: bool,
    /// One PVC for a volume intent, the name-sorted member list for a group
    pub volumes: Vec<String>,
    /// Opaque class parameters
    pub parameters: BTreeMap<String, String>,
}

/// What the backend reports back, in uniform vocabulary where possible
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedReplication {
    /// `None` when the native state has no uniform equivalent
    pub role: Option<ReplicationRole>,
    /// Raw native state the role was derived from
    pub native_state: Option<String>,
    /// Names of the native objects backing the intent
    pub objects: Vec<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_duration: Option<String>,
}

// =============================================================================
// Replication Adapter Port
// =============================================================================

/// Port implemented once per storage backend
#[async_trait]
pub trait ReplicationAdapter: Send + Sync {
    /// Create or update the native object(s) for the request and read back
    /// their status. Must converge to the same objects when repeated.
    async fn reconcile(&self, request: &ReplicationRequest) -> Result<ObservedReplication>;

    /// Delete the native object(s) for the target. Absent objects are success.
    async fn delete(&self, target: &ReplicationTarget) -> Result<()>;

    /// Backend this adapter serves
    fn backend_kind(&self) -> BackendKind;
}

// =============================================================================
// Backend Object Store Port
// =============================================================================

/// Port for create/update/delete of backend-native objects
#[async_trait]
pub trait BackendObjectStore: Send + Sync {
    /// Fetch an object, `None` when absent
    async fn get(&self, api: &NativeApi, namespace: &str, name: &str) -> Result<Option<NativeObject>>;

    /// Create or update an object's labels and spec, returning the stored object
    async fn apply(&self, object: NativeObject) -> Result<NativeObject>;

    /// Delete an object. Returns `false` when it was already absent.
    async fn delete(&self, api: &NativeApi, namespace: &str, name: &str) -> Result<bool>;

    /// List objects in a namespace carrying all the given labels
    async fn list(
        &self,
        api: &NativeApi,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<NativeObject>>;
}

// =============================================================================
// Replication Store Port
// =============================================================================

/// Kind of intent a key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntentKind {
    Volume,
    Group,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentKind::Volume => write!(f, "volume"),
            IntentKind::Group => write!(f, "group"),
        }
    }
}

/// Identity of an intent object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentKey {
    pub kind: IntentKind,
    pub namespace: String,
    pub name: String,
}

impl IntentKey {
    pub fn new(kind: IntentKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for IntentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Port for the cluster objects the reconcilers read and write
#[async_trait]
pub trait ReplicationStore: Send + Sync {
    /// Fetch a replication class by name, `None` when absent
    async fn get_class(&self, name: &str) -> Result<Option<UnifiedVolumeReplicationClass>>;

    /// Names of PVCs in `namespace` matching `selector`, in any order
    async fn list_volumes(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<String>>;

    /// Replace the finalizer list of an intent.
    ///
    /// With a `resource_version`, the write fails if the intent changed
    /// since that version was read.
    async fn set_finalizers(
        &self,
        key: &IntentKey,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<()>;

    /// Write the status of a volume intent
    async fn patch_volume_status(&self, key: &IntentKey, status: &ReplicationStatus) -> Result<()>;

    /// Write the status of a group intent
    async fn patch_group_status(&self, key: &IntentKey, status: &GroupReplicationStatus) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ReplicationAdapterRef = Arc<dyn ReplicationAdapter>;
pub type BackendObjectStoreRef = Arc<dyn BackendObjectStore>;
pub type ReplicationStoreRef = Arc<dyn ReplicationStore>;
