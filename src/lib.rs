//! Unified Replication Operator
//!
//! A Kubernetes operator exposing one replication vocabulary for volumes
//! backed by Ceph, NetApp Trident and Dell PowerStore. Users declare the
//! desired role of a volume (or a labelled set of volumes); the operator
//! classifies the backend from the replication class, translates the intent
//! into the backend's native replication object, and reports the observed
//! role back in uniform terms.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Controllers                                │
//! │  ┌────────────────────────────┐  ┌────────────────────────────────┐  │
//! │  │ UnifiedVolumeReplication   │  │ UnifiedVolumeGroupReplication  │  │
//! │  └─────────────┬──────────────┘  └───────────────┬────────────────┘  │
//! │                └───────────────┬─────────────────┘                   │
//! │                   ┌────────────┴────────────┐                        │
//! │                   │ Classifier → Registry   │                        │
//! │                   └────────────┬────────────┘                        │
//! ├────────────────────────────────┼─────────────────────────────────────┤
//! │                       Backend Adapters                               │
//! │  ┌──────────────┐  ┌───────────┴──────┐  ┌───────────────────────┐   │
//! │  │     Ceph     │  │     Trident      │  │      PowerStore       │   │
//! │  └──────────────┘  └──────────────────┘  └───────────────────────┘   │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │              Stores (Kubernetes API / in-memory)                     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Reconcilers, backoff and kube-runtime wiring
//! - [`controlplane`]: Classification, translation, registry and adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and reason tokens
//! - [`metrics`]: Prometheus reconcile metrics
//! - [`store`]: Port implementations

pub mod controller;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use controller::{BackoffConfig, Context, ReconcileAction, FINALIZER};

pub use controlplane::{
    classify, AdapterRegistry, BackendConfig, BackendFactory, CephAdapter, CephConfig,
    PowerStoreAdapter, PowerStoreConfig, TridentAdapter, TridentConfig,
};

pub use crd::{
    GroupReplicationStatus, ReplicationMode, ReplicationRole, ReplicationStatus,
    UnifiedVolumeGroupReplication, UnifiedVolumeGroupReplicationSpec, UnifiedVolumeReplication,
    UnifiedVolumeReplicationClass, UnifiedVolumeReplicationClassSpec, UnifiedVolumeReplicationSpec,
};

pub use domain::ports::{
    BackendKind, BackendObjectStore, IntentKey, IntentKind, ObservedReplication,
    ReplicationAdapter, ReplicationRequest, ReplicationStore, ReplicationTarget,
};

pub use error::{Error, Result};

pub use metrics::ReconcileMetrics;

pub use store::{InMemoryObjectStore, InMemoryReplicationStore, KubeObjectStore, KubeReplicationStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
