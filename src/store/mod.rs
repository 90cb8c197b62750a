//! Store Adapters
//!
//! Implementations of the [`BackendObjectStore`](crate::domain::BackendObjectStore)
//! and [`ReplicationStore`](crate::domain::ReplicationStore) ports:
//! - k8s: the Kubernetes API server
//! - memory: in-process state for tests

pub mod k8s;
pub mod memory;

pub use k8s::{KubeObjectStore, KubeReplicationStore};
pub use memory::{InMemoryObjectStore, InMemoryReplicationStore};
