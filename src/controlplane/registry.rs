//! Adapter Registry
//!
//! Resolves a backend kind to its adapter. Each registry instance owns its
//! own mapping; there is no process-wide instance, callers construct one and
//! hand it to the reconcilers.

use crate::controlplane::backends::{BackendConfig, BackendFactory};
use crate::domain::ports::{BackendKind, BackendObjectStoreRef, ReplicationAdapterRef};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::info;

/// Backend kind → adapter mapping
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<BTreeMap<BackendKind, ReplicationAdapterRef>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with an adapter for every supported backend
    pub fn with_defaults(store: BackendObjectStoreRef, config: &BackendConfig) -> Result<Self> {
        let registry = Self::new();
        for kind in BackendKind::ALL {
            registry.register(BackendFactory::create(kind, store.clone(), config))?;
        }
        Ok(registry)
    }

    /// Register an adapter under its own backend kind.
    ///
    /// Fails if that kind is already registered.
    pub fn register(&self, adapter: ReplicationAdapterRef) -> Result<()> {
        let kind = adapter.backend_kind();
        let mut adapters = self.adapters.write();
        if adapters.contains_key(&kind) {
            return Err(Error::DuplicateRegistration {
                backend: kind.to_string(),
            });
        }
        adapters.insert(kind, adapter);
        info!("Registered replication adapter: {}", kind);
        Ok(())
    }

    /// Resolve the adapter for a backend
    pub fn resolve(&self, kind: BackendKind) -> Result<ReplicationAdapterRef> {
        self.adapters
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::AdapterNotFound {
                backend: kind.to_string(),
            })
    }

    /// Every registered adapter, ordered by backend kind
    pub fn adapters(&self) -> Vec<ReplicationAdapterRef> {
        self.adapters.read().values().cloned().collect()
    }

    /// Registered backend kinds
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.adapters.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }
}
