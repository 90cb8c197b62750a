//! Replication Controllers
//!
//! Reconcilers for the two intent kinds and the kube-runtime wiring that
//! drives them. A pass runs through these phases:
//!
//! 1. finalizer gate (attach, or tear down when deleting)
//! 2. class resolution and backend classification
//! 3. adapter reconcile
//! 4. status write, only when the computed status differs from the stored one
//!
//! Any failure writes `Ready=False` with the error's reason token and is
//! retried with per-intent exponential backoff.

pub mod group;
pub mod replication;
pub mod retry;
pub mod runner;

pub use retry::{BackoffConfig, BackoffTracker};

use crate::controlplane::{classify, AdapterRegistry};
use crate::crd::{
    ConditionStatus, ReplicationCondition, ReplicationStatus, UnifiedVolumeGroupReplication,
    UnifiedVolumeReplication, UnifiedVolumeReplicationClass, REASON_RECONCILED,
};
use crate::domain::ports::{
    BackendKind, IntentKey, IntentKind, ObservedReplication, ReplicationAdapterRef,
    ReplicationStoreRef, ReplicationTarget,
};
use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use dashmap::DashMap;
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Finalizer gating deletion of every intent until its native objects are gone
pub const FINALIZER: &str = "replication.unified.io/finalizer";

/// What the runtime should do after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Run another pass straight away (e.g. after attaching the finalizer)
    RequeueNow,
    /// Nothing to do until the intent or a watched object changes
    AwaitChange,
}

// =============================================================================
// Intent Kinds
// =============================================================================

/// Behaviour shared by both intent custom resources
pub trait Intent: ResourceExt {
    const KIND: IntentKind;

    fn key(&self) -> IntentKey {
        IntentKey::new(Self::KIND, self.namespace().unwrap_or_default(), self.name_any())
    }

    fn target(&self) -> ReplicationTarget {
        ReplicationTarget {
            namespace: self.namespace().unwrap_or_default(),
            name: self.name_any(),
            grouped: Self::KIND == IntentKind::Group,
        }
    }

    /// Name of the class the intent refers to
    fn class_name(&self) -> &str;
}

impl Intent for UnifiedVolumeReplication {
    const KIND: IntentKind = IntentKind::Volume;

    fn class_name(&self) -> &str {
        &self.spec.replication_class
    }
}

impl Intent for UnifiedVolumeGroupReplication {
    const KIND: IntentKind = IntentKind::Group;

    fn class_name(&self) -> &str {
        &self.spec.replication_class
    }
}

// =============================================================================
// Per-Intent Serialization
// =============================================================================

/// One async mutex per intent, so at most one pass per intent is in flight
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<IntentKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &IntentKey) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drop the mutex of a finalized intent if nobody holds or awaits it
    pub fn forget(&self, key: &IntentKey) {
        self.locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state handed to every reconcile pass
pub struct Context {
    pub store: ReplicationStoreRef,
    pub registry: Arc<AdapterRegistry>,
    pub metrics: ReconcileMetrics,
    pub backoff: BackoffTracker,
    pub locks: KeyedLocks,
    /// Set once the controllers are watching, cleared when they stop
    ready: AtomicBool,
}

impl Context {
    pub fn new(
        store: ReplicationStoreRef,
        registry: Arc<AdapterRegistry>,
        metrics: ReconcileMetrics,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            backoff: BackoffTracker::new(backoff),
            locks: KeyedLocks::new(),
            ready: AtomicBool::new(false),
        }
    }

    /// Whether the controllers are up and watching
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

// =============================================================================
// Shared Phases
// =============================================================================

/// A class resolved all the way to the adapter that serves it
pub(crate) struct ResolvedBackend {
    pub class: UnifiedVolumeReplicationClass,
    pub kind: BackendKind,
    pub adapter: ReplicationAdapterRef,
}

/// Resolve a class name to its backend adapter
pub(crate) async fn resolve_backend(ctx: &Context, class_name: &str) -> Result<ResolvedBackend> {
    let class = ctx
        .store
        .get_class(class_name)
        .await?
        .ok_or_else(|| Error::ClassNotFound {
            name: class_name.to_string(),
        })?;

    if class.spec.provisioner.trim().is_empty() {
        return Err(Error::InvalidClass {
            name: class_name.to_string(),
            reason: "provisioner is empty".to_string(),
        });
    }

    let kind = classify(&class.spec.provisioner)?;
    let adapter = ctx.registry.resolve(kind)?;
    debug!(
        "Class {} (provisioner {}) resolved to {} backend",
        class_name, class.spec.provisioner, kind
    );

    Ok(ResolvedBackend {
        class,
        kind,
        adapter,
    })
}

/// Attach the finalizer if missing. Returns `true` when it was added.
pub(crate) async fn ensure_finalizer<K: Intent>(ctx: &Context, intent: &K) -> Result<bool> {
    if intent.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(false);
    }

    let mut finalizers = intent.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    ctx.store
        .set_finalizers(&intent.key(), intent.resource_version().as_deref(), &finalizers)
        .await?;
    info!("Attached finalizer to {}", intent.key());
    Ok(true)
}

/// Delete the native objects of a deleting intent, then release its finalizer.
///
/// The class may have been re-pointed at another backend since the objects
/// were written, so every registered adapter is asked to delete. Absent
/// objects count as success for each.
pub(crate) async fn teardown<K: Intent>(ctx: &Context, intent: &K) -> Result<ReconcileAction> {
    if !intent.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(ReconcileAction::AwaitChange);
    }

    let target = intent.target();
    for adapter in ctx.registry.adapters() {
        adapter
            .delete(&target)
            .await
            .map_err(|e| Error::Deletion {
                backend: adapter.backend_kind().to_string(),
                source: Box::new(e),
            })?;
    }

    let remaining: Vec<String> = intent
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    ctx.store
        .set_finalizers(&intent.key(), intent.resource_version().as_deref(), &remaining)
        .await?;
    info!("Released finalizer of {}", intent.key());

    Ok(ReconcileAction::AwaitChange)
}

/// Remove what an earlier pass wrote through a backend the class no longer
/// resolves to.
pub(crate) async fn release_previous_backend<K: Intent>(
    ctx: &Context,
    intent: &K,
    previous: Option<&str>,
    current: BackendKind,
) -> Result<()> {
    let Some(previous) = previous.and_then(BackendKind::from_name) else {
        return Ok(());
    };
    if previous == current {
        return Ok(());
    }

    let adapter = ctx.registry.resolve(previous)?;
    adapter
        .delete(&intent.target())
        .await
        .map_err(|e| Error::Deletion {
            backend: previous.to_string(),
            source: Box::new(e),
        })?;
    info!(
        "{} moved from {} to {}; removed its {} objects",
        intent.key(),
        previous,
        current,
        previous
    );
    Ok(())
}

/// Status after a converged pass.
///
/// The previous `observed_role` is kept when the backend reports a state
/// with no uniform equivalent.
pub(crate) fn converged_status(
    mut status: ReplicationStatus,
    backend: BackendKind,
    observed: &ObservedReplication,
    generation: Option<i64>,
) -> ReplicationStatus {
    if let Some(role) = observed.role {
        status.observed_role = Some(role.to_string());
    }
    status.observed_native_state = observed.native_state.clone();
    status.observed_backend = Some(backend.to_string());
    status.observed_generation = generation;
    if observed.last_sync_time.is_some() {
        status.last_sync_time = observed.last_sync_time;
    }
    if observed.last_sync_duration.is_some() {
        status.last_sync_duration = observed.last_sync_duration.clone();
    }

    let message = match (observed.role, observed.native_state.as_deref()) {
        (Some(role), _) => format!("{} backend reports role {}", backend, role),
        (None, Some(native)) => format!("{} backend reports state {}", backend, native),
        (None, None) => format!("{} backend has not reported a state yet", backend),
    };
    status.set_condition(ReplicationCondition::ready(
        ConditionStatus::True,
        REASON_RECONCILED,
        message,
        generation,
    ));
    status
}

/// Status after a failed pass
pub(crate) fn failed_status(
    mut status: ReplicationStatus,
    error: &Error,
    generation: Option<i64>,
) -> ReplicationStatus {
    status.set_condition(ReplicationCondition::ready(
        ConditionStatus::False,
        error.reason(),
        error.to_string(),
        generation,
    ));
    status
}
