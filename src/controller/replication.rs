//! Reconciler for UnifiedVolumeReplication

use super::{
    converged_status, ensure_finalizer, failed_status, release_previous_backend, resolve_backend,
    teardown, Context, Intent, ReconcileAction,
};
use crate::crd::UnifiedVolumeReplication;
use crate::domain::ports::{IntentKind, ReplicationRequest};
use crate::error::{Error, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run one pass for a volume intent.
///
/// Passes for the same intent are serialized; a pass for a deleting intent
/// tears down its native object and releases the finalizer.
pub async fn reconcile(intent: &UnifiedVolumeReplication, ctx: &Context) -> Result<ReconcileAction> {
    let key = intent.key();
    let started = Instant::now();
    let deleting = intent.metadata.deletion_timestamp.is_some();

    let result = {
        let _guard = ctx.locks.lock(&key).await;
        let result = if deleting {
            teardown(ctx, intent).await
        } else {
            apply(ctx, intent).await
        };
        if let Err(error) = &result {
            record_failure(ctx, intent, error).await;
        }
        result
    };

    if deleting && result.is_ok() {
        ctx.locks.forget(&key);
    }
    ctx.metrics
        .record(IntentKind::Volume, &result, started.elapsed());
    result
}

async fn apply(ctx: &Context, intent: &UnifiedVolumeReplication) -> Result<ReconcileAction> {
    if ensure_finalizer(ctx, intent).await? {
        return Ok(ReconcileAction::RequeueNow);
    }

    let key = intent.key();
    if intent.spec.persistent_volume_claim.trim().is_empty() {
        return Err(Error::Configuration(format!(
            "{} names no persistentVolumeClaim",
            key
        )));
    }

    let backend = resolve_backend(ctx, intent.class_name()).await?;
    let request = ReplicationRequest {
        target: intent.target(),
        class_name: backend.class.name().to_string(),
        role: intent.spec.replication_state,
        mode: intent.spec.replication_mode,
        auto_resync: intent.spec.auto_resync.unwrap_or(false),
        volumes: vec![intent.spec.persistent_volume_claim.clone()],
        parameters: backend.class.spec.parameters.clone(),
    };

    let observed = backend
        .adapter
        .reconcile(&request)
        .await
        .map_err(|e| Error::Adapter {
            backend: backend.kind.to_string(),
            source: Box::new(e),
        })?;

    let previous = intent.status.as_ref().and_then(|s| s.observed_backend.as_deref());
    release_previous_backend(ctx, intent, previous, backend.kind).await?;

    let status = converged_status(
        intent.status.clone().unwrap_or_default(),
        backend.kind,
        &observed,
        intent.metadata.generation,
    );

    if intent.status.as_ref() == Some(&status) {
        debug!("{} unchanged", key);
    } else {
        ctx.store.patch_volume_status(&key, &status).await?;
        info!(
            "{} reconciled on {}: desired {}, observed {}",
            key,
            backend.kind,
            request.role,
            status.observed_role.as_deref().unwrap_or("unknown")
        );
    }

    Ok(ReconcileAction::AwaitChange)
}

async fn record_failure(ctx: &Context, intent: &UnifiedVolumeReplication, error: &Error) {
    let key = intent.key();
    warn!("Reconcile of {} failed ({}): {}", key, error.reason(), error);

    let status = failed_status(
        intent.status.clone().unwrap_or_default(),
        error,
        intent.metadata.generation,
    );
    if intent.status.as_ref() == Some(&status) {
        return;
    }
    if let Err(e) = ctx.store.patch_volume_status(&key, &status).await {
        warn!("Failed to record failure on {}: {}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use crate::controller::FINALIZER;
    use crate::controlplane::backends::{
        CEPH_VOLUME_REPLICATION, POWERSTORE_REPLICATION_GROUP, TRIDENT_MIRROR_RELATIONSHIP,
    };
    use crate::crd::{
        ReplicationMode, ReplicationRole, UnifiedVolumeReplicationClass, UnifiedVolumeReplicationSpec,
    };
    use crate::domain::ports::ReplicationStore;
    use crate::metrics::{OUTCOME_ERROR, OUTCOME_SUCCESS};
    use assert_matches::assert_matches;
    use kube::ResourceExt;

    fn intent(name: &str, class: &str, role: ReplicationRole) -> UnifiedVolumeReplication {
        let mut intent = UnifiedVolumeReplication::new(
            name,
            UnifiedVolumeReplicationSpec {
                replication_class: class.into(),
                persistent_volume_claim: format!("{}-data", name),
                replication_state: role,
                replication_mode: ReplicationMode::Asynchronous,
                auto_resync: None,
            },
        );
        intent.metadata.namespace = Some("apps".into());
        intent
    }

    /// Run passes against the stored intent until it settles
    async fn converge(h: &Harness, name: &str) -> Result<ReconcileAction> {
        for _ in 0..4 {
            let Some(current) = h.store.volume_intent("apps", name).await else {
                return Ok(ReconcileAction::AwaitChange);
            };
            match reconcile(&current, &h.ctx).await? {
                ReconcileAction::RequeueNow => continue,
                settled => return Ok(settled),
            }
        }
        panic!("{} did not settle", name);
    }

    async fn stored(h: &Harness, name: &str) -> UnifiedVolumeReplication {
        h.store.volume_intent("apps", name).await.expect("intent stored")
    }

    #[tokio::test]
    async fn test_ceph_primary_becomes_ready() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;

        assert_eq!(converge(&h, "db").await.unwrap(), ReconcileAction::AwaitChange);

        let intent = stored(&h, "db").await;
        assert!(intent.finalizers().iter().any(|f| f == FINALIZER));
        let status = intent.status.unwrap();
        assert!(status.is_ready());
        assert_eq!(status.observed_role.as_deref(), Some("primary"));
        assert_eq!(status.observed_generation, Some(1));

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].api, CEPH_VOLUME_REPLICATION);
        assert_eq!(objects[0].name, "db");
        assert_eq!(objects[0].spec_str("/replicationState"), Some("primary"));
        assert_eq!(objects[0].spec_str("/dataSource/name"), Some("db-data"));
    }

    #[tokio::test]
    async fn test_trident_role_translated_both_ways() {
        let h = Harness::new().with_class("silver", TRIDENT_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "silver", ReplicationRole::Primary)).await;

        converge(&h, "db").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects[0].api, TRIDENT_MIRROR_RELATIONSHIP);
        assert_eq!(objects[0].spec_str("/state"), Some("established"));

        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.observed_role.as_deref(), Some("primary"));
        assert_eq!(status.observed_native_state.as_deref(), Some("established"));
    }

    #[tokio::test]
    async fn test_powerstore_secondary() {
        let h = Harness::new().with_class("bronze", POWERSTORE_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "bronze", ReplicationRole::Secondary)).await;

        converge(&h, "db").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects[0].api, POWERSTORE_REPLICATION_GROUP);
        assert_eq!(objects[0].spec_str("/action"), Some("target"));
        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.observed_role.as_deref(), Some("secondary"));
    }

    #[tokio::test]
    async fn test_missing_class_is_configuration_error() {
        let h = Harness::new();
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;

        assert_matches!(converge(&h, "db").await, Err(Error::ClassNotFound { name }) if name == "gold");

        let status = stored(&h, "db").await.status.unwrap();
        assert!(!status.is_ready());
        assert_eq!(status.ready_reason(), Some("ConfigurationError"));
        assert!(status.ready_message().unwrap().contains("gold"));
        assert_eq!(h.objects.len().await, 0);
        assert_eq!(h.ctx.metrics.failures(IntentKind::Volume, "ConfigurationError"), 1);
    }

    #[tokio::test]
    async fn test_unknown_provisioner_is_classification_error() {
        let h = Harness::new().with_class("gold", "example.com/foo").await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;

        assert_matches!(converge(&h, "db").await, Err(Error::UnknownBackend { .. }));

        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.ready_reason(), Some("ClassificationError"));
        assert!(status.ready_message().unwrap().contains("example.com/foo"));
        assert_eq!(h.objects.len().await, 0);
    }

    #[tokio::test]
    async fn test_empty_provisioner_is_configuration_error() {
        let h = Harness::new().with_class("gold", "  ").await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;

        assert_matches!(converge(&h, "db").await, Err(Error::InvalidClass { .. }));
        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.ready_reason(), Some("ConfigurationError"));
    }

    #[tokio::test]
    async fn test_adapter_failure_then_recovery() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        h.objects.fail_with("mirror daemon unreachable").await;

        let err = converge(&h, "db").await.unwrap_err();
        assert_eq!(err.reason(), "AdapterError");
        assert!(err.is_transient());

        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.ready_reason(), Some("AdapterError"));
        assert!(status.ready_message().unwrap().contains("mirror daemon unreachable"));

        h.objects.clear_failure().await;
        converge(&h, "db").await.unwrap();
        let status = stored(&h, "db").await.status.unwrap();
        assert!(status.is_ready());
        assert_eq!(h.ctx.metrics.reconciliations(IntentKind::Volume, OUTCOME_ERROR), 1);
    }

    #[tokio::test]
    async fn test_repeated_passes_are_idempotent() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;

        converge(&h, "db").await.unwrap();
        let first = stored(&h, "db").await;

        for _ in 0..3 {
            converge(&h, "db").await.unwrap();
        }
        let later = stored(&h, "db").await;

        assert_eq!(first.status, later.status);
        assert_eq!(first.metadata.finalizers, later.metadata.finalizers);
        assert_eq!(h.objects.len().await, 1);
        assert_eq!(h.ctx.metrics.reconciliations(IntentKind::Volume, OUTCOME_SUCCESS), 5);
    }

    #[tokio::test]
    async fn test_spec_change_updates_native_object() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();

        h.store
            .update_volume_intent("apps", "db", |spec| {
                spec.replication_state = ReplicationRole::Secondary;
                spec.replication_mode = ReplicationMode::Synchronous;
            })
            .await;
        converge(&h, "db").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].spec_str("/replicationState"), Some("secondary"));
        assert_eq!(objects[0].spec_str("/mirroringMode"), Some("journal"));

        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.observed_role.as_deref(), Some("secondary"));
        assert_eq!(status.observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_unmapped_native_state_keeps_last_role() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();

        h.objects
            .set_status(
                &CEPH_VOLUME_REPLICATION,
                "apps",
                "db",
                serde_json::json!({"state": "Degraded", "lastSyncTime": "2024-05-01T10:00:00Z"}),
            )
            .await
            .unwrap();
        converge(&h, "db").await.unwrap();

        let status = stored(&h, "db").await.status.unwrap();
        assert!(status.is_ready());
        assert_eq!(status.observed_role.as_deref(), Some("primary"));
        assert_eq!(status.observed_native_state.as_deref(), Some("Degraded"));
        assert!(status.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn test_deletion_retries_until_teardown_succeeds() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();

        h.store.delete_volume_intent("apps", "db").await;
        h.objects.fail_with("api timeout").await;

        for _ in 0..2 {
            let err = converge(&h, "db").await.unwrap_err();
            assert_eq!(err.reason(), "DeletionError");
        }
        let intent = stored(&h, "db").await;
        assert!(intent.finalizers().iter().any(|f| f == FINALIZER));
        assert_eq!(intent.status.unwrap().ready_reason(), Some("DeletionError"));

        h.objects.clear_failure().await;
        converge(&h, "db").await.unwrap();

        assert!(h.store.volume_intent("apps", "db").await.is_none());
        assert_eq!(h.objects.len().await, 0);
        // One failing call per failed pass, then one per registered adapter
        assert_eq!(h.objects.delete_calls(), 5);
        assert!(h.ctx.locks.is_empty());
    }

    #[tokio::test]
    async fn test_deletion_without_class_uses_every_adapter() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();

        h.store.remove_class("gold").await;
        h.store.delete_volume_intent("apps", "db").await;
        converge(&h, "db").await.unwrap();

        assert!(h.store.volume_intent("apps", "db").await.is_none());
        assert_eq!(h.objects.len().await, 0);
    }

    #[tokio::test]
    async fn test_class_switch_moves_native_object() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();
        assert_eq!(h.objects.objects().await[0].api, CEPH_VOLUME_REPLICATION);

        h.store
            .insert_class(UnifiedVolumeReplicationClass::with_provisioner("gold", TRIDENT_PROVISIONER))
            .await;
        converge(&h, "db").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].api, TRIDENT_MIRROR_RELATIONSHIP);
        let status = stored(&h, "db").await.status.unwrap();
        assert_eq!(status.observed_backend.as_deref(), Some("trident"));
        assert!(status.is_ready());

        h.store.delete_volume_intent("apps", "db").await;
        converge(&h, "db").await.unwrap();
        assert!(h.store.volume_intent("apps", "db").await.is_none());
        assert_eq!(h.objects.len().await, 0);
    }

    #[tokio::test]
    async fn test_deletion_after_class_switch_removes_old_object() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();

        // Re-pointed, then deleted before any pass ran against the new backend
        h.store
            .insert_class(UnifiedVolumeReplicationClass::with_provisioner("gold", TRIDENT_PROVISIONER))
            .await;
        h.store.delete_volume_intent("apps", "db").await;
        converge(&h, "db").await.unwrap();

        assert!(h.store.volume_intent("apps", "db").await.is_none());
        assert_eq!(h.objects.len().await, 0);
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_drop_concurrent_finalizer() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        let stale = stored(&h, "db").await;

        // Another controller adds its finalizer after our copy was read
        let key = stale.key();
        h.store
            .set_finalizers(&key, stale.resource_version().as_deref(), &["backup.example.com/hold".into()])
            .await
            .unwrap();

        assert_matches!(reconcile(&stale, &h.ctx).await, Err(Error::Conflict { .. }));
        assert_eq!(h.objects.len().await, 0);

        converge(&h, "db").await.unwrap();
        let finalizers = stored(&h, "db").await.finalizers().to_vec();
        assert_eq!(finalizers, vec!["backup.example.com/hold".to_string(), FINALIZER.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_passes_converge_once() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        h.store.insert_volume_intent(intent("db", "gold", ReplicationRole::Primary)).await;
        converge(&h, "db").await.unwrap();

        let snapshot = stored(&h, "db").await;
        let (a, b) = tokio::join!(reconcile(&snapshot, &h.ctx), reconcile(&snapshot, &h.ctx));
        assert_eq!(a.unwrap(), ReconcileAction::AwaitChange);
        assert_eq!(b.unwrap(), ReconcileAction::AwaitChange);

        assert_eq!(h.objects.len().await, 1);
        assert_eq!(stored(&h, "db").await.status, snapshot.status);
    }
}
