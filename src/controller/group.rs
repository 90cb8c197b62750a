//! Reconciler for UnifiedVolumeGroupReplication
//!
//! Same phases as the volume reconciler, with selector resolution between
//! class resolution and the adapter call. Members are handed to the adapter
//! sorted by name so repeated passes produce identical requests.

use super::{
    converged_status, ensure_finalizer, failed_status, release_previous_backend, resolve_backend,
    teardown, Context, Intent, ReconcileAction,
};
use crate::crd::{selector, GroupReplicationStatus, UnifiedVolumeGroupReplication};
use crate::domain::ports::{IntentKind, ReplicationRequest};
use crate::error::{Error, Result};
use kube::ResourceExt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run one pass for a group intent
pub async fn reconcile(
    intent: &UnifiedVolumeGroupReplication,
    ctx: &Context,
) -> Result<ReconcileAction> {
    let key = intent.key();
    let started = Instant::now();
    let deleting = intent.metadata.deletion_timestamp.is_some();

    let result = {
        let _guard = ctx.locks.lock(&key).await;
        let mut members = None;
        let result = if deleting {
            teardown(ctx, intent).await
        } else {
            apply(ctx, intent, &mut members).await
        };
        if let Err(error) = &result {
            record_failure(ctx, intent, error, members).await;
        }
        result
    };

    if deleting && result.is_ok() {
        ctx.locks.forget(&key);
    }
    ctx.metrics.record(IntentKind::Group, &result, started.elapsed());
    result
}

/// Name-sorted, de-duplicated PVCs matching the group selector
async fn resolve_members(ctx: &Context, intent: &UnifiedVolumeGroupReplication) -> Result<Vec<String>> {
    let namespace = intent.namespace().unwrap_or_default();
    let mut members = ctx
        .store
        .list_volumes(&namespace, &intent.spec.selector)
        .await?;
    members.sort();
    members.dedup();
    Ok(members)
}

/// `members` is set once selector resolution succeeds, even if a later
/// phase fails.
async fn apply(
    ctx: &Context,
    intent: &UnifiedVolumeGroupReplication,
    members: &mut Option<Vec<String>>,
) -> Result<ReconcileAction> {
    if ensure_finalizer(ctx, intent).await? {
        return Ok(ReconcileAction::RequeueNow);
    }

    let key = intent.key();
    let backend = resolve_backend(ctx, intent.class_name()).await?;

    let volumes = resolve_members(ctx, intent).await?;
    *members = Some(volumes.clone());
    if volumes.is_empty() {
        return Err(Error::NoVolumesMatched {
            namespace: intent.namespace().unwrap_or_default(),
            selector: selector::to_query(&intent.spec.selector)?,
        });
    }
    debug!("{} selects {} volume(s): {:?}", key, volumes.len(), volumes);

    let request = ReplicationRequest {
        target: intent.target(),
        class_name: backend.class.name().to_string(),
        role: intent.spec.replication_state,
        mode: intent.spec.replication_mode,
        auto_resync: intent.spec.auto_resync.unwrap_or(false),
        volumes,
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

    let previous = intent.status.clone().unwrap_or_default();
    release_previous_backend(
        ctx,
        intent,
        previous.replication.observed_backend.as_deref(),
        backend.kind,
    )
    .await?;
    let status = GroupReplicationStatus {
        replication: converged_status(
            previous.replication,
            backend.kind,
            &observed,
            intent.metadata.generation,
        ),
        persistent_volume_claims_ref_list: request.volumes.clone(),
    };

    if intent.status.as_ref() == Some(&status) {
        debug!("{} unchanged", key);
    } else {
        ctx.store.patch_group_status(&key, &status).await?;
        info!(
            "{} reconciled on {} with {} volume(s): desired {}, observed {}",
            key,
            backend.kind,
            request.volumes.len(),
            request.role,
            status
                .replication
                .observed_role
                .as_deref()
                .unwrap_or("unknown")
        );
    }

    Ok(ReconcileAction::AwaitChange)
}

async fn record_failure(
    ctx: &Context,
    intent: &UnifiedVolumeGroupReplication,
    error: &Error,
    members: Option<Vec<String>>,
) {
    let key = intent.key();
    warn!("Reconcile of {} failed ({}): {}", key, error.reason(), error);

    let previous = intent.status.clone().unwrap_or_default();
    let status = GroupReplicationStatus {
        replication: failed_status(previous.replication, error, intent.metadata.generation),
        persistent_volume_claims_ref_list: members
            .unwrap_or(previous.persistent_volume_claims_ref_list),
    };
    if intent.status.as_ref() == Some(&status) {
        return;
    }
    if let Err(e) = ctx.store.patch_group_status(&key, &status).await {
        warn!("Failed to record failure on {}: {}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::*;
    use crate::controller::FINALIZER;
    use crate::controlplane::backends::{
        CEPH_VOLUME_GROUP_REPLICATION, POWERSTORE_REPLICATION_GROUP, TRIDENT_MIRROR_RELATIONSHIP,
    };
    use crate::controller::replication;
    use crate::crd::{
        ReplicationMode, ReplicationRole, UnifiedVolumeGroupReplicationSpec, UnifiedVolumeReplication,
        UnifiedVolumeReplicationSpec,
    };
    use assert_matches::assert_matches;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use std::collections::BTreeMap;

    fn intent(name: &str, class: &str, app: &str) -> UnifiedVolumeGroupReplication {
        let mut intent = UnifiedVolumeGroupReplication::new(
            name,
            UnifiedVolumeGroupReplicationSpec {
                replication_class: class.into(),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
                    match_expressions: None,
                },
                replication_state: ReplicationRole::Primary,
                replication_mode: ReplicationMode::Asynchronous,
                auto_resync: Some(true),
            },
        );
        intent.metadata.namespace = Some("apps".into());
        intent
    }

    async fn converge(h: &Harness, name: &str) -> Result<ReconcileAction> {
        for _ in 0..4 {
            let Some(current) = h.store.group_intent("apps", name).await else {
                return Ok(ReconcileAction::AwaitChange);
            };
            match reconcile(&current, &h.ctx).await? {
                ReconcileAction::RequeueNow => continue,
                settled => return Ok(settled),
            }
        }
        panic!("{} did not settle", name);
    }

    async fn status(h: &Harness, name: &str) -> GroupReplicationStatus {
        h.store
            .group_intent("apps", name)
            .await
            .and_then(|i| i.status)
            .expect("status written")
    }

    async fn with_volumes(h: &Harness, names: &[&str], app: &str) {
        for name in names {
            h.store.insert_volume("apps", name, &[("app", app)]).await;
        }
    }

    #[tokio::test]
    async fn test_ceph_group_lists_sorted_members() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        with_volumes(&h, &["pg-2", "pg-0", "pg-1"], "pg").await;
        with_volumes(&h, &["web-0"], "web").await;
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;

        converge(&h, "pg").await.unwrap();

        let status = status(&h, "pg").await;
        assert!(status.replication.is_ready());
        assert_eq!(status.persistent_volume_claims_ref_list, vec!["pg-0", "pg-1", "pg-2"]);
        assert_eq!(status.replication.observed_role.as_deref(), Some("primary"));

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].api, CEPH_VOLUME_GROUP_REPLICATION);
        assert_eq!(
            objects[0].spec.pointer("/source/persistentVolumeClaims"),
            Some(&serde_json::json!(["pg-0", "pg-1", "pg-2"]))
        );
        assert_eq!(objects[0].spec.pointer("/autoResync"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_no_matching_volumes_is_selector_error() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        with_volumes(&h, &["web-0"], "web").await;
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;

        assert_matches!(converge(&h, "pg").await, Err(Error::NoVolumesMatched { .. }));

        let status = status(&h, "pg").await;
        assert_eq!(status.replication.ready_reason(), Some("SelectorError"));
        assert!(status
            .replication
            .ready_message()
            .unwrap()
            .contains("no volumes matched selector"));
        assert!(status.persistent_volume_claims_ref_list.is_empty());
        assert_eq!(h.objects.len().await, 0);
    }

    #[tokio::test]
    async fn test_class_checked_before_selector() {
        let h = Harness::new();
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;

        assert_matches!(converge(&h, "pg").await, Err(Error::ClassNotFound { .. }));
        let status = status(&h, "pg").await;
        assert_eq!(status.replication.ready_reason(), Some("ConfigurationError"));
    }

    #[tokio::test]
    async fn test_trident_group_tracks_membership() {
        let h = Harness::new().with_class("silver", TRIDENT_PROVISIONER).await;
        with_volumes(&h, &["pg-0", "pg-1"], "pg").await;
        h.store.insert_group_intent(intent("pg", "silver", "pg")).await;

        converge(&h, "pg").await.unwrap();
        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 2);
        assert!(objects.iter().all(|o| o.api == TRIDENT_MIRROR_RELATIONSHIP));
        let mut pvcs: Vec<&str> = objects
            .iter()
            .filter_map(|o| o.spec_str("/volumeMappings/0/localPVCName"))
            .collect();
        pvcs.sort();
        assert_eq!(pvcs, vec!["pg-0", "pg-1"]);

        // pg-1 leaves the group
        h.store.insert_volume("apps", "pg-1", &[("app", "other")]).await;
        converge(&h, "pg").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].spec_str("/volumeMappings/0/localPVCName"), Some("pg-0"));
        assert_eq!(status(&h, "pg").await.persistent_volume_claims_ref_list, vec!["pg-0"]);
    }

    #[tokio::test]
    async fn test_powerstore_group_single_object() {
        let h = Harness::new().with_class("bronze", POWERSTORE_PROVISIONER).await;
        with_volumes(&h, &["pg-1", "pg-0"], "pg").await;
        h.store.insert_group_intent(intent("pg", "bronze", "pg")).await;

        converge(&h, "pg").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].api, POWERSTORE_REPLICATION_GROUP);
        assert_eq!(objects[0].spec_str("/action"), Some("source"));
    }

    #[tokio::test]
    async fn test_group_passes_are_idempotent() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        with_volumes(&h, &["pg-0", "pg-1"], "pg").await;
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;

        converge(&h, "pg").await.unwrap();
        let first = status(&h, "pg").await;
        converge(&h, "pg").await.unwrap();
        converge(&h, "pg").await.unwrap();

        assert_eq!(status(&h, "pg").await, first);
        assert_eq!(h.objects.len().await, 1);
    }

    #[tokio::test]
    async fn test_group_deletion_removes_every_member_object() {
        let h = Harness::new().with_class("silver", TRIDENT_PROVISIONER).await;
        with_volumes(&h, &["pg-0", "pg-1", "pg-2"], "pg").await;
        h.store.insert_group_intent(intent("pg", "silver", "pg")).await;
        converge(&h, "pg").await.unwrap();
        assert_eq!(h.objects.len().await, 3);

        h.store.delete_group_intent("apps", "pg").await;
        let intent = h.store.group_intent("apps", "pg").await.unwrap();
        assert!(intent.finalizers().iter().any(|f| f == FINALIZER));

        converge(&h, "pg").await.unwrap();
        assert!(h.store.group_intent("apps", "pg").await.is_none());
        assert_eq!(h.objects.len().await, 0);
    }

    #[tokio::test]
    async fn test_group_spec_change_updates_native_object() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        with_volumes(&h, &["pg-0", "pg-1"], "pg").await;
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;
        converge(&h, "pg").await.unwrap();
        assert_eq!(status(&h, "pg").await.replication.observed_generation, Some(1));

        h.store
            .update_group_intent("apps", "pg", |spec| {
                spec.replication_state = ReplicationRole::Secondary;
                spec.replication_mode = ReplicationMode::Synchronous;
            })
            .await;
        converge(&h, "pg").await.unwrap();

        let objects = h.objects.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].spec_str("/replicationState"), Some("secondary"));
        assert_eq!(objects[0].spec_str("/mirroringMode"), Some("journal"));

        let status = status(&h, "pg").await;
        assert!(status.replication.is_ready());
        assert_eq!(status.replication.observed_role.as_deref(), Some("secondary"));
        assert_eq!(status.replication.observed_generation, Some(2));
        assert_eq!(status.persistent_volume_claims_ref_list, vec!["pg-0", "pg-1"]);
    }

    #[tokio::test]
    async fn test_selector_losing_every_match_keeps_native_object() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        with_volumes(&h, &["pg-0", "pg-1"], "pg").await;
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;
        converge(&h, "pg").await.unwrap();

        with_volumes(&h, &["pg-0", "pg-1"], "other").await;
        assert_matches!(converge(&h, "pg").await, Err(Error::NoVolumesMatched { .. }));

        let lost = status(&h, "pg").await;
        assert_eq!(lost.replication.ready_reason(), Some("SelectorError"));
        assert!(lost.persistent_volume_claims_ref_list.is_empty());
        assert_eq!(lost.replication.observed_role.as_deref(), Some("primary"));
        // Teardown happens on deletion only
        assert_eq!(h.objects.len().await, 1);

        with_volumes(&h, &["pg-1"], "pg").await;
        converge(&h, "pg").await.unwrap();
        let recovered = status(&h, "pg").await;
        assert!(recovered.replication.is_ready());
        assert_eq!(recovered.persistent_volume_claims_ref_list, vec!["pg-1"]);
    }

    #[tokio::test]
    async fn test_group_deletion_retries_until_teardown_succeeds() {
        let h = Harness::new().with_class("gold", CEPH_PROVISIONER).await;
        with_volumes(&h, &["pg-0"], "pg").await;
        h.store.insert_group_intent(intent("pg", "gold", "pg")).await;
        converge(&h, "pg").await.unwrap();

        h.store.delete_group_intent("apps", "pg").await;
        h.objects.fail_with("api timeout").await;

        for _ in 0..2 {
            let err = converge(&h, "pg").await.unwrap_err();
            assert_eq!(err.reason(), "DeletionError");
        }
        let intent = h.store.group_intent("apps", "pg").await.unwrap();
        assert!(intent.finalizers().iter().any(|f| f == FINALIZER));
        assert_eq!(
            intent.status.unwrap().replication.ready_reason(),
            Some("DeletionError")
        );
        assert_eq!(h.objects.len().await, 1);

        h.objects.clear_failure().await;
        converge(&h, "pg").await.unwrap();
        assert!(h.store.group_intent("apps", "pg").await.is_none());
        assert_eq!(h.objects.len().await, 0);
        assert!(h.ctx.locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_named_volume_and_group_keep_separate_objects() {
        let h = Harness::new().with_class("bronze", POWERSTORE_PROVISIONER).await;
        with_volumes(&h, &["pg-0"], "pg").await;
        h.store.insert_group_intent(intent("db", "bronze", "pg")).await;
        let mut volume = UnifiedVolumeReplication::new(
            "db",
            UnifiedVolumeReplicationSpec {
                replication_class: "bronze".into(),
                persistent_volume_claim: "db-data".into(),
                replication_state: ReplicationRole::Secondary,
                replication_mode: ReplicationMode::Asynchronous,
                auto_resync: None,
            },
        );
        volume.metadata.namespace = Some("apps".into());
        h.store.insert_volume_intent(volume).await;

        converge(&h, "db").await.unwrap();
        for _ in 0..2 {
            let current = h.store.volume_intent("apps", "db").await.unwrap();
            replication::reconcile(&current, &h.ctx).await.unwrap();
        }
        assert_eq!(h.objects.len().await, 2);

        h.store.delete_group_intent("apps", "db").await;
        converge(&h, "db").await.unwrap();
        assert!(h.store.group_intent("apps", "db").await.is_none());

        let remaining = h.objects.objects().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "db");
        assert_eq!(remaining[0].spec_str("/action"), Some("target"));
        assert_eq!(
            remaining[0].spec.pointer("/volumes"),
            Some(&serde_json::json!(["db-data"]))
        );
        assert!(h.store.volume_intent("apps", "db").await.is_some());
    }
}
