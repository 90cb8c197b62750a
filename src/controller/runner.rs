//! kube-runtime wiring
//!
//! One controller per intent kind. Both also watch replication classes so a
//! class edit re-queues every intent naming it; the group controller also
//! watches PVCs so membership changes are picked up without an intent edit.

use super::{group, replication, Context, Intent, ReconcileAction};
use crate::crd::{
    selector, UnifiedVolumeGroupReplication, UnifiedVolumeReplication,
    UnifiedVolumeReplicationClass,
};
use crate::error::{Error, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::ListParams;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

impl From<ReconcileAction> for Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::RequeueNow => Action::requeue(Duration::ZERO),
            ReconcileAction::AwaitChange => Action::await_change(),
        }
    }
}

async fn reconcile_volume(intent: Arc<UnifiedVolumeReplication>, ctx: Arc<Context>) -> Result<Action> {
    let action = replication::reconcile(&intent, &ctx).await?;
    ctx.backoff.reset(&intent.key());
    Ok(action.into())
}

async fn reconcile_group(
    intent: Arc<UnifiedVolumeGroupReplication>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let action = group::reconcile(&intent, &ctx).await?;
    ctx.backoff.reset(&intent.key());
    Ok(action.into())
}

/// Requeue a failed intent on its own exponential schedule
fn error_policy<K: Intent>(intent: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = intent.key();
    let delay = ctx.backoff.next_delay(&key);
    if error.is_transient() {
        debug!("Retrying {} in {:?} ({})", key, delay, error.reason());
    } else {
        info!(
            "Retrying {} in {:?}; {} needs a fix outside the operator",
            key,
            delay,
            error.reason()
        );
    }
    Action::requeue(delay)
}

/// Intents naming `class`
pub fn intents_for_class<K>(intents: &[Arc<K>], class: &str) -> Vec<ObjectRef<K>>
where
    K: Intent + Resource<DynamicType = ()>,
{
    intents
        .iter()
        .filter(|intent| intent.class_name() == class)
        .map(|intent| ObjectRef::from_obj(intent.as_ref()))
        .collect()
}

/// Group intents in the PVC's namespace whose selector matches its labels
pub fn groups_for_volume(
    groups: &[Arc<UnifiedVolumeGroupReplication>],
    pvc: &PersistentVolumeClaim,
) -> Vec<ObjectRef<UnifiedVolumeGroupReplication>> {
    let namespace = pvc.namespace();
    groups
        .iter()
        .filter(|group| group.namespace() == namespace)
        .filter(|group| selector::matches(&group.spec.selector, pvc.labels()).unwrap_or(false))
        .map(|group| ObjectRef::from_obj(group.as_ref()))
        .collect()
}

fn report<K: Resource>(
    kind: &str,
    result: std::result::Result<(ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>,
) {
    match result {
        Ok((object, _)) => debug!("Reconciled {} {}", kind, object.name),
        // Already logged by the reconciler
        Err(controller::Error::ReconcilerFailed(e, object)) => {
            debug!("{} {} failed: {}", kind, object.name, e)
        }
        Err(e) => warn!("{} controller: {}", kind, e),
    }
}

/// Run both controllers until a shutdown signal arrives
pub async fn run(client: Client, ctx: Arc<Context>) -> Result<()> {
    let classes = Api::<UnifiedVolumeReplicationClass>::all(client.clone());
    let volume_intents = Api::<UnifiedVolumeReplication>::all(client.clone());
    let group_intents = Api::<UnifiedVolumeGroupReplication>::all(client.clone());
    let pvcs = Api::<PersistentVolumeClaim>::all(client);

    for probe in [
        volume_intents.list(&ListParams::default().limit(1)).await.map(|_| ()),
        group_intents.list(&ListParams::default().limit(1)).await.map(|_| ()),
        classes.list(&ListParams::default().limit(1)).await.map(|_| ()),
    ] {
        if let Err(e) = probe {
            error!("Replication CRDs are not queryable ({}); are they installed?", e);
            return Err(e.into());
        }
    }

    let readiness = ctx.clone();
    let volume_controller = Controller::new(volume_intents, watcher::Config::default());
    let volume_cache = volume_controller.store();
    let volumes = volume_controller
        .watches(
            classes.clone(),
            watcher::Config::default(),
            move |class: UnifiedVolumeReplicationClass| {
                intents_for_class(&volume_cache.state(), &class.name_any())
            },
        )
        .shutdown_on_signal()
        .run(
            reconcile_volume,
            error_policy::<UnifiedVolumeReplication>,
            ctx.clone(),
        )
        .for_each(|result| async move { report("UnifiedVolumeReplication", result) });

    let group_controller = Controller::new(group_intents, watcher::Config::default());
    let group_cache = group_controller.store();
    let member_cache = group_cache.clone();
    let groups = group_controller
        .watches(
            classes,
            watcher::Config::default(),
            move |class: UnifiedVolumeReplicationClass| {
                intents_for_class(&group_cache.state(), &class.name_any())
            },
        )
        .watches(
            pvcs,
            watcher::Config::default(),
            move |pvc: PersistentVolumeClaim| groups_for_volume(&member_cache.state(), &pvc),
        )
        .shutdown_on_signal()
        .run(
            reconcile_group,
            error_policy::<UnifiedVolumeGroupReplication>,
            ctx,
        )
        .for_each(|result| async move { report("UnifiedVolumeGroupReplication", result) });

    readiness.set_ready(true);
    info!("Replication controllers started");
    futures::join!(volumes, groups);
    readiness.set_ready(false);
    info!("Replication controllers stopped");
    Ok(())
}
