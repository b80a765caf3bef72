use std::collections::BTreeSet;
use std::mem::take;
use std::ops::Deref;
use std::sync::Arc;

use et_api::v1beta1::{
    ClusterInfo,
    EVENT_TRIGGER_FINALIZER,
    EventTriggerStatus,
    FEATURE_EVENT_TRIGGER,
    FeatureStatus,
};
use et_core::errors::*;
use et_core::k8s::{
    ManagedCluster,
    get_cluster,
    is_shard_match,
    labels_match_selector,
    list_clusters,
    selector_is_empty,
};
use et_core::prelude::*;
use futures::Future;
use kube::api::{
    Patch,
    PatchParams,
};
use kube::runtime::controller::Action;
use serde_json::json;
use tokio::time::Duration;
use tracing::*;

use crate::context::ReconcileContext;
use crate::dispatcher::{
    JobKey,
    JobStatus,
};
use crate::errors::EtControllerError;
use crate::fingerprint::fingerprint;
use crate::{
    eventsources,
    expander,
    references,
    sweeper,
};

pub const REQUEUE_DURATION: Duration = Duration::from_secs(RETRY_DELAY_SECONDS);
pub const REQUEUE_ERROR_DURATION: Duration = Duration::from_secs(ERROR_RETRY_DELAY_SECONDS);

#[instrument(parent=None, skip_all, fields(trigger = trigger.name_any()))]
pub async fn reconcile(trigger: Arc<EventTrigger>, ctx: Arc<ReconcileContext>) -> Result<Action, AnyhowError> {
    let trigger = trigger.deref();
    let ctx = ctx.with_trigger(trigger);

    if trigger.metadata.deletion_timestamp.is_some() {
        return reconcile_delete(&ctx, trigger).await.map_err(Into::into);
    }
    reconcile_normal(&ctx, trigger).await.map_err(Into::into)
}

pub fn error_policy(trigger: Arc<EventTrigger>, err: &AnyhowError, _ctx: Arc<ReconcileContext>) -> Action {
    warn!("reconcile failed on eventTrigger {}: {err:#}", trigger.name_any());
    match err.downcast_ref::<EtControllerError>() {
        // Expected while work is queued or racing the other direction; retry soon
        Some(
            EtControllerError::StillQueued(_)
            | EtControllerError::CleanupInProgress(_)
            | EtControllerError::DeployInProgress(_),
        ) => Action::requeue(REQUEUE_DURATION),
        _ => Action::requeue(REQUEUE_ERROR_DURATION),
    }
}

async fn reconcile_normal(ctx: &ReconcileContext, trigger: &EventTrigger) -> anyhow::Result<Action> {
    ensure_finalizer(ctx, trigger).await?;

    let clusters = list_clusters(&ctx.client).await?;
    let mut matched = vec![];
    for mc in &clusters {
        if !mc.is_deleted() && labels_match_selector(mc.labels(), &trigger.spec.source_cluster_selector)? {
            matched.push(mc.clone());
        }
    }
    let matching_refs: BTreeSet<ClusterId> = matched.iter().map(|mc| mc.id()).collect();

    let mut destination_refs = BTreeSet::new();
    if let Some(sel) = &trigger.spec.destination_cluster_selector
        && !selector_is_empty(sel)
    {
        for mc in &clusters {
            if !mc.is_deleted() && labels_match_selector(mc.labels(), sel)? {
                destination_refs.insert(mc.id());
            }
        }
    }

    refresh_index(ctx, trigger, &matched);

    let mut cluster_info = merged_cluster_info(trigger, &matching_refs);
    let outcome = deploy_trigger(ctx, trigger, &matching_refs, &mut cluster_info).await;

    debug!("updating status");
    let status = EventTriggerStatus {
        matching_cluster_refs: matching_refs.into_iter().collect(),
        destination_matching_cluster_refs: destination_refs.into_iter().collect(),
        cluster_info,
    };
    update_trigger_status(ctx, &trigger.name_any(), &status).await?;

    outcome?;
    Ok(Action::await_change())
}

pub(crate) async fn reconcile_delete(ctx: &ReconcileContext, trigger: &EventTrigger) -> anyhow::Result<Action> {
    if !trigger.finalizers().iter().any(|f| f == EVENT_TRIGGER_FINALIZER) {
        return Ok(Action::await_change());
    }

    info!("undeploying eventTrigger");
    let mut cluster_info = trigger.cluster_info();
    let res = undeploy_trigger(ctx, trigger, &mut cluster_info).await;

    let status = EventTriggerStatus {
        cluster_info,
        ..trigger.status.clone().unwrap_or_default()
    };
    update_trigger_status(ctx, &trigger.name_any(), &status).await?;

    res?;

    ctx.index.lock().expect("trigger index mutex poisoned").remove_trigger(&trigger.name_any());
    remove_finalizer(ctx, &trigger.name_any()).await?;
    Ok(Action::await_change())
}

// Visits every known cluster entry; success only when every entry reached Provisioned.
// The first error is retained, later ones just log.  Shard-foreign clusters are left for
// their owning replica, holding their status with the sentinel hash when unset.
pub(crate) async fn deploy_trigger(
    ctx: &ReconcileContext,
    trigger: &EventTrigger,
    matching: &BTreeSet<ClusterId>,
    cluster_info: &mut Vec<ClusterInfo>,
) -> EmptyResult {
    let mut first_err: Option<anyhow::Error> = None;
    let mut keep = vec![];

    for mut ci in take(cluster_info) {
        if !is_cluster_shard_match(ctx, &ci.cluster).await? {
            debug!("cluster {} is not a shard match", ci.cluster);
            if ci.hash.is_none() {
                ci.hash = Some(EMPTY_HASH_SENTINEL.into());
            }
            keep.push(ci);
            continue;
        }

        let res = if matching.contains(&ci.cluster) {
            process_cluster_deploy(ctx, trigger, &mut ci).await
        } else {
            process_cluster_remove(ctx, trigger, &mut ci).await
        };

        match res {
            Ok(ClusterAction::Keep) => keep.push(ci),
            Ok(ClusterAction::Drop) => (),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    warn!("also failed on cluster {}: {e:#}", ci.cluster);
                }
                keep.push(ci);
            },
        }
    }

    let all_provisioned = keep.iter().all(|ci| ci.status == FeatureStatus::Provisioned);
    *cluster_info = keep;

    if let Some(e) = first_err {
        return Err(e);
    }
    if !all_provisioned {
        bail!(EtControllerError::still_queued(&trigger.name_any()));
    }
    Ok(())
}

pub(crate) async fn undeploy_trigger(
    ctx: &ReconcileContext,
    trigger: &EventTrigger,
    cluster_info: &mut Vec<ClusterInfo>,
) -> EmptyResult {
    let mut first_err: Option<anyhow::Error> = None;
    let mut keep = vec![];

    for mut ci in take(cluster_info) {
        if !is_cluster_shard_match(ctx, &ci.cluster).await? {
            // The owning replica removes its own entry
            if ci.status != FeatureStatus::Removed {
                if first_err.is_none() {
                    first_err = Some(anyhow!("remove pending for cluster {}", ci.cluster));
                }
                keep.push(ci);
            }
            continue;
        }

        match process_cluster_remove(ctx, trigger, &mut ci).await {
            Ok(ClusterAction::Drop) => (),
            Ok(ClusterAction::Keep) => keep.push(ci),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    warn!("also failed on cluster {}: {e:#}", ci.cluster);
                }
                keep.push(ci);
            },
        }
    }

    let done = keep.is_empty();
    *cluster_info = keep;

    if let Some(e) = first_err {
        return Err(e);
    }
    if !done {
        bail!("eventTrigger is still being removed from one or more clusters");
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) enum ClusterAction {
    Keep,
    Drop,
}

// Deploy path of the per-cluster state machine: compare the current fingerprint with
// what status last recorded, consult the dispatcher, and either accept the cached
// result, queue a (re)deploy, or wait.
pub(crate) async fn process_cluster_deploy(
    ctx: &ReconcileContext,
    trigger: &EventTrigger,
    ci: &mut ClusterInfo,
) -> anyhow::Result<ClusterAction> {
    let cluster = ci.cluster.clone();

    if !can_proceed(ctx, trigger, &cluster).await? {
        return Ok(ClusterAction::Keep);
    }

    let h_new = fingerprint(&ctx.client, trigger, &cluster).await?;

    let deploy_key = JobKey::deploy(&cluster, &trigger.name_any(), FEATURE_EVENT_TRIGGER);
    let cleanup_key = deploy_key.opposite();

    // Discard any stale queued cleanup for this pair
    ctx.dispatcher.cleanup_entries(&cleanup_key);

    // Redeploying while cleanup for the same pair is running could leave resources
    // missing if two workers interleave
    if ctx.dispatcher.is_in_progress(&cleanup_key) {
        debug!("cleanup is in progress for {cluster}");
        bail!(EtControllerError::cleanup_in_progress(&cleanup_key.to_string()));
    }

    let unchanged = ci.hash.as_deref() == Some(h_new.as_str());
    if !unchanged {
        debug!("eventTrigger changed for {cluster}: previous hash {:?}, current {h_new}", ci.hash);
    }

    if unchanged {
        match ctx.dispatcher.get_result(&deploy_key) {
            JobStatus::Deployed => {
                ci.status = FeatureStatus::Provisioned;
                ci.hash = Some(h_new);
                ci.failure_message = None;
                return Ok(ClusterAction::Keep);
            },
            JobStatus::Failed(msg) => {
                ci.status = FeatureStatus::Failed;
                ci.hash = Some(h_new);
                ci.failure_message = Some(msg.clone());
                bail!("deploy failed in {cluster}: {msg}");
            },
            JobStatus::InProgress => {
                ci.status = FeatureStatus::Provisioning;
                ci.hash = Some(h_new);
                ci.failure_message = None;
                bail!("eventTrigger is still being provisioned in {cluster}");
            },
            JobStatus::Removed | JobStatus::Unavailable => {
                // No usable result for this config; results do not survive restarts, so
                // an entry already marked Provisioned for the same hash stands
                if ci.status == FeatureStatus::Provisioned {
                    debug!("already deployed in {cluster}");
                    ci.failure_message = None;
                    return Ok(ClusterAction::Keep);
                }
            },
        }
    }

    info!("queueing deploy for {cluster}");
    ci.status = FeatureStatus::Provisioning;
    ci.hash = Some(h_new);
    ci.failure_message = None;
    ctx.dispatcher.submit(deploy_key, deploy_handler(ctx, trigger.name_any(), cluster))?;
    Ok(ClusterAction::Keep)
}

// Unmatch path: tear down what the trigger deployed in a cluster it no longer matches.
// Drop means the entry is gone from status; everything else is in flight.
pub(crate) async fn process_cluster_remove(
    ctx: &ReconcileContext,
    trigger: &EventTrigger,
    ci: &mut ClusterInfo,
) -> anyhow::Result<ClusterAction> {
    let cluster = ci.cluster.clone();

    let cleanup_key = JobKey::cleanup(&cluster, &trigger.name_any(), FEATURE_EVENT_TRIGGER);
    let deploy_key = cleanup_key.opposite();

    // Discard any stale queued deploy for this pair
    ctx.dispatcher.cleanup_entries(&deploy_key);

    // Cleaning up while the deploy is still running could leave resources behind
    if ctx.dispatcher.is_in_progress(&deploy_key) {
        debug!("deploy is in progress for {cluster}");
        bail!(EtControllerError::deploy_in_progress(&deploy_key.to_string()));
    }

    match ctx.dispatcher.get_result(&cleanup_key) {
        JobStatus::Removed => {
            debug!("eventTrigger removed from {cluster}");
            return Ok(ClusterAction::Drop);
        },
        JobStatus::InProgress => {
            ci.status = FeatureStatus::Removing;
            ci.hash = None;
            bail!("eventTrigger is still being removed from {cluster}");
        },
        _ => (),
    }

    info!("queueing cleanup for {cluster}");
    ci.status = FeatureStatus::Removing;
    ci.hash = None;
    ci.failure_message = None;
    ctx.dispatcher.submit(cleanup_key, cleanup_handler(ctx, trigger.name_any(), cluster))?;
    bail!("cleanup request is queued for {}", ci.cluster)
}

// The dispatcher-side deploy: install the EventSource in the managed cluster, then
// expand the trigger's payload against the cluster's current EventReports and sweep
// whatever fell out of the expansion set
fn deploy_handler(
    ctx: &ReconcileContext,
    trigger_name: String,
    cluster: ClusterId,
) -> impl Future<Output = EmptyResult> + Send + 'static {
    let client = ctx.client.clone();
    let remote_clients = ctx.remote_clients.clone();
    let report_namespace = ctx.opts.report_namespace.clone();

    async move {
        let api = kube::Api::<EventTrigger>::all(client.clone());
        let Some(trigger) = api.get_opt(&trigger_name).await? else {
            debug!("eventTrigger {trigger_name} not found");
            return Ok(());
        };
        if trigger.metadata.deletion_timestamp.is_some() {
            debug!("eventTrigger {trigger_name} marked for deletion");
            return Ok(());
        }

        eventsources::deploy_event_source(&client, &remote_clients, &trigger, &cluster).await?;
        eventsources::remove_stale_event_sources(&client, &remote_clients, &trigger, &cluster, false).await?;

        let Some(mc) = get_cluster(&client, &cluster).await? else {
            debug!("cluster {cluster} not found");
            return Ok(());
        };
        let cluster_value = mc.to_template_value()?;

        let es_name = eventsources::instantiated_event_source_name(&client, &trigger, &cluster).await?;
        let reports = references::fetch_event_reports(&client, &es_name, &cluster).await?;

        let mut expansion_set = vec![];
        for er in &reports {
            expansion_set.extend(
                expander::update_cluster_profiles(&client, &report_namespace, &trigger, &cluster, &cluster_value, er)
                    .await?,
            );
        }
        sweeper::remove_stale_resources(&client, &report_namespace, &trigger, &cluster, None, &expansion_set).await
    }
}

// The dispatcher-side cleanup: release the remote EventSource (deleting it when no other
// trigger owns it) and delete everything derived for this (trigger, cluster)
fn cleanup_handler(
    ctx: &ReconcileContext,
    trigger_name: String,
    cluster: ClusterId,
) -> impl Future<Output = EmptyResult> + Send + 'static {
    let client = ctx.client.clone();
    let remote_clients = ctx.remote_clients.clone();
    let report_namespace = ctx.opts.report_namespace.clone();

    async move {
        let api = kube::Api::<EventTrigger>::all(client.clone());
        let Some(trigger) = api.get_opt(&trigger_name).await? else {
            debug!("eventTrigger {trigger_name} not found");
            return Ok(());
        };

        eventsources::remove_stale_event_sources(&client, &remote_clients, &trigger, &cluster, true).await?;
        sweeper::remove_stale_resources(&client, &report_namespace, &trigger, &cluster, None, &[]).await
    }
}

pub(crate) async fn is_cluster_shard_match(ctx: &ReconcileContext, cluster: &ClusterId) -> anyhow::Result<bool> {
    match get_cluster(&ctx.client, cluster).await? {
        // A vanished cluster matches so this replica can clear out its leftovers
        None => Ok(true),
        Some(mc) => Ok(is_shard_match(&ctx.opts.shard_key, &mc)),
    }
}

pub(crate) async fn can_proceed(
    ctx: &ReconcileContext,
    trigger: &EventTrigger,
    cluster: &ClusterId,
) -> anyhow::Result<bool> {
    let Some(mc) = get_cluster(&ctx.client, cluster).await? else {
        debug!("cluster {cluster} not found");
        return Ok(false);
    };

    if mc.is_paused() || trigger.annotations().contains_key(PAUSED_ANNOTATION) {
        debug!("cluster {cluster} or eventTrigger is paused");
        return Ok(false);
    }

    if !mc.is_ready() {
        info!("cluster {cluster} is not ready yet");
        return Ok(false);
    }

    Ok(true)
}

// Every matching cluster gets a status entry; entries for clusters that stopped matching
// stick around until the unmatch path removes them
pub(crate) fn merged_cluster_info(trigger: &EventTrigger, matching: &BTreeSet<ClusterId>) -> Vec<ClusterInfo> {
    let mut cluster_info = trigger.cluster_info();
    for cluster in matching {
        if !cluster_info.iter().any(|ci| &ci.cluster == cluster) {
            cluster_info.push(ClusterInfo {
                cluster: cluster.clone(),
                hash: None,
                status: FeatureStatus::Provisioning,
                failure_message: None,
            });
        }
    }
    cluster_info
}

// Rebuilds everything the index knows about this trigger: the EventSources it consumes
// (instantiated per cluster when the name is templated), the clusters it tracks, and the
// ConfigMaps/Secrets its fingerprint depends on
fn refresh_index(ctx: &ReconcileContext, trigger: &EventTrigger, matched: &[ManagedCluster]) {
    let name = trigger.name_any();

    let mut sources = BTreeSet::from([trigger.spec.event_source_name.clone()]);
    let mut reference_keys = BTreeSet::new();
    for mc in matched {
        let id = mc.id();
        if expander::has_template_syntax(&trigger.spec.event_source_name) {
            let instantiated = mc.to_template_value().and_then(|v| {
                expander::instantiate(
                    &expander::template_name(&id, &name),
                    &trigger.spec.event_source_name,
                    &json!({"Cluster": v}),
                )
            });
            match instantiated {
                Ok(n) => {
                    sources.insert(n);
                },
                Err(e) => warn!("could not instantiate EventSource name for {id}: {e:#}"),
            }
        }
        reference_keys.extend(references::trigger_reference_keys(trigger, &id.namespace));
    }

    // Previously matching clusters stay registered until their status entry clears, so
    // a label change still requeues the trigger for the unmatch path
    let mut clusters: BTreeSet<ClusterId> = matched.iter().map(|mc| mc.id()).collect();
    clusters.extend(trigger.cluster_info().iter().map(|ci| ci.cluster.clone()));

    let mut index = ctx.index.lock().expect("trigger index mutex poisoned");
    index.set_trigger(&name, sources, clusters, reference_keys, trigger.spec.source_cluster_selector.clone());
    for mc in matched {
        index.set_cluster_labels(mc.id(), mc.labels().clone());
    }
}

// Status writes are version-conditioned so a stale base never clobbers a newer one; on
// conflict re-read and retry, bounded
pub(crate) async fn update_trigger_status(
    ctx: &ReconcileContext,
    name: &str,
    status: &EventTriggerStatus,
) -> EmptyResult {
    let api = kube::Api::<EventTrigger>::all(ctx.client.clone());

    for _ in 0..STATUS_UPDATE_RETRIES {
        let Some(latest) = api.get_opt(name).await? else { return Ok(()) };
        let patch = json!({
            "metadata": { "resourceVersion": latest.resource_version() },
            "status": status,
        });
        match api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("conflict updating status for {name}, retrying");
                continue;
            },
            Err(e) => return Err(e.into()),
        }
    }
    bail!("status update for {name} exhausted conflict retries")
}

async fn ensure_finalizer(ctx: &ReconcileContext, trigger: &EventTrigger) -> EmptyResult {
    if trigger.finalizers().iter().any(|f| f == EVENT_TRIGGER_FINALIZER) {
        return Ok(());
    }

    let api = kube::Api::<EventTrigger>::all(ctx.client.clone());
    let mut finalizers = trigger.finalizers().to_vec();
    finalizers.push(EVENT_TRIGGER_FINALIZER.into());
    let patch = json!({
        "metadata": { "resourceVersion": trigger.resource_version(), "finalizers": finalizers },
    });
    api.patch(&trigger.name_any(), &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn remove_finalizer(ctx: &ReconcileContext, name: &str) -> EmptyResult {
    let api = kube::Api::<EventTrigger>::all(ctx.client.clone());
    let Some(latest) = api.get_opt(name).await? else { return Ok(()) };

    let finalizers: Vec<_> =
        latest.finalizers().iter().filter(|f| *f != EVENT_TRIGGER_FINALIZER).cloned().collect();
    let patch = json!({
        "metadata": { "resourceVersion": latest.resource_version(), "finalizers": finalizers },
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}
