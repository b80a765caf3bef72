use et_core::errors::*;
use et_core::k8s::{
    ClusterClientCache,
    add_owner_reference,
    get_cluster,
    has_owner_reference,
    remove_owner_reference,
};
use et_core::prelude::*;
use serde_json::json;
use tracing::*;

use crate::expander::{
    has_template_syntax,
    instantiate,
    template_name,
};
use crate::references::fetch_event_reports;

// The EventSource name on a trigger may itself be a template over the source cluster
// object, so the same trigger can install differently named sources per cluster
pub async fn instantiated_event_source_name(
    client: &kube::Client,
    trigger: &EventTrigger,
    cluster: &ClusterId,
) -> anyhow::Result<String> {
    let raw = &trigger.spec.event_source_name;
    if !has_template_syntax(raw) {
        return Ok(raw.clone());
    }

    let Some(mc) = get_cluster(client, cluster).await? else {
        bail!("cluster {cluster} not found");
    };
    let cluster_value = mc.to_template_value()?;
    instantiate(&template_name(cluster, &trigger.name_any()), raw, &json!({"Cluster": cluster_value}))
}

// Installs (creates or updates) the referenced EventSource in the managed cluster.  A
// missing EventSource in the management cluster is a no-op; the agent CRDs are installed
// out of band.  Every trigger that wants the source appears in its owner references.
pub async fn deploy_event_source(
    client: &kube::Client,
    remote_clients: &ClusterClientCache,
    trigger: &EventTrigger,
    cluster: &ClusterId,
) -> EmptyResult {
    let es_name = instantiated_event_source_name(client, trigger, cluster).await?;

    let es_api = kube::Api::<EventSource>::all(client.clone());
    let Some(event_source) = es_api.get_opt(&es_name).await? else {
        info!("EventSource {es_name} not found");
        return Ok(());
    };

    let remote = remote_clients.remote_client(cluster).await?;
    let remote_api = kube::Api::<EventSource>::all(remote);

    match remote_api.get_opt(&es_name).await? {
        Some(mut current) => {
            debug!("updating EventSource {es_name} in {cluster}");
            current.spec = event_source.spec.clone();
            // Labels copy over so the agent can impersonate a tenant admin when set
            current.metadata.labels = event_source.metadata.labels.clone();
            current
                .metadata
                .annotations
                .get_or_insert_default()
                .insert(DEPLOYED_BY_SVELTOS_ANNOTATION.into(), "true".into());
            add_owner_reference(&mut current.metadata, trigger);
            remote_api.replace(&es_name, &Default::default(), &current).await?;
        },
        None => {
            debug!("creating EventSource {es_name} in {cluster}");
            let mut obj = EventSource::new(&es_name, event_source.spec.clone());
            obj.metadata.labels = event_source.metadata.labels.clone();
            obj.metadata.annotations =
                Some([(DEPLOYED_BY_SVELTOS_ANNOTATION.to_string(), "true".to_string())].into());
            add_owner_reference(&mut obj.metadata, trigger);
            remote_api.create(&Default::default(), &obj).await?;
        },
    }

    Ok(())
}

// Walks every EventSource in the managed cluster and drops this trigger from the ones it
// no longer references (all of them when removeAll is set or the trigger is going away).
// A source with no owners left is deleted, along with every EventReport it produced in
// the management cluster.
pub async fn remove_stale_event_sources(
    client: &kube::Client,
    remote_clients: &ClusterClientCache,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    remove_all: bool,
) -> EmptyResult {
    let remote = remote_clients.remote_client(cluster).await?;
    let remote_api = kube::Api::<EventSource>::all(remote);

    let current_name = instantiated_event_source_name(client, trigger, cluster).await?;

    for mut es in remote_api.list(&Default::default()).await?.items {
        let es_name = es.name_any();

        if !remove_all && trigger.metadata.deletion_timestamp.is_none() && es_name == current_name {
            // still referenced
            continue;
        }

        if !has_owner_reference(&es.metadata, trigger) {
            continue;
        }

        debug!("removing owner reference from EventSource {es_name} in {cluster}");
        remove_owner_reference(&mut es.metadata, trigger);

        if !es.owner_references().is_empty() {
            // other triggers still want this source installed
            remote_api.replace(&es_name, &Default::default(), &es).await?;
            continue;
        }

        remove_stale_event_reports(client, &es_name, cluster).await?;

        info!("deleting EventSource {es_name} from {cluster}");
        remote_api.delete(&es_name, &Default::default()).await?;
    }

    Ok(())
}

pub async fn remove_stale_event_reports(client: &kube::Client, es_name: &str, cluster: &ClusterId) -> EmptyResult {
    let api = kube::Api::<EventReport>::namespaced(client.clone(), &cluster.namespace);
    for er in fetch_event_reports(client, es_name, cluster).await? {
        info!("deleting EventReport {}", er.namespaced_name());
        api.delete(&er.name_any(), &Default::default()).await?;
    }
    Ok(())
}
