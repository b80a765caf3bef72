use std::collections::{
    BTreeMap,
    BTreeSet,
};

use et_api::v1beta1::{
    EVENT_REPORT_CLUSTER_NAME_LABEL,
    EVENT_REPORT_CLUSTER_TYPE_LABEL,
    EVENT_SOURCE_NAME_LABEL,
    ReferencedResourceKind,
    ValueFrom,
};
use et_core::prelude::*;
use kube::api::ListParams;
use tracing::*;

use crate::index::ReferenceKey;

// Referenced resources are either a key-value ConfigMap or a base64 Secret; the rest of
// the engine only ever needs their identity, the template-marker annotation, and the
// data section as text.
pub enum ReferencedResource {
    ConfigMap(corev1::ConfigMap),
    Secret(corev1::Secret),
}

impl ReferencedResource {
    pub fn kind(&self) -> ReferencedResourceKind {
        match self {
            ReferencedResource::ConfigMap(_) => ReferencedResourceKind::ConfigMap,
            ReferencedResource::Secret(_) => ReferencedResourceKind::Secret,
        }
    }

    pub fn namespace(&self) -> String {
        match self {
            ReferencedResource::ConfigMap(cm) => cm.namespace().unwrap_or_default(),
            ReferencedResource::Secret(secret) => secret.namespace().unwrap_or_default(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            ReferencedResource::ConfigMap(cm) => cm.name_any(),
            ReferencedResource::Secret(secret) => secret.name_any(),
        }
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        match self {
            ReferencedResource::ConfigMap(cm) => cm.annotations(),
            ReferencedResource::Secret(secret) => secret.annotations(),
        }
    }

    // The annotation marks the resource as a template to instantiate before use
    pub fn is_template(&self) -> bool {
        self.annotations().contains_key(POLICY_TEMPLATE_ANNOTATION)
    }

    pub fn as_text_map(&self) -> anyhow::Result<BTreeMap<String, String>> {
        match self {
            ReferencedResource::ConfigMap(cm) => Ok(cm.data.clone().unwrap_or_default()),
            ReferencedResource::Secret(secret) => {
                let mut data = BTreeMap::new();
                for (k, v) in secret.data.clone().unwrap_or_default() {
                    data.insert(k, String::from_utf8(v.0)?);
                }
                Ok(data)
            },
        }
    }

    // The data section as rendered into the fingerprint; secret values keep their
    // base64 wire form
    pub fn body_value(&self) -> anyhow::Result<serde_json::Value> {
        match self {
            ReferencedResource::ConfigMap(cm) => Ok(serde_json::to_value(&cm.data)?),
            ReferencedResource::Secret(secret) => Ok(serde_json::to_value(&secret.data)?),
        }
    }
}

// An empty namespace on a reference resolves to the source cluster namespace
pub fn reference_namespace(cluster_namespace: &str, ref_namespace: &str) -> String {
    if ref_namespace.is_empty() {
        cluster_namespace.into()
    } else {
        ref_namespace.into()
    }
}

pub async fn get_referenced(
    client: &kube::Client,
    kind: ReferencedResourceKind,
    namespace: &str,
    name: &str,
) -> anyhow::Result<Option<ReferencedResource>> {
    match kind {
        ReferencedResourceKind::ConfigMap => {
            let api = kube::Api::<corev1::ConfigMap>::namespaced(client.clone(), namespace);
            Ok(api.get_opt(name).await?.map(ReferencedResource::ConfigMap))
        },
        ReferencedResourceKind::Secret => {
            let api = kube::Api::<corev1::Secret>::namespaced(client.clone(), namespace);
            Ok(api.get_opt(name).await?.map(ReferencedResource::Secret))
        },
    }
}

// EventReports produced by a managed cluster for an EventSource, found through the
// labels the agent stamps on them
pub async fn fetch_event_reports(
    client: &kube::Client,
    event_source_name: &str,
    cluster: &ClusterId,
) -> anyhow::Result<Vec<EventReport>> {
    let api = kube::Api::<EventReport>::namespaced(client.clone(), &cluster.namespace);
    let selector = format!(
        "{EVENT_SOURCE_NAME_LABEL}={event_source_name},{EVENT_REPORT_CLUSTER_NAME_LABEL}={},{EVENT_REPORT_CLUSTER_TYPE_LABEL}={}",
        cluster.name,
        cluster.cluster_type.to_string().to_lowercase(),
    );
    let reports = api.list(&ListParams::default().labels(&selector)).await?;
    Ok(reports.items)
}

fn value_from_iter(trigger: &EventTrigger) -> impl Iterator<Item = &ValueFrom> {
    trigger
        .spec
        .helm_charts
        .iter()
        .flat_map(|hc| hc.values_from.iter())
        .chain(trigger.spec.kustomization_refs.iter().flat_map(|kr| kr.values_from.iter()))
}

// Everything the trigger's fingerprint depends on for one cluster, in spec field order:
// policyRefs, then helm valuesFrom, then kustomization valuesFrom, then the EventSource,
// then the cluster's current EventReports.  Missing ConfigMaps/Secrets are skipped, they
// are assumed to appear later.
pub async fn fetch_referenced_bodies(
    client: &kube::Client,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    event_source_name: &str,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut bodies = vec![];

    for pr in &trigger.spec.policy_refs {
        let ns = reference_namespace(&cluster.namespace, &pr.namespace);
        match get_referenced(client, pr.kind, &ns, &pr.name).await? {
            Some(res) => bodies.push(res.body_value()?),
            None => debug!("referenced {} {ns}/{} not found, skipping", pr.kind, pr.name),
        }
    }

    for vf in value_from_iter(trigger) {
        let ns = reference_namespace(&cluster.namespace, &vf.namespace);
        match get_referenced(client, vf.kind, &ns, &vf.name).await? {
            Some(res) => bodies.push(res.body_value()?),
            None => debug!("referenced {} {ns}/{} not found, skipping", vf.kind, vf.name),
        }
    }

    let es_api = kube::Api::<EventSource>::all(client.clone());
    if let Some(es) = es_api.get_opt(event_source_name).await? {
        bodies.push(serde_json::to_value(&es.spec)?);
    }

    for er in fetch_event_reports(client, event_source_name, cluster).await? {
        bodies.push(serde_json::to_value(&er.spec)?);
    }

    Ok(bodies)
}

// The reference keys registered in the index for requeue-on-change; namespaces resolve
// against the given cluster namespace
pub fn trigger_reference_keys(trigger: &EventTrigger, cluster_namespace: &str) -> BTreeSet<ReferenceKey> {
    let mut keys = BTreeSet::new();
    for pr in &trigger.spec.policy_refs {
        keys.insert(ReferenceKey::new(
            &pr.kind.to_string(),
            &reference_namespace(cluster_namespace, &pr.namespace),
            &pr.name,
        ));
    }
    for vf in value_from_iter(trigger) {
        keys.insert(ReferenceKey::new(
            &vf.kind.to_string(),
            &reference_namespace(cluster_namespace, &vf.namespace),
            &vf.name,
        ));
    }
    keys
}
