use std::collections::BTreeMap;
use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use et_api::v1beta1::{
    ClusterProfile,
    ClusterProfileSpec,
    HelmChart,
    KustomizationRef,
    PolicyRef,
    TemplateResourceRef,
    ValueFrom,
};
use et_core::errors::*;
use et_core::k8s::selector_is_empty;
use et_core::prelude::*;
use k8s_openapi::ByteString;
use kube::api::ListParams;
use minijinja::{
    Environment,
    UndefinedBehavior,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::*;

use crate::errors::EtControllerError;
use crate::references::{
    ReferencedResource,
    get_referenced,
    reference_namespace,
};

// Template engine shared by every expansion; a missing key is an error so user typos
// surface instead of rendering empty strings.
fn template_env() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("b64enc", |v: String| b64.encode(v));
        env.add_filter("b64dec", |v: String| -> Result<String, minijinja::Error> {
            let decoded = b64
                .decode(v)
                .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))?;
            String::from_utf8(decoded)
                .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
        });
        env
    })
}

// Failures carry the template identity so users can tell which trigger/cluster pair
// their typo came from
pub fn instantiate(template_name: &str, text: &str, object: &impl Serialize) -> anyhow::Result<String> {
    template_env()
        .render_named_str(template_name, text, object)
        .map_err(|e| anyhow!("failed to instantiate template {template_name}: {e}"))
}

pub fn has_template_syntax(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

pub(crate) fn template_name(cluster: &ClusterId, trigger_name: &str) -> String {
    format!("{}-{}-{}", cluster.namespace, cluster.name, trigger_name)
}

// Instantiates the trigger's templated payload against one EventReport and returns the
// expansion set: every ClusterProfile that should exist for this (trigger, cluster, report).
// A report being deleted, or one with no matching resources, yields an empty set and the
// sweeper takes care of the rest.
pub async fn update_cluster_profiles(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    cluster_value: &serde_json::Value,
    er: &EventReport,
) -> anyhow::Result<Vec<ClusterProfile>> {
    if er.metadata.deletion_timestamp.is_some() || er.spec.matching_resources.is_empty() {
        return Ok(vec![]);
    }

    if trigger.spec.one_for_event {
        one_profile_per_resource(client, report_namespace, trigger, cluster, cluster_value, er).await
    } else {
        one_profile_for_all(client, report_namespace, trigger, cluster, cluster_value, er).await
    }
}

// One expansion over the full resource set; templates see MatchingResources, Resources,
// and Cluster
async fn one_profile_for_all(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    cluster_value: &serde_json::Value,
    er: &EventReport,
) -> anyhow::Result<Vec<ClusterProfile>> {
    let resources = parse_report_resources(er)?;
    let object = json!({
        "MatchingResources": er.spec.matching_resources,
        "Resources": resources,
        "Cluster": cluster_value,
    });

    let labels = derived_object_labels(trigger, cluster, Some(er));
    let profile = instantiate_profile(client, report_namespace, trigger, cluster, &labels, &object).await?;
    Ok(vec![profile])
}

// One expansion per matching resource.  With collected bodies each template sees the
// full Resource; without them Resource is null and templates that dereference it fail.
async fn one_profile_per_resource(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    cluster_value: &serde_json::Value,
    er: &EventReport,
) -> anyhow::Result<Vec<ClusterProfile>> {
    let resources = parse_report_resources(er)?;
    let mut profiles = vec![];

    if resources.is_empty() {
        for mr in &er.spec.matching_resources {
            let object = json!({"MatchingResource": mr, "Resource": serde_json::Value::Null, "Cluster": cluster_value});
            let mut labels = derived_object_labels(trigger, cluster, Some(er));
            labels.extend(resource_labels(mr));
            profiles.push(instantiate_profile(client, report_namespace, trigger, cluster, &labels, &object).await?);
        }
        return Ok(profiles);
    }

    for resource in &resources {
        let mr = object_reference_for(resource);
        let object = json!({"MatchingResource": mr, "Resource": resource, "Cluster": cluster_value});
        let mut labels = derived_object_labels(trigger, cluster, Some(er));
        labels.extend(resource_labels(&mr));
        profiles.push(instantiate_profile(client, report_namespace, trigger, cluster, &labels, &object).await?);
    }

    Ok(profiles)
}

async fn instantiate_profile(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    lookup_labels: &BTreeMap<String, String>,
    object: &serde_json::Value,
) -> anyhow::Result<ClusterProfile> {
    let tname = template_name(cluster, &trigger.name_any());
    let api = kube::Api::<ClusterProfile>::all(client.clone());
    let (name, create) = derived_object_name(&api, lookup_labels).await?;

    let mut labels = lookup_labels.clone();
    labels.extend(tenant_labels(trigger));

    let mut profile = non_instantiated_profile(trigger, &name, &labels);

    profile.spec.template_resource_refs = instantiate_template_resource_refs(&tname, trigger, cluster, object)?;

    match &trigger.spec.destination_cluster_selector {
        Some(sel) if !selector_is_empty(sel) => profile.spec.cluster_selector = Some(sel.clone()),
        _ => profile.spec.cluster_refs = vec![cluster.object_reference()],
    }

    profile.spec.helm_charts =
        instantiate_helm_charts(client, report_namespace, &tname, trigger, cluster, object, &labels).await?;
    profile.spec.kustomization_refs =
        instantiate_kustomization_refs(client, report_namespace, &tname, trigger, cluster, object, &labels).await?;
    profile.spec.policy_refs =
        instantiate_policy_refs(client, report_namespace, &tname, trigger, cluster, object, &labels).await?;

    if create {
        debug!("creating ClusterProfile {name}");
        api.create(&Default::default(), &profile).await?;
    } else {
        debug!("updating ClusterProfile {name}");
        let mut current = api.get(&name).await?;
        current.metadata.labels = profile.metadata.labels.clone();
        current.spec = profile.spec.clone();
        api.replace(&name, &Default::default(), &current).await?;
    }

    Ok(profile)
}

// The profile shell carrying every trigger field that is not templated
fn non_instantiated_profile(trigger: &EventTrigger, name: &str, labels: &BTreeMap<String, String>) -> ClusterProfile {
    let mut profile = ClusterProfile::new(name, ClusterProfileSpec {
        sync_mode: trigger.spec.sync_mode,
        tier: trigger.spec.tier,
        continue_on_conflict: trigger.spec.continue_on_conflict,
        max_update: trigger.spec.max_update.clone(),
        stop_matching_behavior: trigger.spec.stop_matching_behavior,
        reloader: trigger.spec.reloader,
        validate_healths: trigger.spec.validate_healths.clone(),
        patches: trigger.spec.patches.clone(),
        extra_labels: trigger.spec.extra_labels.clone(),
        extra_annotations: trigger.spec.extra_annotations.clone(),
        ..Default::default()
    });
    profile.metadata.labels = Some(labels.clone());
    profile
}

fn instantiate_template_resource_refs(
    tname: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    object: &serde_json::Value,
) -> anyhow::Result<Vec<TemplateResourceRef>> {
    let mut out = Vec::with_capacity(trigger.spec.template_resource_refs.len());
    for tr in &trigger.spec.template_resource_refs {
        let mut instantiated = tr.clone();
        let raw_name = tr.resource.name.clone().unwrap_or_default();
        instantiated.resource.name = Some(instantiate(tname, &raw_name, object)?);
        let raw_ns = tr.resource.namespace.clone().unwrap_or_default();
        instantiated.resource.namespace = Some(reference_namespace(&cluster.namespace, &raw_ns));
        out.push(instantiated);
    }
    Ok(out)
}

// Serialize, template-expand, parse back; then chase each valuesFrom reference
async fn instantiate_helm_charts(
    client: &kube::Client,
    report_namespace: &str,
    tname: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    object: &serde_json::Value,
    labels: &BTreeMap<String, String>,
) -> anyhow::Result<Vec<HelmChart>> {
    let mut charts: Vec<HelmChart> = instantiate_list(tname, &trigger.spec.helm_charts, object)?;
    for chart in &mut charts {
        resolve_values_from(client, report_namespace, &mut chart.values_from, cluster, tname, object, labels).await?;
    }
    Ok(charts)
}

async fn instantiate_kustomization_refs(
    client: &kube::Client,
    report_namespace: &str,
    tname: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    object: &serde_json::Value,
    labels: &BTreeMap<String, String>,
) -> anyhow::Result<Vec<KustomizationRef>> {
    let mut refs: Vec<KustomizationRef> = instantiate_list(tname, &trigger.spec.kustomization_refs, object)?;
    for kr in &mut refs {
        resolve_values_from(client, report_namespace, &mut kr.values_from, cluster, tname, object, labels).await?;
    }
    Ok(refs)
}

fn instantiate_list<T>(tname: &str, items: &[T], object: &serde_json::Value) -> anyhow::Result<Vec<T>>
where
    T: Serialize + DeserializeOwned,
{
    let text = serde_json::to_string(items)?;
    let instantiated = instantiate(tname, &text, object)?;
    Ok(serde_json::from_str(&instantiated)?)
}

// A valuesFrom source marked as a template gets an instantiated copy in the report
// namespace and the reference is redirected there; otherwise the reference resolves to
// the source object directly.  Missing sources are left alone, they may appear later.
async fn resolve_values_from(
    client: &kube::Client,
    report_namespace: &str,
    values_from: &mut [ValueFrom],
    cluster: &ClusterId,
    tname: &str,
    object: &serde_json::Value,
    labels: &BTreeMap<String, String>,
) -> EmptyResult {
    for vf in values_from {
        let ns = reference_namespace(&cluster.namespace, &vf.namespace);
        let Some(res) = get_referenced(client, vf.kind, &ns, &vf.name).await? else {
            debug!("valuesFrom {} {ns}/{} not found, leaving reference as-is", vf.kind, vf.name);
            continue;
        };

        let (ns, name) = if res.is_template() {
            materialize_reference(client, report_namespace, &res, tname, object, labels).await?
        } else {
            (res.namespace(), res.name())
        };
        vf.namespace = ns;
        vf.name = name;
    }
    Ok(())
}

async fn instantiate_policy_refs(
    client: &kube::Client,
    report_namespace: &str,
    tname: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    object: &serde_json::Value,
    labels: &BTreeMap<String, String>,
) -> anyhow::Result<Vec<PolicyRef>> {
    let mut out = vec![];
    for pr in &trigger.spec.policy_refs {
        let ns = reference_namespace(&cluster.namespace, &pr.namespace);
        let Some(res) = get_referenced(client, pr.kind, &ns, &pr.name).await? else {
            debug!("policyRef {} {ns}/{} not found, skipping", pr.kind, pr.name);
            continue;
        };

        let (ns, name) = if res.is_template() {
            materialize_reference(client, report_namespace, &res, tname, object, labels).await?
        } else {
            (res.namespace(), res.name())
        };

        out.push(PolicyRef {
            kind: pr.kind,
            namespace: ns,
            name,
            deployment_type: pr.deployment_type,
        });
    }
    Ok(out)
}

// Instantiates a template-marked ConfigMap/Secret into the report namespace; each data
// value is an independent template.  The derived object's name must depend on the source
// resource too, so an EventTrigger referencing N sources materializes N copies.
async fn materialize_reference(
    client: &kube::Client,
    report_namespace: &str,
    res: &ReferencedResource,
    tname: &str,
    object: &serde_json::Value,
    labels: &BTreeMap<String, String>,
) -> anyhow::Result<(String, String)> {
    let mut content = BTreeMap::new();
    for (k, v) in res.as_text_map()? {
        content.insert(k, instantiate(tname, &v, object)?);
    }

    let mut labels = labels.clone();
    labels.insert(REFERENCED_RESOURCE_NAMESPACE_LABEL.into(), res.namespace());
    labels.insert(REFERENCED_RESOURCE_NAME_LABEL.into(), res.name());

    let name = match res {
        ReferencedResource::ConfigMap(_) => {
            create_or_update_configmap(client, report_namespace, res, &labels, content).await?
        },
        ReferencedResource::Secret(_) => {
            create_or_update_secret(client, report_namespace, res, &labels, content).await?
        },
    };

    Ok((report_namespace.into(), name))
}

async fn create_or_update_configmap(
    client: &kube::Client,
    report_namespace: &str,
    res: &ReferencedResource,
    labels: &BTreeMap<String, String>,
    content: BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let api = kube::Api::<corev1::ConfigMap>::namespaced(client.clone(), report_namespace);
    let (name, create) = derived_object_name(&api, labels).await?;

    if create {
        let cm = corev1::ConfigMap {
            metadata: derived_object_meta(&name, report_namespace, labels, res),
            data: Some(content),
            ..Default::default()
        };
        api.create(&Default::default(), &cm).await?;
    } else {
        let mut current = api.get(&name).await?;
        current.metadata.labels = Some(labels.clone());
        current.data = Some(content);
        api.replace(&name, &Default::default(), &current).await?;
    }
    Ok(name)
}

async fn create_or_update_secret(
    client: &kube::Client,
    report_namespace: &str,
    res: &ReferencedResource,
    labels: &BTreeMap<String, String>,
    content: BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let api = kube::Api::<corev1::Secret>::namespaced(client.clone(), report_namespace);
    let (name, create) = derived_object_name(&api, labels).await?;

    let data: BTreeMap<String, ByteString> =
        content.into_iter().map(|(k, v)| (k, ByteString(v.into_bytes()))).collect();

    if create {
        let secret = corev1::Secret {
            metadata: derived_object_meta(&name, report_namespace, labels, res),
            data: Some(data),
            type_: Some(CLUSTER_PROFILE_SECRET_TYPE.into()),
            ..Default::default()
        };
        api.create(&Default::default(), &secret).await?;
    } else {
        let mut current = api.get(&name).await?;
        current.metadata.labels = Some(labels.clone());
        current.data = Some(data);
        current.type_ = Some(CLUSTER_PROFILE_SECRET_TYPE.into());
        api.replace(&name, &Default::default(), &current).await?;
    }
    Ok(name)
}

fn derived_object_meta(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    res: &ReferencedResource,
) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        labels: Some(labels.clone()),
        // the template-marker annotation rides along on the source
        annotations: Some(res.annotations().clone()),
        ..Default::default()
    }
}

// The label set is the identity of a derived object: zero matches means synthesize a
// fresh name, one means update in place, more than one is a precondition failure that
// needs an operator to intervene.
pub(crate) async fn derived_object_name<K>(
    api: &kube::Api<K>,
    labels: &BTreeMap<String, String>,
) -> anyhow::Result<(String, bool)>
where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let selector = label_selector(labels);
    let matching = api.list(&ListParams::default().labels(&selector)).await?;
    match matching.items.len() {
        0 => Ok((instantiated_object_name(), true)),
        1 => Ok((matching.items[0].name_any(), false)),
        n => bail!(EtControllerError::multiple_matching_objects(&format!("{n} objects match {selector}"))),
    }
}

pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

// On a name collision the create fails and the next reconcile picks a different name
fn instantiated_object_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INSTANTIATED_NAME_SUFFIX_LENGTH)
        .map(char::from)
        .collect();
    format!("{INSTANTIATED_NAME_PREFIX}{}", suffix.to_lowercase())
}

pub fn derived_object_labels(
    trigger: &EventTrigger,
    cluster: &ClusterId,
    er: Option<&EventReport>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (EVENT_TRIGGER_NAME_LABEL.to_string(), trigger.name_any()),
        (CLUSTER_NAMESPACE_LABEL.to_string(), cluster.namespace.clone()),
        (CLUSTER_NAME_LABEL.to_string(), cluster.name.clone()),
        (CLUSTER_TYPE_LABEL.to_string(), cluster.cluster_type.to_string()),
    ]);

    // When sweeping everything a trigger derived for a cluster, no report scoping applies
    if let Some(er) = er {
        labels.insert(EVENT_REPORT_NAME_LABEL.into(), er.name_any());
    }

    labels
}

fn resource_labels(mr: &corev1::ObjectReference) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(RESOURCE_NAME_LABEL.to_string(), mr.name.clone().unwrap_or_default())]);
    if let Some(ns) = mr.namespace.as_ref().filter(|ns| !ns.is_empty()) {
        labels.insert(RESOURCE_NAMESPACE_LABEL.into(), ns.clone());
    }
    labels
}

fn tenant_labels(trigger: &EventTrigger) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for key in [SERVICE_ACCOUNT_NAME_LABEL, SERVICE_ACCOUNT_NAMESPACE_LABEL] {
        if let Some(v) = trigger.labels().get(key) {
            labels.insert(key.into(), v.clone());
        }
    }
    labels
}

fn object_reference_for(resource: &serde_json::Value) -> corev1::ObjectReference {
    let get_str = |ptr: &str| resource.pointer(ptr).and_then(serde_json::Value::as_str).map(String::from);
    corev1::ObjectReference {
        api_version: get_str("/apiVersion"),
        kind: get_str("/kind"),
        namespace: get_str("/metadata/namespace"),
        name: get_str("/metadata/name"),
        ..Default::default()
    }
}

// Splits the report's multi-document payload on "---" lines and parses each document
pub fn parse_report_resources(er: &EventReport) -> anyhow::Result<Vec<serde_json::Value>> {
    let Some(raw) = &er.spec.resources else { return Ok(vec![]) };

    let mut docs = vec![];
    let mut current = String::new();
    for line in raw.lines() {
        if line.trim() == "---" {
            docs.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    docs.push(current);

    let mut resources = vec![];
    for doc in docs {
        if doc.trim().is_empty() {
            continue;
        }
        resources.push(serde_yaml::from_str(&doc)?);
    }
    Ok(resources)
}
