use std::collections::BTreeSet;

use et_api::v1beta1::ClusterProfile;
use et_core::prelude::*;
use kube::api::ListParams;
use tracing::*;

use crate::expander::{
    derived_object_labels,
    label_selector,
};
use crate::index::ReferenceKey;

// Removes every derived object scoped to (trigger, cluster) that the current expansion
// set no longer references.  Called with an empty set on trigger deletion or cluster
// unmatch, which deletes everything in scope.
pub async fn remove_stale_resources(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    er: Option<&EventReport>,
    expansion_set: &[ClusterProfile],
) -> EmptyResult {
    remove_stale_cluster_profiles(client, trigger, cluster, er, expansion_set).await?;

    // Derived ConfigMaps/Secrets survive only while some surviving profile references
    // them through a policyRef or a valuesFrom
    let needed = needed_references(expansion_set);
    remove_stale_configmaps(client, report_namespace, trigger, cluster, er, &needed).await?;
    remove_stale_secrets(client, report_namespace, trigger, cluster, er, &needed).await?;

    Ok(())
}

fn needed_references(expansion_set: &[ClusterProfile]) -> BTreeSet<ReferenceKey> {
    let mut needed = BTreeSet::new();
    for profile in expansion_set {
        for pr in &profile.spec.policy_refs {
            needed.insert(ReferenceKey::new(&pr.kind.to_string(), &pr.namespace, &pr.name));
        }
        for vf in profile
            .spec
            .helm_charts
            .iter()
            .flat_map(|hc| hc.values_from.iter())
            .chain(profile.spec.kustomization_refs.iter().flat_map(|kr| kr.values_from.iter()))
        {
            needed.insert(ReferenceKey::new(&vf.kind.to_string(), &vf.namespace, &vf.name));
        }
    }
    needed
}

async fn remove_stale_cluster_profiles(
    client: &kube::Client,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    er: Option<&EventReport>,
    expansion_set: &[ClusterProfile],
) -> EmptyResult {
    let current: BTreeSet<String> = expansion_set.iter().map(|p| p.name_any()).collect();

    let api = kube::Api::<ClusterProfile>::all(client.clone());
    let labels = derived_object_labels(trigger, cluster, er);
    let profiles = api.list(&ListParams::default().labels(&label_selector(&labels))).await?;

    for profile in profiles.items {
        if !current.contains(&profile.name_any()) {
            info!("deleting stale ClusterProfile {}", profile.name_any());
            api.delete(&profile.name_any(), &Default::default()).await?;
        }
    }
    Ok(())
}

async fn remove_stale_configmaps(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    er: Option<&EventReport>,
    needed: &BTreeSet<ReferenceKey>,
) -> EmptyResult {
    let api = kube::Api::<corev1::ConfigMap>::namespaced(client.clone(), report_namespace);
    let labels = derived_object_labels(trigger, cluster, er);
    let configmaps = api.list(&ListParams::default().labels(&label_selector(&labels))).await?;

    for cm in configmaps.items {
        let key = ReferenceKey::new("ConfigMap", &cm.namespace().unwrap_or_default(), &cm.name_any());
        if !needed.contains(&key) {
            info!("deleting stale ConfigMap {}", cm.namespaced_name());
            api.delete(&cm.name_any(), &Default::default()).await?;
        }
    }
    Ok(())
}

async fn remove_stale_secrets(
    client: &kube::Client,
    report_namespace: &str,
    trigger: &EventTrigger,
    cluster: &ClusterId,
    er: Option<&EventReport>,
    needed: &BTreeSet<ReferenceKey>,
) -> EmptyResult {
    let api = kube::Api::<corev1::Secret>::namespaced(client.clone(), report_namespace);
    let labels = derived_object_labels(trigger, cluster, er);
    let secrets = api.list(&ListParams::default().labels(&label_selector(&labels))).await?;

    for secret in secrets.items {
        let key = ReferenceKey::new("Secret", &secret.namespace().unwrap_or_default(), &secret.name_any());
        if !needed.contains(&key) {
            info!("deleting stale Secret {}", secret.namespaced_name());
            api.delete(&secret.name_any(), &Default::default()).await?;
        }
    }
    Ok(())
}
