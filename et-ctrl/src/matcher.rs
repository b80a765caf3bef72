use std::sync::{
    Arc,
    Mutex,
};

use et_api::v1beta1::ReferencedResourceKind;
use et_core::prelude::*;
use tracing::*;

use crate::index::{
    ReferenceKey,
    TriggerIndex,
};

// Fan-out from watch events to the triggers that need re-reconciling.  These run as
// Controller::watches mappers and do no I/O; everything they need is in the index.

pub fn triggers_for_event_report(index: &Arc<Mutex<TriggerIndex>>, er: &EventReport) -> Vec<String> {
    debug!("reacting to eventReport change {}", er.namespaced_name());
    let index = index.lock().expect("trigger index mutex poisoned");
    index.triggers_for_event_source(&er.spec.event_source_name)
}

pub fn triggers_for_event_source(index: &Arc<Mutex<TriggerIndex>>, es: &EventSource) -> Vec<String> {
    debug!("reacting to eventSource change {}", es.name_any());
    let index = index.lock().expect("trigger index mutex poisoned");
    index.triggers_for_event_source(&es.name_any())
}

// A label update both re-reconciles previously matching triggers (so they can unmatch)
// and triggers that match the new labels; the label snapshot refreshes as a side effect.
pub fn triggers_for_cluster(index: &Arc<Mutex<TriggerIndex>>, cluster: &ManagedClusterEvent) -> Vec<String> {
    debug!("reacting to cluster change {}", cluster.id);
    let mut index = index.lock().expect("trigger index mutex poisoned");
    index.set_cluster_labels(cluster.id.clone(), cluster.labels.clone());
    index.triggers_for_cluster(&cluster.id, &cluster.labels)
}

pub fn triggers_for_reference(index: &Arc<Mutex<TriggerIndex>>, rf: &ReferenceKey) -> Vec<String> {
    debug!("reacting to {} change {}/{}", rf.kind, rf.namespace, rf.name);
    let index = index.lock().expect("trigger index mutex poisoned");
    index.triggers_for_reference(rf)
}

// What the cluster mappers extract from a watched cluster object
pub struct ManagedClusterEvent {
    pub id: ClusterId,
    pub labels: std::collections::BTreeMap<String, String>,
}

pub fn reference_key_for_configmap(cm: &corev1::ConfigMap) -> ReferenceKey {
    ReferenceKey::new(
        &ReferencedResourceKind::ConfigMap.to_string(),
        &cm.namespace().unwrap_or_default(),
        &cm.name_any(),
    )
}

pub fn reference_key_for_secret(secret: &corev1::Secret) -> ReferenceKey {
    ReferenceKey::new(
        &ReferencedResourceKind::Secret.to_string(),
        &secret.namespace().unwrap_or_default(),
        &secret.name_any(),
    )
}
