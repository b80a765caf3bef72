use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::sync::{
    Arc,
    Mutex,
};

use assertables::*;
use et_core::prelude::*;
use rstest::*;
use testutils::*;

use crate::index::{
    ReferenceKey,
    TriggerIndex,
};
use crate::matcher;

fn fv_selector() -> metav1::LabelSelector {
    metav1::LabelSelector {
        match_labels: Some([("env".to_string(), "fv".to_string())].into()),
        ..Default::default()
    }
}

fn fv_labels() -> BTreeMap<String, String> {
    [("env".to_string(), "fv".to_string())].into()
}

fn populated_index() -> TriggerIndex {
    let mut index = TriggerIndex::new();
    index.set_trigger(
        TEST_TRIGGER_NAME,
        BTreeSet::from([TEST_EVENT_SOURCE_NAME.to_string()]),
        BTreeSet::from([TEST_CLUSTER_ID.clone()]),
        BTreeSet::from([ReferenceKey::new("ConfigMap", TEST_CLUSTER_NAMESPACE, TEST_CONFIGMAP_NAME)]),
        fv_selector(),
    );
    index
}

#[rstest]
fn test_event_source_lookup() {
    let index = populated_index();
    assert_eq!(index.triggers_for_event_source(TEST_EVENT_SOURCE_NAME), vec![TEST_TRIGGER_NAME.to_string()]);
    assert_is_empty!(index.triggers_for_event_source("other-source"));
}

#[rstest]
fn test_reference_lookup() {
    let index = populated_index();
    let rf = ReferenceKey::new("ConfigMap", TEST_CLUSTER_NAMESPACE, TEST_CONFIGMAP_NAME);
    assert_eq!(index.triggers_for_reference(&rf), vec![TEST_TRIGGER_NAME.to_string()]);

    let other = ReferenceKey::new("Secret", TEST_CLUSTER_NAMESPACE, TEST_CONFIGMAP_NAME);
    assert_is_empty!(index.triggers_for_reference(&other));
}

#[rstest]
fn test_cluster_lookup_includes_previous_trackers() {
    let index = populated_index();

    // labels no longer match the selector, but the trigger was tracking this cluster
    // and must get a chance to unmatch
    let triggers = index.triggers_for_cluster(&TEST_CLUSTER_ID, &BTreeMap::new());
    assert_eq!(triggers, vec![TEST_TRIGGER_NAME.to_string()]);
}

#[rstest]
fn test_cluster_lookup_includes_new_matches() {
    let index = populated_index();

    // a cluster the trigger never tracked, with labels that now match its selector
    let new_cluster = ClusterId::capi(TEST_CLUSTER_NAMESPACE, "workload-two");
    let triggers = index.triggers_for_cluster(&new_cluster, &fv_labels());
    assert_eq!(triggers, vec![TEST_TRIGGER_NAME.to_string()]);

    // deduplicated when both conditions hold
    let triggers = index.triggers_for_cluster(&TEST_CLUSTER_ID, &fv_labels());
    assert_eq!(triggers, vec![TEST_TRIGGER_NAME.to_string()]);
}

#[rstest]
fn test_set_trigger_replaces_membership() {
    let mut index = populated_index();
    index.set_trigger(
        TEST_TRIGGER_NAME,
        BTreeSet::from(["new-source".to_string()]),
        BTreeSet::new(),
        BTreeSet::new(),
        fv_selector(),
    );

    assert_is_empty!(index.triggers_for_event_source(TEST_EVENT_SOURCE_NAME));
    assert_eq!(index.triggers_for_event_source("new-source"), vec![TEST_TRIGGER_NAME.to_string()]);
    assert_is_empty!(index.triggers_for_cluster(&TEST_CLUSTER_ID, &BTreeMap::new()));
}

#[rstest]
fn test_remove_trigger() {
    let mut index = populated_index();
    index.remove_trigger(TEST_TRIGGER_NAME);

    assert_is_empty!(index.triggers_for_event_source(TEST_EVENT_SOURCE_NAME));
    assert_is_empty!(index.triggers_for_cluster(&TEST_CLUSTER_ID, &fv_labels()));
    assert_is_empty!(index.triggers_for_reference(&ReferenceKey::new(
        "ConfigMap",
        TEST_CLUSTER_NAMESPACE,
        TEST_CONFIGMAP_NAME
    )));
}

#[rstest]
fn test_matcher_refreshes_label_snapshot(test_event_report: EventReport) {
    let index = Arc::new(Mutex::new(populated_index()));

    let event = matcher::ManagedClusterEvent { id: TEST_CLUSTER_ID.clone(), labels: fv_labels() };
    let triggers = matcher::triggers_for_cluster(&index, &event);
    assert_eq!(triggers, vec![TEST_TRIGGER_NAME.to_string()]);
    assert_eq!(index.lock().unwrap().cluster_labels(&TEST_CLUSTER_ID), Some(&fv_labels()));

    let triggers = matcher::triggers_for_event_report(&index, &test_event_report);
    assert_eq!(triggers, vec![TEST_TRIGGER_NAME.to_string()]);
}
