use assertables::*;
use et_core::prelude::*;
use httpmock::prelude::*;
use rstest::*;
use serde_json::json;
use testutils::*;

use crate::expander::{
    derived_object_labels,
    update_cluster_profiles,
};

fn empty_profile_list() -> serde_json::Value {
    json!({
        "kind": "ClusterProfileList",
        "apiVersion": "config.projectsveltos.io/v1beta1",
        "metadata": {},
        "items": [],
    })
}

fn empty_configmap_list() -> serde_json::Value {
    json!({
        "kind": "ConfigMapList",
        "apiVersion": "v1",
        "metadata": {},
        "items": [],
    })
}

// Cold deploy of a trigger matching one cluster: one ClusterProfile pinned to the source
// cluster, helm values instantiated from the cluster object, and the templated policy
// ref materialized into the report namespace
#[rstest]
#[tokio::test]
async fn test_expand_cold_deploy(
    test_trigger: EventTrigger,
    test_event_report: EventReport,
    test_sveltos_cluster: et_api::v1beta1::SveltosCluster,
) {
    let (mut fake, client) = make_fake_apiserver();
    let cluster_value = serde_json::to_value(&test_sveltos_cluster).unwrap();

    fake.handle(|when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.json_body(empty_profile_list());
    });

    let cm = test_template_configmap();
    fake.handle(move |when, then| {
        when.method(GET)
            .path(format!("/api/v1/namespaces/{TEST_CLUSTER_NAMESPACE}/configmaps/{TEST_CONFIGMAP_NAME}"));
        then.json_body_obj(&cm);
    });
    fake.handle(|when, then| {
        when.method(GET).path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps"));
        then.json_body(empty_configmap_list());
    });
    fake.handle(|when, then| {
        when.method(POST).path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps"));
        then.status(201).json_body(json!({
            "kind": "ConfigMap",
            "apiVersion": "v1",
            "metadata": {"name": "sveltos-created", "namespace": TEST_REPORT_NAMESPACE},
        }));
    });
    fake.handle(|when, then| {
        when.method(POST).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.status(201).json_body(json!({
            "kind": "ClusterProfile",
            "apiVersion": "config.projectsveltos.io/v1beta1",
            "metadata": {"name": "sveltos-created"},
            "spec": {},
        }));
    });

    let profiles = update_cluster_profiles(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        &cluster_value,
        &test_event_report,
    )
    .await
    .unwrap();

    assert_eq!(profiles.len(), 1);
    let profile = &profiles[0];
    assert_starts_with!(profile.name_any(), INSTANTIATED_NAME_PREFIX);

    // destination selector is empty, so the profile pins the source cluster
    assert_eq!(profile.spec.cluster_refs, vec![TEST_CLUSTER_ID.object_reference()]);
    assert_none!(&profile.spec.cluster_selector);

    // non-templated fields copy straight over
    assert_eq!(profile.spec.tier, 100);

    // helm values instantiated from the cluster object
    assert_eq!(profile.spec.helm_charts[0].values.as_deref(), Some("cluster: workload-one"));

    // the templated policy ref was materialized in the report namespace
    assert_eq!(profile.spec.policy_refs.len(), 1);
    assert_eq!(profile.spec.policy_refs[0].namespace, TEST_REPORT_NAMESPACE);
    assert_starts_with!(profile.spec.policy_refs[0].name, INSTANTIATED_NAME_PREFIX);

    // identity labels pin the profile to (trigger, cluster, report)
    let labels = profile.metadata.labels.clone().unwrap_or_default();
    for (k, v) in derived_object_labels(&test_trigger, &TEST_CLUSTER_ID, Some(&test_event_report)) {
        assert_eq!(labels.get(&k), Some(&v));
    }

    fake.assert();
}

// Per-resource split: two matching resources with collected bodies yield two profiles,
// each labeled with its resource
#[rstest]
#[tokio::test]
async fn test_expand_one_per_resource(
    mut test_trigger: EventTrigger,
    mut test_event_report: EventReport,
    test_sveltos_cluster: et_api::v1beta1::SveltosCluster,
) {
    test_trigger.spec.one_for_event = true;
    test_trigger.spec.policy_refs = vec![];
    test_trigger.spec.helm_charts[0].values = Some("svc: {{ Resource.metadata.name }}".into());

    test_event_report.spec.matching_resources.push(corev1::ObjectReference {
        api_version: Some("v1".into()),
        kind: Some("Service".into()),
        namespace: Some("app".into()),
        name: Some("web".into()),
        ..Default::default()
    });
    test_event_report.spec.resources = Some(
        "apiVersion: v1\nkind: Service\nmetadata:\n  name: api\n  namespace: app\n---\n\
         apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n  namespace: app\n"
            .into(),
    );

    let (mut fake, client) = make_fake_apiserver();
    let cluster_value = serde_json::to_value(&test_sveltos_cluster).unwrap();

    fake.handle_multiple(
        |when, then| {
            when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
            then.json_body(empty_profile_list());
        },
        2,
    );
    fake.handle_multiple(
        |when, then| {
            when.method(POST).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
            then.status(201).json_body(json!({
                "kind": "ClusterProfile",
                "apiVersion": "config.projectsveltos.io/v1beta1",
                "metadata": {"name": "sveltos-created"},
                "spec": {},
            }));
        },
        2,
    );

    let profiles = update_cluster_profiles(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        &cluster_value,
        &test_event_report,
    )
    .await
    .unwrap();

    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].spec.helm_charts[0].values.as_deref(), Some("svc: api"));
    assert_eq!(profiles[1].spec.helm_charts[0].values.as_deref(), Some("svc: web"));

    let labels0 = profiles[0].metadata.labels.clone().unwrap_or_default();
    let labels1 = profiles[1].metadata.labels.clone().unwrap_or_default();
    assert_eq!(labels0.get(RESOURCE_NAME_LABEL), Some(&"api".to_string()));
    assert_eq!(labels1.get(RESOURCE_NAME_LABEL), Some(&"web".to_string()));
    assert_ne!(profiles[0].name_any(), profiles[1].name_any());

    fake.assert();
}

// Without collected bodies, Resource is null and a template that dereferences it is a
// hard failure
#[rstest]
#[tokio::test]
async fn test_expand_null_resource_strict_failure(
    mut test_trigger: EventTrigger,
    test_event_report: EventReport,
    test_sveltos_cluster: et_api::v1beta1::SveltosCluster,
) {
    test_trigger.spec.one_for_event = true;
    test_trigger.spec.policy_refs = vec![];
    test_trigger.spec.helm_charts[0].values = Some("svc: {{ Resource.metadata.name }}".into());

    let (mut fake, client) = make_fake_apiserver();
    let cluster_value = serde_json::to_value(&test_sveltos_cluster).unwrap();

    fake.handle(|when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.json_body(empty_profile_list());
    });

    let err = update_cluster_profiles(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        &cluster_value,
        &test_event_report,
    )
    .await
    .unwrap_err();

    assert_contains!(err.to_string(), "failed to instantiate template");
    fake.assert();
}

// A deleted report (or one with no matches) produces an empty expansion set
#[rstest]
#[tokio::test]
async fn test_expand_empty_on_deleted_report(
    test_trigger: EventTrigger,
    mut test_event_report: EventReport,
    test_sveltos_cluster: et_api::v1beta1::SveltosCluster,
) {
    test_event_report.spec.matching_resources = vec![];

    let (fake, client) = make_fake_apiserver();
    let cluster_value = serde_json::to_value(&test_sveltos_cluster).unwrap();

    let profiles = update_cluster_profiles(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        &cluster_value,
        &test_event_report,
    )
    .await
    .unwrap();

    assert_is_empty!(profiles);
    fake.assert();
}

// A second expansion with an existing profile updates it in place under the same name
#[rstest]
#[tokio::test]
async fn test_expand_updates_in_place(
    mut test_trigger: EventTrigger,
    test_event_report: EventReport,
    test_sveltos_cluster: et_api::v1beta1::SveltosCluster,
) {
    test_trigger.spec.policy_refs = vec![];

    let (mut fake, client) = make_fake_apiserver();
    let cluster_value = serde_json::to_value(&test_sveltos_cluster).unwrap();

    let existing_labels = derived_object_labels(&test_trigger, &TEST_CLUSTER_ID, Some(&test_event_report));
    fake.handle(move |when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.json_body(json!({
            "kind": "ClusterProfileList",
            "apiVersion": "config.projectsveltos.io/v1beta1",
            "metadata": {},
            "items": [{
                "kind": "ClusterProfile",
                "apiVersion": "config.projectsveltos.io/v1beta1",
                "metadata": {"name": "sveltos-existing", "labels": existing_labels},
                "spec": {"tier": 100},
            }],
        }));
    });
    fake.handle(|when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles/sveltos-existing");
        then.json_body(json!({
            "kind": "ClusterProfile",
            "apiVersion": "config.projectsveltos.io/v1beta1",
            "metadata": {"name": "sveltos-existing", "resourceVersion": "41"},
            "spec": {"tier": 100},
        }));
    });
    fake.handle(|when, then| {
        when.method(PUT).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles/sveltos-existing");
        then.json_body(json!({
            "kind": "ClusterProfile",
            "apiVersion": "config.projectsveltos.io/v1beta1",
            "metadata": {"name": "sveltos-existing", "resourceVersion": "42"},
            "spec": {"tier": 100},
        }));
    });

    let profiles = update_cluster_profiles(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        &cluster_value,
        &test_event_report,
    )
    .await
    .unwrap();

    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].name_any(), "sveltos-existing");
    fake.assert();
}

// More than one profile matching the identity label set is a fatal precondition failure
#[rstest]
#[tokio::test]
async fn test_expand_multiple_matches_fatal(
    mut test_trigger: EventTrigger,
    test_event_report: EventReport,
    test_sveltos_cluster: et_api::v1beta1::SveltosCluster,
) {
    test_trigger.spec.policy_refs = vec![];

    let (mut fake, client) = make_fake_apiserver();
    let cluster_value = serde_json::to_value(&test_sveltos_cluster).unwrap();

    fake.handle(|when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.json_body(json!({
            "kind": "ClusterProfileList",
            "apiVersion": "config.projectsveltos.io/v1beta1",
            "metadata": {},
            "items": [
                {"kind": "ClusterProfile", "apiVersion": "config.projectsveltos.io/v1beta1",
                 "metadata": {"name": "sveltos-one"}, "spec": {}},
                {"kind": "ClusterProfile", "apiVersion": "config.projectsveltos.io/v1beta1",
                 "metadata": {"name": "sveltos-two"}, "spec": {}},
            ],
        }));
    });

    let err = update_cluster_profiles(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        &cluster_value,
        &test_event_report,
    )
    .await
    .unwrap_err();

    assert_contains!(err.to_string(), "more than one derived object");
    fake.assert();
}
