use et_api::v1beta1::{
    ClusterProfile,
    ClusterProfileSpec,
    PolicyRef,
    ReferencedResourceKind,
};
use et_core::prelude::*;
use httpmock::prelude::*;
use rstest::*;
use serde_json::json;
use testutils::*;

use crate::expander::derived_object_labels;
use crate::sweeper::remove_stale_resources;

fn keep_profile() -> ClusterProfile {
    ClusterProfile::new("sveltos-keep", ClusterProfileSpec {
        policy_refs: vec![PolicyRef {
            kind: ReferencedResourceKind::ConfigMap,
            namespace: TEST_REPORT_NAMESPACE.into(),
            name: "sveltos-cm-keep".into(),
            ..Default::default()
        }],
        ..Default::default()
    })
}

fn profile_list_body(names: &[&str]) -> serde_json::Value {
    json!({
        "kind": "ClusterProfileList",
        "apiVersion": "config.projectsveltos.io/v1beta1",
        "metadata": {},
        "items": names.iter().map(|name| json!({
            "kind": "ClusterProfile",
            "apiVersion": "config.projectsveltos.io/v1beta1",
            "metadata": {"name": name},
            "spec": {},
        })).collect::<Vec<_>>(),
    })
}

fn configmap_list_body(names: &[&str]) -> serde_json::Value {
    json!({
        "kind": "ConfigMapList",
        "apiVersion": "v1",
        "metadata": {},
        "items": names.iter().map(|name| json!({
            "kind": "ConfigMap",
            "apiVersion": "v1",
            "metadata": {"name": name, "namespace": TEST_REPORT_NAMESPACE},
        })).collect::<Vec<_>>(),
    })
}

fn empty_secret_list() -> serde_json::Value {
    json!({
        "kind": "SecretList",
        "apiVersion": "v1",
        "metadata": {},
        "items": [],
    })
}

// Anything scoped to (trigger, cluster) and not referenced by the surviving expansion
// set gets deleted
#[rstest]
#[tokio::test]
async fn test_sweep_deletes_unreferenced(test_trigger: EventTrigger) {
    let (mut fake, client) = make_fake_apiserver();

    fake.handle(|when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.json_body(profile_list_body(&["sveltos-keep", "sveltos-stale"]));
    });
    fake.handle(|when, then| {
        when.method(DELETE).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles/sveltos-stale");
        then.json_body(status_ok());
    });
    fake.handle(|when, then| {
        when.method(GET).path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps"));
        then.json_body(configmap_list_body(&["sveltos-cm-keep", "sveltos-cm-stale"]));
    });
    fake.handle(|when, then| {
        when.method(DELETE)
            .path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps/sveltos-cm-stale"));
        then.json_body(status_ok());
    });
    fake.handle(|when, then| {
        when.method(GET).path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/secrets"));
        then.json_body(empty_secret_list());
    });

    remove_stale_resources(&client, TEST_REPORT_NAMESPACE, &test_trigger, &TEST_CLUSTER_ID, None, &[keep_profile()])
        .await
        .unwrap();
    fake.assert();
}

// An empty expansion set tears down every derived object in scope
#[rstest]
#[tokio::test]
async fn test_sweep_empty_expansion_set_deletes_all(test_trigger: EventTrigger) {
    let (mut fake, client) = make_fake_apiserver();

    fake.handle(|when, then| {
        when.method(GET).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles");
        then.json_body(profile_list_body(&["sveltos-keep"]));
    });
    fake.handle(|when, then| {
        when.method(DELETE).path("/apis/config.projectsveltos.io/v1beta1/clusterprofiles/sveltos-keep");
        then.json_body(status_ok());
    });
    fake.handle(|when, then| {
        when.method(GET).path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps"));
        then.json_body(configmap_list_body(&["sveltos-cm-keep"]));
    });
    fake.handle(|when, then| {
        when.method(DELETE)
            .path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps/sveltos-cm-keep"));
        then.json_body(status_ok());
    });
    fake.handle(|when, then| {
        when.method(GET).path(format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/secrets"));
        then.json_body(empty_secret_list());
    });

    remove_stale_resources(&client, TEST_REPORT_NAMESPACE, &test_trigger, &TEST_CLUSTER_ID, None, &[])
        .await
        .unwrap();
    fake.assert();
}

// The sweep scopes its listing by the derived-object identity labels
#[rstest]
#[tokio::test]
async fn test_sweep_scopes_by_labels(test_trigger: EventTrigger, test_event_report: EventReport) {
    let (mut fake, client) = make_fake_apiserver();

    let labels = derived_object_labels(&test_trigger, &TEST_CLUSTER_ID, Some(&test_event_report));
    let expected = crate::expander::label_selector(&labels);

    for (path, body) in [
        ("/apis/config.projectsveltos.io/v1beta1/clusterprofiles".to_string(), profile_list_body(&[])),
        (format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/configmaps"), configmap_list_body(&[])),
        (format!("/api/v1/namespaces/{TEST_REPORT_NAMESPACE}/secrets"), empty_secret_list()),
    ] {
        let expected = expected.clone();
        fake.handle(move |when, then| {
            when.method(GET).path(&path).query_param("labelSelector", &expected);
            then.json_body(body.clone());
        });
    }

    remove_stale_resources(
        &client,
        TEST_REPORT_NAMESPACE,
        &test_trigger,
        &TEST_CLUSTER_ID,
        Some(&test_event_report),
        &[],
    )
    .await
    .unwrap();
    fake.assert();
}
