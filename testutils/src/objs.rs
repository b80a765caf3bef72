use et_api::v1beta1::{
    ClusterType,
    EVENT_REPORT_CLUSTER_NAME_LABEL,
    EVENT_REPORT_CLUSTER_TYPE_LABEL,
    EVENT_SOURCE_NAME_LABEL,
    EventReport,
    EventReportSpec,
    EventSource,
    EventSourceSpec,
    EventTrigger,
    EventTriggerSpec,
    HelmChart,
    PolicyRef,
    ReferencedResourceKind,
    ResourceSelector,
    SveltosCluster,
    SveltosClusterSpec,
    SveltosClusterStatus,
};
use et_core::prelude::*;
use rstest::*;

use crate::constants::*;

#[fixture]
pub fn test_trigger() -> EventTrigger {
    let mut trigger = EventTrigger::new(TEST_TRIGGER_NAME, EventTriggerSpec {
        source_cluster_selector: metav1::LabelSelector {
            match_labels: Some([("env".to_string(), "fv".to_string())].into()),
            ..Default::default()
        },
        event_source_name: TEST_EVENT_SOURCE_NAME.into(),
        tier: 100,
        policy_refs: vec![PolicyRef {
            kind: ReferencedResourceKind::ConfigMap,
            namespace: "".into(),
            name: TEST_CONFIGMAP_NAME.into(),
            ..Default::default()
        }],
        helm_charts: vec![test_helm_chart()],
        ..Default::default()
    });
    trigger.metadata.uid = Some("1234-asdf".into());
    trigger
}

pub fn test_helm_chart() -> HelmChart {
    HelmChart {
        repository_url: "https://kyverno.github.io/kyverno".into(),
        repository_name: "kyverno".into(),
        chart_name: "kyverno/kyverno".into(),
        chart_version: "v3.0.1".into(),
        release_name: "kyverno-latest".into(),
        release_namespace: "kyverno".into(),
        values: Some("cluster: {{ Cluster.metadata.name }}".into()),
        ..Default::default()
    }
}

#[fixture]
pub fn test_event_source() -> EventSource {
    EventSource::new(TEST_EVENT_SOURCE_NAME, EventSourceSpec {
        resource_selectors: vec![ResourceSelector {
            version: "v1".into(),
            kind: "Service".into(),
            ..Default::default()
        }],
        collect_resources: false,
    })
}

#[fixture]
pub fn test_event_report() -> EventReport {
    let mut er = EventReport::new(TEST_EVENT_REPORT_NAME, EventReportSpec {
        event_source_name: TEST_EVENT_SOURCE_NAME.into(),
        cluster_namespace: TEST_CLUSTER_NAMESPACE.into(),
        cluster_name: TEST_CLUSTER_NAME.into(),
        cluster_type: ClusterType::Sveltos,
        matching_resources: vec![corev1::ObjectReference {
            api_version: Some("v1".into()),
            kind: Some("Service".into()),
            namespace: Some("app".into()),
            name: Some("api".into()),
            ..Default::default()
        }],
        resources: None,
    });
    er.metadata.namespace = Some(TEST_CLUSTER_NAMESPACE.into());
    er.metadata.labels = Some(
        [
            (EVENT_SOURCE_NAME_LABEL.to_string(), TEST_EVENT_SOURCE_NAME.to_string()),
            (EVENT_REPORT_CLUSTER_NAME_LABEL.to_string(), TEST_CLUSTER_NAME.to_string()),
            (EVENT_REPORT_CLUSTER_TYPE_LABEL.to_string(), "sveltos".to_string()),
        ]
        .into(),
    );
    er
}

#[fixture]
pub fn test_sveltos_cluster() -> SveltosCluster {
    let mut cluster = SveltosCluster::new(TEST_CLUSTER_NAME, SveltosClusterSpec::default());
    cluster.metadata.namespace = Some(TEST_CLUSTER_NAMESPACE.into());
    cluster.metadata.labels = Some([("env".to_string(), "fv".to_string())].into());
    cluster.status = Some(SveltosClusterStatus { ready: true, version: None });
    cluster
}

#[fixture]
pub fn test_template_configmap() -> corev1::ConfigMap {
    corev1::ConfigMap {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_CLUSTER_NAMESPACE.into()),
            name: Some(TEST_CONFIGMAP_NAME.into()),
            annotations: Some([(POLICY_TEMPLATE_ANNOTATION.to_string(), "ok".to_string())].into()),
            ..Default::default()
        },
        data: Some(
            [(
                "service.yaml".to_string(),
                "service: {{ MatchingResources[0].name }}\ncluster: {{ Cluster.metadata.name }}".to_string(),
            )]
            .into(),
        ),
        ..Default::default()
    }
}
