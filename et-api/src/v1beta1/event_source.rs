use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

use super::clusters::ClusterType;

// Labels the managed-cluster agent stamps on every EventReport it pushes to the
// management cluster; the reconciler lists reports by these.
pub const EVENT_SOURCE_NAME_LABEL: &str = "projectsveltos.io/eventsource-name";
pub const EVENT_REPORT_CLUSTER_NAME_LABEL: &str = "eventreport.projectsveltos.io/cluster-name";
pub const EVENT_REPORT_CLUSTER_TYPE_LABEL: &str = "eventreport.projectsveltos.io/cluster-type";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum FilterOperation {
    #[default]
    Equal,
    Different,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelFilter {
    pub key: String,
    pub operation: FilterOperation,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(default)]
    pub group: String,

    pub version: String,
    pub kind: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_filters: Vec<LabelFilter>,

    // Lua script evaluated by the agent against each candidate resource
    #[serde(default)]
    pub evaluate: String,
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "lib.projectsveltos.io", version = "v1beta1", kind = "EventSource")]
#[serde(rename_all = "camelCase")]
pub struct EventSourceSpec {
    pub resource_selectors: Vec<ResourceSelector>,

    // When set, the agent ships full resource bodies in EventReports, not just references
    #[serde(default)]
    pub collect_resources: bool,
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "lib.projectsveltos.io", version = "v1beta1", kind = "EventReport", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct EventReportSpec {
    pub event_source_name: String,

    pub cluster_namespace: String,
    pub cluster_name: String,
    pub cluster_type: ClusterType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matching_resources: Vec<corev1::ObjectReference>,

    // Multi-document payload, one document per matching resource, separated by "---"
    // lines; present only when the EventSource opted into resource collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<String>,
}
