use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

use super::cluster_profile::{
    HelmChart,
    KustomizationRef,
    PolicyRef,
    StopMatchingBehavior,
    SyncMode,
    TemplateResourceRef,
};
use super::clusters::ClusterId;

pub const EVENT_TRIGGER_FINALIZER: &str = "eventtrigger.finalizer.projectsveltos.io";
pub const FEATURE_EVENT_TRIGGER: &str = "EventTrigger";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum FeatureStatus {
    #[default]
    Provisioning,
    Provisioned,
    Failed,
    Removing,
    Removed,
}

// One entry per destination cluster; `hash` is the fingerprint of the trigger configuration
// last deployed there and is unset while the entry is being removed.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub cluster: ClusterId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    #[serde(default)]
    pub status: FeatureStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "lib.projectsveltos.io", version = "v1beta1", kind = "EventTrigger")]
#[kube(status = "EventTriggerStatus", shortname = "et")]
#[kube(
    printcolumn = r#"{"name":"event source", "type":"string", "description":"name of the referenced EventSource", "jsonPath":".spec.eventSourceName"}"#,
    printcolumn = r#"{"name":"one per event", "type":"boolean", "description":"one ClusterProfile per matching resource", "jsonPath":".spec.oneForEvent"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EventTriggerSpec {
    // Required fields
    pub source_cluster_selector: metav1::LabelSelector,
    pub event_source_name: String,

    // Optional fields; when the destination selector is empty, add-ons deploy into the
    // source cluster itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_cluster_selector: Option<metav1::LabelSelector>,

    #[serde(default)]
    pub one_for_event: bool,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default = "default_tier")]
    pub tier: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_update: Option<IntOrString>,

    #[serde(default)]
    pub continue_on_conflict: bool,

    #[serde(default)]
    pub stop_matching_behavior: StopMatchingBehavior,

    #[serde(default)]
    pub reloader: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_set_refs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_resource_refs: Vec<TemplateResourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_refs: Vec<PolicyRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm_charts: Vec<HelmChart>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kustomization_refs: Vec<KustomizationRef>,

    // Opaque to the core engine; copied verbatim onto derived ClusterProfiles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validate_healths: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTriggerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matching_cluster_refs: Vec<ClusterId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_matching_cluster_refs: Vec<ClusterId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_info: Vec<ClusterInfo>,
}

impl EventTrigger {
    pub fn cluster_info(&self) -> Vec<ClusterInfo> {
        self.status.as_ref().map(|s| s.cluster_info.clone()).unwrap_or_default()
    }
}

fn default_tier() -> i32 {
    100
}
