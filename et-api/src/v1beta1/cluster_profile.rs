use std::collections::BTreeMap;

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum SyncMode {
    OneTime,
    #[default]
    Continuous,
    DryRun,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum StopMatchingBehavior {
    #[default]
    WithdrawPolicies,
    LeavePolicies,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ReferencedResourceKind {
    #[default]
    ConfigMap,
    Secret,
}

impl std::fmt::Display for ReferencedResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReferencedResourceKind::ConfigMap => write!(f, "ConfigMap"),
            ReferencedResourceKind::Secret => write!(f, "Secret"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum DeploymentType {
    #[default]
    Local,
    Remote,
}

// Reference to a ConfigMap/Secret whose contents feed a helm chart or kustomization;
// an empty namespace resolves to the source cluster namespace at instantiation time.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFrom {
    pub kind: ReferencedResourceKind,

    #[serde(default)]
    pub namespace: String,

    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    pub kind: ReferencedResourceKind,

    #[serde(default)]
    pub namespace: String,

    pub name: String,

    #[serde(default)]
    pub deployment_type: DeploymentType,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum HelmChartAction {
    #[default]
    Install,
    Uninstall,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChart {
    pub repository_url: String,
    pub repository_name: String,
    pub chart_name: String,
    pub chart_version: String,
    pub release_name: String,
    pub release_namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValueFrom>,

    #[serde(default)]
    pub helm_chart_action: HelmChartAction,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizationRef {
    #[serde(default)]
    pub namespace: String,

    pub name: String,

    // GitRepository, OCIRepository, Bucket, ConfigMap, or Secret
    pub kind: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub target_namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValueFrom>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateResourceRef {
    pub resource: corev1::ObjectReference,
    pub identifier: String,
}

// The add-on descriptor produced by template expansion; consumed by the downstream
// add-on controller, never executed here.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "config.projectsveltos.io", version = "v1beta1", kind = "ClusterProfile")]
#[serde(rename_all = "camelCase")]
pub struct ClusterProfileSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_refs: Vec<corev1::ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<metav1::LabelSelector>,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default)]
    pub tier: i32,

    #[serde(default)]
    pub continue_on_conflict: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_update: Option<IntOrString>,

    #[serde(default)]
    pub stop_matching_behavior: StopMatchingBehavior,

    #[serde(default)]
    pub reloader: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_resource_refs: Vec<TemplateResourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_refs: Vec<PolicyRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm_charts: Vec<HelmChart>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kustomization_refs: Vec<KustomizationRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validate_healths: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_annotations: BTreeMap<String, String>,
}
