use std::fmt;

use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

// The controller programs two flavors of managed cluster: Cluster-API clusters and
// Sveltos-registered clusters.  Everything downstream (labels, dispatcher keys, status
// entries) identifies a cluster by (type, namespace, name).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ClusterType {
    #[default]
    Capi,
    Sveltos,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterType::Capi => write!(f, "Capi"),
            ClusterType::Sveltos => write!(f, "Sveltos"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterId {
    pub cluster_type: ClusterType,
    pub namespace: String,
    pub name: String,
}

impl ClusterId {
    pub fn new(cluster_type: ClusterType, namespace: &str, name: &str) -> ClusterId {
        ClusterId {
            cluster_type,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn capi(namespace: &str, name: &str) -> ClusterId {
        ClusterId::new(ClusterType::Capi, namespace, name)
    }

    pub fn sveltos(namespace: &str, name: &str) -> ClusterId {
        ClusterId::new(ClusterType::Sveltos, namespace, name)
    }

    pub fn api_version(&self) -> String {
        match self.cluster_type {
            ClusterType::Capi => format!("{CAPI_GROUP}/{}", super::API_VERSION),
            ClusterType::Sveltos => format!("{}/{}", super::API_GROUP, super::API_VERSION),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.cluster_type {
            ClusterType::Capi => "Cluster",
            ClusterType::Sveltos => "SveltosCluster",
        }
    }

    pub fn object_reference(&self) -> corev1::ObjectReference {
        corev1::ObjectReference {
            api_version: Some(self.api_version()),
            kind: Some(self.kind().into()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            ..Default::default()
        }
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}/{}", self.cluster_type, self.namespace, self.name)
    }
}

pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

// Minimal typed view of a Cluster-API cluster; only the fields the reconciler reads.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "cluster.x-k8s.io", version = "v1beta1", kind = "Cluster", namespaced)]
#[kube(status = "CapiClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub paused: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterStatus {
    #[serde(default)]
    pub control_plane_ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CapiCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapiCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

pub const CONTROL_PLANE_INITIALIZED_CONDITION: &str = "ControlPlaneInitialized";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "lib.projectsveltos.io", version = "v1beta1", kind = "SveltosCluster", namespaced)]
#[kube(status = "SveltosClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct SveltosClusterSpec {
    #[serde(default)]
    pub paused: bool,

    // Name of the secret holding the kubeconfig; defaults to "<cluster>-sveltos-kubeconfig"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SveltosClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod test {
    use assertables::*;
    use rstest::*;

    use super::*;

    #[rstest]
    fn test_cluster_id_display() {
        assert_eq!(ClusterId::capi("clusters", "workload-one").to_string(), "Capi:clusters/workload-one");
        assert_eq!(ClusterId::sveltos("clusters", "workload-one").to_string(), "Sveltos:clusters/workload-one");
    }

    #[rstest]
    fn test_cluster_id_object_reference() {
        let rf = ClusterId::sveltos("clusters", "workload-one").object_reference();
        assert_eq!(rf.api_version.as_deref(), Some("lib.projectsveltos.io/v1beta1"));
        assert_eq!(rf.kind.as_deref(), Some("SveltosCluster"));
        assert_eq!(rf.namespace.as_deref(), Some("clusters"));
        assert_eq!(rf.name.as_deref(), Some("workload-one"));

        let rf = ClusterId::capi("clusters", "workload-two").object_reference();
        assert_eq!(rf.api_version.as_deref(), Some("cluster.x-k8s.io/v1beta1"));
        assert_eq!(rf.kind.as_deref(), Some("Cluster"));
    }

    #[rstest]
    fn test_cluster_id_ordering_dedups() {
        let c1 = ClusterId::sveltos("clusters", "workload-one");
        let c2 = ClusterId::sveltos("clusters", "workload-one");
        let set: std::collections::BTreeSet<_> = [c1, c2].into();
        assert_eq!(set.len(), 1);
        assert!(!set.contains(&ClusterId::capi("clusters", "workload-one")));
    }
}
