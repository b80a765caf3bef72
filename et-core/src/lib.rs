pub mod constants;
pub mod errors;
pub mod jsonutils;
pub mod k8s;
pub mod logging;

pub mod prelude {
    pub use et_api::v1beta1::{
        ClusterId,
        ClusterType,
        EventReport,
        EventSource,
        EventTrigger,
    };
    pub use k8s_openapi::api::core::v1 as corev1;
    pub use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
    pub use kube::{
        CustomResourceExt,
        ResourceExt,
    };

    pub use crate::constants::*;
    pub use crate::errors::EmptyResult;
    pub use crate::k8s::KubeResourceExt;
}
