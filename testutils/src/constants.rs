use et_api::v1beta1::ClusterId;
use lazy_static::lazy_static;

pub const TEST_TRIGGER_NAME: &str = "test-trigger";
pub const TEST_EVENT_SOURCE_NAME: &str = "http-services";
pub const TEST_EVENT_REPORT_NAME: &str = "http-services-report";
pub const TEST_CLUSTER_NAMESPACE: &str = "clusters";
pub const TEST_CLUSTER_NAME: &str = "workload-one";
pub const TEST_REPORT_NAMESPACE: &str = "projectsveltos";
pub const TEST_CONFIGMAP_NAME: &str = "render-config";

lazy_static! {
    pub static ref TEST_CLUSTER_ID: ClusterId = ClusterId::sveltos(TEST_CLUSTER_NAMESPACE, TEST_CLUSTER_NAME);
}
