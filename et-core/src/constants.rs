// Identity labels on derived ClusterProfiles/ConfigMaps/Secrets; together these
// pin a derived object to the (trigger, cluster, event report, resource) that
// produced it
pub const EVENT_TRIGGER_NAME_LABEL: &str = "eventtrigger.lib.projectsveltos.io/eventtriggername";
pub const CLUSTER_NAMESPACE_LABEL: &str = "eventtrigger.lib.projectsveltos.io/clusterNamespace";
pub const CLUSTER_NAME_LABEL: &str = "eventtrigger.lib.projectsveltos.io/clustername";
pub const CLUSTER_TYPE_LABEL: &str = "eventtrigger.lib.projectsveltos.io/clustertype";
pub const EVENT_REPORT_NAME_LABEL: &str = "eventtrigger.lib.projectsveltos.io/eventreportname";
pub const RESOURCE_NAME_LABEL: &str = "eventtrigger.lib.projectsveltos.io/resourcename";
pub const RESOURCE_NAMESPACE_LABEL: &str = "eventtrigger.lib.projectsveltos.io/resourcenamespace";
pub const REFERENCED_RESOURCE_NAME_LABEL: &str = "eventtrigger.lib.projectsveltos.io/refname";
pub const REFERENCED_RESOURCE_NAMESPACE_LABEL: &str = "eventtrigger.lib.projectsveltos.io/refnamespace";

// Tenancy labels copied from a trigger onto everything it derives
pub const SERVICE_ACCOUNT_NAME_LABEL: &str = "projectsveltos.io/serviceaccount-name";
pub const SERVICE_ACCOUNT_NAMESPACE_LABEL: &str = "projectsveltos.io/serviceaccount-namespace";

// Annotations
pub const POLICY_TEMPLATE_ANNOTATION: &str = "projectsveltos.io/template";
pub const DEPLOYED_BY_SVELTOS_ANNOTATION: &str = "projectsveltos.io/deployed-by-sveltos";
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";
pub const SHARD_ANNOTATION: &str = "sharding.projectsveltos.io/shardkey";

// Defaults
pub const REPORT_NAMESPACE: &str = "projectsveltos";
pub const INSTANTIATED_NAME_PREFIX: &str = "sveltos-";
pub const INSTANTIATED_NAME_SUFFIX_LENGTH: usize = 20;
pub const CLUSTER_PROFILE_SECRET_TYPE: &str = "addons.projectsveltos.io/cluster-profile";

// Hash written into a shard-foreign clusterInfo entry that has never been populated
// by its owning replica; base64 of "empty", matching the []byte wire encoding
pub const EMPTY_HASH_SENTINEL: &str = "ZW1wdHk=";

// Timing
pub const RETRY_DELAY_SECONDS: u64 = 5;
pub const ERROR_RETRY_DELAY_SECONDS: u64 = 20;
pub const STATUS_UPDATE_RETRIES: usize = 5;
