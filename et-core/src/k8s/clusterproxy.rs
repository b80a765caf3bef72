use std::collections::{
    BTreeMap,
    HashMap,
};

use et_api::v1beta1::{
    CONTROL_PLANE_INITIALIZED_CONDITION,
    Cluster,
    SveltosCluster,
};
use kube::api::ListParams;
use kube::config::{
    KubeConfigOptions,
    Kubeconfig,
};
use tokio::sync::Mutex;
use tracing::*;

use super::*;
use crate::errors::*;
use crate::prelude::*;

// Uniform view over the two managed-cluster flavors; the reconciler only ever needs
// identity, labels, gating flags, and a JSON rendering for template contexts.
#[derive(Clone, Debug)]
pub enum ManagedCluster {
    Capi(Cluster),
    Sveltos(SveltosCluster),
}

impl ManagedCluster {
    pub fn id(&self) -> ClusterId {
        match self {
            ManagedCluster::Capi(c) => {
                ClusterId::capi(&c.namespace().unwrap_or_default(), &c.name_any())
            },
            ManagedCluster::Sveltos(c) => {
                ClusterId::sveltos(&c.namespace().unwrap_or_default(), &c.name_any())
            },
        }
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        match self {
            ManagedCluster::Capi(c) => c.labels(),
            ManagedCluster::Sveltos(c) => c.labels(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            ManagedCluster::Capi(c) => c.metadata.deletion_timestamp.is_some(),
            ManagedCluster::Sveltos(c) => c.metadata.deletion_timestamp.is_some(),
        }
    }

    pub fn is_paused(&self) -> bool {
        match self {
            ManagedCluster::Capi(c) => c.spec.paused,
            ManagedCluster::Sveltos(c) => c.spec.paused,
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            ManagedCluster::Capi(c) => c.status.as_ref().is_some_and(|s| {
                s.control_plane_ready
                    || s.conditions
                        .iter()
                        .any(|cond| cond.type_ == CONTROL_PLANE_INITIALIZED_CONDITION && cond.status == "True")
            }),
            ManagedCluster::Sveltos(c) => c.status.as_ref().is_some_and(|s| s.ready),
        }
    }

    pub fn shard(&self) -> Option<String> {
        let annotations = match self {
            ManagedCluster::Capi(c) => c.annotations(),
            ManagedCluster::Sveltos(c) => c.annotations(),
        };
        annotations.get(SHARD_ANNOTATION).cloned()
    }

    pub fn to_template_value(&self) -> anyhow::Result<serde_json::Value> {
        let v = match self {
            ManagedCluster::Capi(c) => serde_json::to_value(c)?,
            ManagedCluster::Sveltos(c) => serde_json::to_value(c)?,
        };
        Ok(v)
    }
}

pub async fn get_cluster(client: &kube::Client, id: &ClusterId) -> anyhow::Result<Option<ManagedCluster>> {
    match id.cluster_type {
        ClusterType::Capi => {
            let api = kube::Api::<Cluster>::namespaced(client.clone(), &id.namespace);
            Ok(api.get_opt(&id.name).await?.map(ManagedCluster::Capi))
        },
        ClusterType::Sveltos => {
            let api = kube::Api::<SveltosCluster>::namespaced(client.clone(), &id.namespace);
            Ok(api.get_opt(&id.name).await?.map(ManagedCluster::Sveltos))
        },
    }
}

// Lists every managed cluster of both flavors; a missing CAPI CRD installation just
// means there are no CAPI clusters.
pub async fn list_clusters(client: &kube::Client) -> anyhow::Result<Vec<ManagedCluster>> {
    let mut clusters = vec![];

    let capi_api = kube::Api::<Cluster>::all(client.clone());
    match capi_api.list(&ListParams::default()).await {
        Ok(list) => clusters.extend(list.items.into_iter().map(ManagedCluster::Capi)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => (),
        Err(e) => return Err(e.into()),
    }

    let sveltos_api = kube::Api::<SveltosCluster>::all(client.clone());
    match sveltos_api.list(&ListParams::default()).await {
        Ok(list) => clusters.extend(list.items.into_iter().map(ManagedCluster::Sveltos)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => (),
        Err(e) => return Err(e.into()),
    }

    Ok(clusters)
}

pub fn is_shard_match(shard_key: &str, cluster: &ManagedCluster) -> bool {
    cluster.shard().unwrap_or_default() == shard_key
}

pub fn kubeconfig_secret_name(id: &ClusterId) -> String {
    match id.cluster_type {
        ClusterType::Capi => format!("{}-kubeconfig", id.name),
        ClusterType::Sveltos => format!("{}-sveltos-kubeconfig", id.name),
    }
}

const KUBECONFIG_SECRET_KEY: &str = "value";

// Managed-cluster API clients, built from the kubeconfig secret that lives next to the
// cluster object and cached for the life of the process.  kube Clients are cheap to
// clone and shareable across tasks.
pub struct ClusterClientCache {
    client: kube::Client,
    clients: Mutex<HashMap<ClusterId, kube::Client>>,
}

impl ClusterClientCache {
    pub fn new(client: kube::Client) -> ClusterClientCache {
        ClusterClientCache { client, clients: Mutex::new(HashMap::new()) }
    }

    pub async fn remote_client(&self, id: &ClusterId) -> anyhow::Result<kube::Client> {
        if let Some(remote) = self.clients.lock().await.get(id) {
            return Ok(remote.clone());
        }

        let secrets_api = kube::Api::<corev1::Secret>::namespaced(self.client.clone(), &id.namespace);
        let secret_name = kubeconfig_secret_name(id);
        let Some(secret) = secrets_api.get_opt(&secret_name).await? else {
            bail!(KubernetesError::kubeconfig_not_found(&id.to_string()));
        };

        let Some(raw) = secret.data.as_ref().and_then(|d| d.get(KUBECONFIG_SECRET_KEY)) else {
            bail!(KubernetesError::kubeconfig_not_found(&id.to_string()));
        };

        debug!("building API client for {id}");
        let kubeconfig = Kubeconfig::from_yaml(std::str::from_utf8(&raw.0)?)?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let remote = kube::Client::try_from(config)?;

        self.clients.lock().await.insert(id.clone(), remote.clone());
        Ok(remote)
    }

    // Lets tests point a cluster at a fake apiserver without a kubeconfig secret
    pub async fn insert(&self, id: ClusterId, client: kube::Client) {
        self.clients.lock().await.insert(id, client);
    }
}
