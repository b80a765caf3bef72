use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use et_core::jsonutils;
use et_core::prelude::*;
use sha2::{
    Digest,
    Sha256,
};

use crate::eventsources::instantiated_event_source_name;
use crate::references::fetch_referenced_bodies;

// Digest of everything that makes up the trigger's configuration for one cluster: the
// rendered spec, the trigger labels, and the bodies of every referenced resource, in
// spec field order.  Deterministic across replicas; this is the "config changed since
// last successful deploy" comparison key.  Returned base64-encoded, the wire form of a
// JSON byte array.
pub async fn fingerprint(
    client: &kube::Client,
    trigger: &EventTrigger,
    cluster: &ClusterId,
) -> anyhow::Result<String> {
    let mut config = String::new();
    config.push_str(&jsonutils::canonical_string(&serde_json::to_value(&trigger.spec)?));
    config.push_str(&jsonutils::canonical_string(&serde_json::to_value(trigger.labels())?));

    let es_name = instantiated_event_source_name(client, trigger, cluster).await?;
    for body in fetch_referenced_bodies(client, trigger, cluster, &es_name).await? {
        config.push_str(&jsonutils::canonical_string(&body));
    }

    let digest = Sha256::digest(config.as_bytes());
    Ok(b64.encode(digest))
}
