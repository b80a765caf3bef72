mod context;
mod controller;
mod dispatcher;
mod errors;
mod eventsources;
mod expander;
mod fingerprint;
mod index;
mod matcher;
mod references;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use et_api::v1beta1::{
    Cluster,
    SveltosCluster,
};
use et_core::logging;
use et_core::prelude::*;
use futures::{
    StreamExt,
    future,
};
use kube::runtime::controller::Controller;
use kube::runtime::reflector::ObjectRef;
use tracing::*;

use crate::context::ReconcileContext;
use crate::controller::{
    error_policy,
    reconcile,
};
use crate::dispatcher::Dispatcher;
use crate::matcher::ManagedClusterEvent;

#[derive(Clone, Debug, Default, Parser)]
struct Options {
    // This replica's shard identity; clusters assigned to a different shard are ignored
    #[arg(long, default_value = "")]
    shard_key: String,

    #[arg(long, default_value = REPORT_NAMESPACE)]
    report_namespace: String,

    #[arg(long, default_value_t = 10)]
    worker_count: usize,

    // Dispatcher handlers running longer than this log as slow
    #[arg(long, default_value_t = 120)]
    program_duration_seconds: u64,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

#[instrument(ret, err)]
async fn run(opts: Options) -> EmptyResult {
    let client = kube::Client::try_default().await?;
    let dispatcher = Dispatcher::new(opts.worker_count, Duration::from_secs(opts.program_duration_seconds));
    let ctx = Arc::new(ReconcileContext::new(client.clone(), opts, dispatcher));

    let trigger_api = kube::Api::<EventTrigger>::all(client.clone());
    let er_api = kube::Api::<EventReport>::all(client.clone());
    let es_api = kube::Api::<EventSource>::all(client.clone());
    let cm_api = kube::Api::<corev1::ConfigMap>::all(client.clone());
    let secret_api = kube::Api::<corev1::Secret>::all(client.clone());
    let capi_api = kube::Api::<Cluster>::all(client.clone());
    let sveltos_api = kube::Api::<SveltosCluster>::all(client.clone());

    let index = ctx.index.clone();
    let ctrl = Controller::new(trigger_api, Default::default())
        .watches(er_api, Default::default(), {
            let index = index.clone();
            move |er: EventReport| to_requests(matcher::triggers_for_event_report(&index, &er))
        })
        .watches(es_api, Default::default(), {
            let index = index.clone();
            move |es: EventSource| to_requests(matcher::triggers_for_event_source(&index, &es))
        })
        .watches(cm_api, Default::default(), {
            let index = index.clone();
            move |cm: corev1::ConfigMap| {
                to_requests(matcher::triggers_for_reference(&index, &matcher::reference_key_for_configmap(&cm)))
            }
        })
        .watches(secret_api, Default::default(), {
            let index = index.clone();
            move |secret: corev1::Secret| {
                to_requests(matcher::triggers_for_reference(&index, &matcher::reference_key_for_secret(&secret)))
            }
        })
        .watches(capi_api, Default::default(), {
            let index = index.clone();
            move |cluster: Cluster| {
                let event = ManagedClusterEvent {
                    id: ClusterId::capi(&cluster.namespace().unwrap_or_default(), &cluster.name_any()),
                    labels: cluster.labels().clone(),
                };
                to_requests(matcher::triggers_for_cluster(&index, &event))
            }
        })
        .watches(sveltos_api, Default::default(), {
            let index = index.clone();
            move |cluster: SveltosCluster| {
                let event = ManagedClusterEvent {
                    id: ClusterId::sveltos(&cluster.namespace().unwrap_or_default(), &cluster.name_any()),
                    labels: cluster.labels().clone(),
                };
                to_requests(matcher::triggers_for_cluster(&index, &event))
            }
        })
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|_| future::ready(()));

    ctrl.await;
    ctx.dispatcher.shutdown().await;
    Ok(())
}

fn to_requests(names: Vec<String>) -> Vec<ObjectRef<EventTrigger>> {
    names.into_iter().map(|name| ObjectRef::new(&name)).collect()
}

#[tokio::main]
async fn main() -> EmptyResult {
    let args = Options::parse();
    logging::setup(&args.verbosity);
    run(args).await
}

#[cfg(test)]
mod tests;
