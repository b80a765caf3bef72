use std::sync::{
    Arc,
    Mutex,
};

use et_core::k8s::ClusterClientCache;
use et_core::prelude::*;

use crate::Options;
use crate::dispatcher::Dispatcher;
use crate::index::TriggerIndex;

#[derive(Clone)]
pub struct ReconcileContext {
    pub client: kube::Client,
    pub opts: Options,
    pub index: Arc<Mutex<TriggerIndex>>,
    pub dispatcher: Arc<Dispatcher>,
    pub remote_clients: Arc<ClusterClientCache>,

    pub name: String,
}

impl ReconcileContext {
    pub fn new(client: kube::Client, opts: Options, dispatcher: Arc<Dispatcher>) -> ReconcileContext {
        ReconcileContext {
            remote_clients: Arc::new(ClusterClientCache::new(client.clone())),
            client,
            opts,
            index: Arc::new(Mutex::new(TriggerIndex::new())),
            dispatcher,

            name: String::new(),
        }
    }

    pub fn with_trigger(self: Arc<Self>, trigger: &EventTrigger) -> Self {
        let mut new = (*self).clone();
        new.name = trigger.name_any();
        new
    }
}
