use std::collections::{
    BTreeMap,
    BTreeSet,
    HashMap,
};

use et_core::k8s::labels_match_selector;
use et_core::prelude::*;
use tracing::*;

// Key identifying a ConfigMap/Secret (or other object) a trigger's fingerprint depends on
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ReferenceKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ReferenceKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> ReferenceKey {
        ReferenceKey {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

// Process-wide reverse index from watched objects to the triggers that care about them.
// Triggers are stored as plain names, never object graphs.  The whole structure sits
// behind one exclusive lock; writers replace a trigger's membership wholesale so readers
// never observe partial state.
#[derive(Default)]
pub struct TriggerIndex {
    es_to_triggers: HashMap<String, BTreeSet<String>>,
    cluster_to_triggers: HashMap<ClusterId, BTreeSet<String>>,
    ref_to_triggers: HashMap<ReferenceKey, BTreeSet<String>>,
    trigger_selectors: HashMap<String, metav1::LabelSelector>,
    cluster_labels: HashMap<ClusterId, BTreeMap<String, String>>,
}

impl TriggerIndex {
    pub fn new() -> TriggerIndex {
        TriggerIndex::default()
    }

    // Replaces everything the index knows about `trigger`
    pub fn set_trigger(
        &mut self,
        trigger: &str,
        event_sources: BTreeSet<String>,
        clusters: BTreeSet<ClusterId>,
        references: BTreeSet<ReferenceKey>,
        selector: metav1::LabelSelector,
    ) {
        self.remove_trigger(trigger);

        for es in event_sources {
            self.es_to_triggers.entry(es).or_default().insert(trigger.into());
        }
        for cluster in clusters {
            self.cluster_to_triggers.entry(cluster).or_default().insert(trigger.into());
        }
        for rf in references {
            self.ref_to_triggers.entry(rf).or_default().insert(trigger.into());
        }
        self.trigger_selectors.insert(trigger.into(), selector);
    }

    pub fn remove_trigger(&mut self, trigger: &str) {
        self.es_to_triggers.retain(|_, triggers| {
            triggers.remove(trigger);
            !triggers.is_empty()
        });
        self.cluster_to_triggers.retain(|_, triggers| {
            triggers.remove(trigger);
            !triggers.is_empty()
        });
        self.ref_to_triggers.retain(|_, triggers| {
            triggers.remove(trigger);
            !triggers.is_empty()
        });
        self.trigger_selectors.remove(trigger);
    }

    pub fn set_cluster_labels(&mut self, cluster: ClusterId, labels: BTreeMap<String, String>) {
        self.cluster_labels.insert(cluster, labels);
    }

    pub fn cluster_labels(&self, cluster: &ClusterId) -> Option<&BTreeMap<String, String>> {
        self.cluster_labels.get(cluster)
    }

    pub fn triggers_for_event_source(&self, name: &str) -> Vec<String> {
        self.es_to_triggers.get(name).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    // Triggers that were tracking the cluster (so they can unmatch) plus triggers whose
    // source selector matches the cluster's current labels
    pub fn triggers_for_cluster(&self, cluster: &ClusterId, labels: &BTreeMap<String, String>) -> Vec<String> {
        let mut triggers: BTreeSet<String> =
            self.cluster_to_triggers.get(cluster).cloned().unwrap_or_default();

        for (trigger, selector) in &self.trigger_selectors {
            match labels_match_selector(labels, selector) {
                Ok(true) => {
                    triggers.insert(trigger.clone());
                },
                Ok(false) => (),
                Err(e) => warn!("skipping malformed selector for trigger {trigger}: {e:#}"),
            }
        }

        triggers.into_iter().collect()
    }

    pub fn triggers_for_reference(&self, rf: &ReferenceKey) -> Vec<String> {
        self.ref_to_triggers.get(rf).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}
