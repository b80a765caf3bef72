use std::collections::BTreeMap;

use kube::Resource;

use super::*;
use crate::errors::*;
use crate::prelude::*;

impl<T: Resource> KubeResourceExt for T {
    fn namespaced_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any().clone(),
        }
    }

    fn matches(&self, sel: &metav1::LabelSelector) -> anyhow::Result<bool> {
        labels_match_selector(self.labels(), sel)
    }
}

pub fn selector_is_empty(sel: &metav1::LabelSelector) -> bool {
    sel.match_labels.as_ref().is_none_or(|l| l.is_empty())
        && sel.match_expressions.as_ref().is_none_or(|e| e.is_empty())
}

pub fn labels_match_selector(
    obj_labels: &BTreeMap<String, String>,
    sel: &metav1::LabelSelector,
) -> anyhow::Result<bool> {
    if let Some(exprs) = &sel.match_expressions {
        for expr in exprs {
            if !label_expr_match(obj_labels, expr)? {
                return Ok(false);
            }
        }
    }

    if let Some(labels) = &sel.match_labels {
        for (k, v) in labels {
            if obj_labels.get(k) != Some(v) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

// Owner references here cross cluster boundaries (a management-cluster trigger owning a
// managed-cluster EventSource), so matching is by api_version/kind/name and the uid is
// whatever the owner carried at write time.
pub fn add_owner_reference<K>(meta: &mut metav1::ObjectMeta, owner: &K)
where
    K: Resource<DynamicType = ()>,
{
    if has_owner_reference(meta, owner) {
        return;
    }

    meta.owner_references.get_or_insert(vec![]).push(metav1::OwnerReference {
        api_version: K::api_version(&()).into(),
        kind: K::kind(&()).into(),
        name: owner.name_any(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        ..Default::default()
    });
}

pub fn remove_owner_reference<K>(meta: &mut metav1::ObjectMeta, owner: &K)
where
    K: Resource<DynamicType = ()>,
{
    if let Some(refs) = meta.owner_references.as_mut() {
        refs.retain(|rf| {
            rf.api_version != K::api_version(&()).as_ref()
                || rf.kind != K::kind(&()).as_ref()
                || rf.name != owner.name_any()
        });
    }
}

pub fn has_owner_reference<K>(meta: &metav1::ObjectMeta, owner: &K) -> bool
where
    K: Resource<DynamicType = ()>,
{
    meta.owner_references.as_ref().is_some_and(|refs| {
        refs.iter().any(|rf| {
            rf.api_version == K::api_version(&()).as_ref()
                && rf.kind == K::kind(&()).as_ref()
                && rf.name == owner.name_any()
        })
    })
}

// The meanings of these operators is explained here:
// https://kubernetes.io/docs/concepts/overview/working-with-objects/labels/#set-based-requirement
pub(super) const OPERATOR_IN: &str = "In";
pub(super) const OPERATOR_NOT_IN: &str = "NotIn";
pub(super) const OPERATOR_EXISTS: &str = "Exists";
pub(super) const OPERATOR_DOES_NOT_EXIST: &str = "DoesNotExist";

fn label_expr_match(
    obj_labels: &BTreeMap<String, String>,
    expr: &metav1::LabelSelectorRequirement,
) -> anyhow::Result<bool> {
    // LabelSelectorRequirement is considered invalid if the Operator is "In" or NotIn"
    // and there are no values; conversely for "Exists" and "DoesNotExist".
    match expr.operator.as_str() {
        OPERATOR_IN => match obj_labels.get(&expr.key) {
            Some(v) => match &expr.values {
                Some(values) if !values.is_empty() => Ok(values.contains(v)),
                _ => bail!(KubernetesError::malformed_label_selector(expr)),
            },
            None => Ok(false),
        },
        OPERATOR_NOT_IN => match obj_labels.get(&expr.key) {
            Some(v) => match &expr.values {
                Some(values) if !values.is_empty() => Ok(!values.contains(v)),
                _ => bail!(KubernetesError::malformed_label_selector(expr)),
            },
            None => Ok(true),
        },
        OPERATOR_EXISTS => match &expr.values {
            Some(values) if !values.is_empty() => bail!(KubernetesError::malformed_label_selector(expr)),
            _ => Ok(obj_labels.contains_key(&expr.key)),
        },
        OPERATOR_DOES_NOT_EXIST => match &expr.values {
            Some(values) if !values.is_empty() => {
                bail!(KubernetesError::malformed_label_selector(expr));
            },
            _ => Ok(!obj_labels.contains_key(&expr.key)),
        },
        _ => bail!("malformed label selector expression: {:?}", expr),
    }
}
