//! Predicates for [`Manifest::filter`](super::Manifest::filter).

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;

use super::{gvk_of, is_cluster_scoped, kind_of};

pub type Predicate = Arc<dyn Fn(&DynamicObject) -> bool + Send + Sync>;

/// True when every predicate holds (vacuously true for an empty list).
pub fn all(predicates: Vec<Predicate>) -> Predicate {
    Arc::new(move |u| predicates.iter().all(|p| p(u)))
}

/// True when at least one predicate holds.
pub fn any(predicates: Vec<Predicate>) -> Predicate {
    Arc::new(move |u| predicates.iter().any(|p| p(u)))
}

/// True when no predicate holds.
pub fn none(predicates: Vec<Predicate>) -> Predicate {
    Arc::new(move |u| !predicates.iter().any(|p| p(u)))
}

pub fn not(predicate: Predicate) -> Predicate {
    Arc::new(move |u| !predicate(u))
}

pub fn everything() -> Predicate {
    Arc::new(|_| true)
}

/// Case-insensitive kind match.
pub fn by_kind(kind: impl Into<String>) -> Predicate {
    let kind = kind.into();
    Arc::new(move |u| kind_of(u).eq_ignore_ascii_case(&kind))
}

pub fn by_name(name: impl Into<String>) -> Predicate {
    let name = name.into();
    Arc::new(move |u| u.metadata.name.as_deref() == Some(name.as_str()))
}

/// Label match; an empty `value` only requires the key to be present.
pub fn by_label(key: impl Into<String>, value: impl Into<String>) -> Predicate {
    let (key, value) = (key.into(), value.into());
    Arc::new(move |u| match u.labels().get(&key) {
        Some(v) => value.is_empty() || *v == value,
        None => false,
    })
}

/// Every label in `labels` must match.
pub fn by_labels(labels: BTreeMap<String, String>) -> Predicate {
    all(labels
        .into_iter()
        .map(|(k, v)| by_label(k, v))
        .collect())
}

pub fn by_annotation(key: impl Into<String>, value: impl Into<String>) -> Predicate {
    let (key, value) = (key.into(), value.into());
    Arc::new(move |u| match u.annotations().get(&key) {
        Some(v) => value.is_empty() || *v == value,
        None => false,
    })
}

pub fn by_gvk(gvk: GroupVersionKind) -> Predicate {
    Arc::new(move |u| gvk_of(u) == gvk)
}

pub fn crds() -> Predicate {
    by_kind("CustomResourceDefinition")
}

pub fn cluster_scoped() -> Predicate {
    Arc::new(|u| is_cluster_scoped(kind_of(u)))
}

pub fn namespace_scoped() -> Predicate {
    not(cluster_scoped())
}
