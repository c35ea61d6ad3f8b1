//! Generic transformers.
//!
//! A transformer mutates one resource in place and may fail; component
//! specific transformers live next to the component reconcilers.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use super::{is_cluster_scoped, kind_of};
use crate::error::Result;

pub type Transformer = Box<dyn Fn(&mut DynamicObject) -> Result<()> + Send + Sync>;

/// Resolve `$VAR` from the environment, falling back to the literal.
fn resolve_env(value: &str) -> String {
    value
        .strip_prefix('$')
        .and_then(|var| std::env::var(var).ok())
        .unwrap_or_else(|| value.to_string())
}

fn set_service_namespace(service: Option<&mut Value>, namespace: &str) {
    if let Some(Value::Object(service)) = service {
        service.insert("namespace".into(), Value::String(namespace.to_string()));
    }
}

/// Move a resource, and every in-object reference to its own namespace,
/// into `namespace`.
pub fn inject_namespace(namespace: &str) -> Transformer {
    let namespace = resolve_env(namespace);
    Box::new(move |u| {
        let kind = kind_of(u).to_ascii_lowercase();
        match kind.as_str() {
            "namespace" => {
                u.metadata.name = Some(namespace.clone());
                return Ok(());
            }
            "clusterrolebinding" | "rolebinding" => {
                if let Some(Value::Array(subjects)) = u.data.get_mut("subjects") {
                    for subject in subjects.iter_mut().filter_map(Value::as_object_mut) {
                        if subject.contains_key("namespace") {
                            subject.insert("namespace".into(), Value::String(namespace.clone()));
                        }
                    }
                }
            }
            "validatingwebhookconfiguration" | "mutatingwebhookconfiguration" => {
                if let Some(Value::Array(hooks)) = u.data.get_mut("webhooks") {
                    for hook in hooks.iter_mut() {
                        set_service_namespace(hook.pointer_mut("/clientConfig/service"), &namespace);
                    }
                }
            }
            "customresourcedefinition" => {
                // apiextensions v1 and v1beta1 keep the conversion webhook
                // service in different places.
                for pointer in [
                    "/spec/conversion/webhook/clientConfig/service",
                    "/spec/conversion/webhookClientConfig/service",
                ] {
                    set_service_namespace(u.data.pointer_mut(pointer), &namespace);
                }
            }
            "apiservice" => {
                set_service_namespace(u.data.pointer_mut("/spec/service"), &namespace);
            }
            _ => {}
        }
        if !is_cluster_scoped(&kind) {
            u.metadata.namespace = Some(namespace.clone());
        }
        Ok(())
    })
}

/// Make `owner` the owner of every namespace-scoped resource.
pub fn inject_owner(owner: OwnerReference) -> Transformer {
    Box::new(move |u| {
        if !is_cluster_scoped(kind_of(u)) {
            u.metadata.owner_references = Some(vec![owner.clone()]);
        }
        Ok(())
    })
}

pub fn inject_label(key: impl Into<String>, value: impl Into<String>) -> Transformer {
    let (key, value) = (key.into(), value.into());
    Box::new(move |u| {
        u.labels_mut().insert(key.clone(), value.clone());
        Ok(())
    })
}

pub fn inject_annotation(key: impl Into<String>, value: impl Into<String>) -> Transformer {
    let (key, value) = (key.into(), value.into());
    Box::new(move |u| {
        u.annotations_mut().insert(key.clone(), value.clone());
        Ok(())
    })
}
