//! Transformers shared by every component reconciler.
//!
//! Each function returns a [`Transformer`] closure; [`common`] assembles the
//! list every component runs before its own transformers, and
//! [`apply_additional_options`] runs after all of them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, PodSecurityContext, PodSpec, SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use serde_json::Value;

use crate::crd::shared::{AdditionalOptions, Config};
use crate::error::Result;
use crate::manifest::client::to_dynamic;
use crate::manifest::patch::strategic_merge;
use crate::manifest::transform::{inject_namespace, inject_owner};
use crate::manifest::{kind_of, Manifest, Transformer};

pub const OPERAND_NAME_LABEL: &str = "operator.tekton.dev/operand-name";

/// Prefix marking an image override that targets a container argument.
pub const ARG_PREFIX: &str = "arg_";

const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "Job", "CronJob"];

// ── Pod spec access ───────────────────────────────────────────────────────────

fn pod_spec_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => {
            Some("/spec/template/spec")
        }
        "CronJob" => Some("/spec/jobTemplate/spec/template/spec"),
        _ => None,
    }
}

fn pod_template_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "CronJob" => Some("/spec/jobTemplate/spec/template"),
        _ => pod_spec_pointer(kind).map(|_| "/spec/template"),
    }
}

/// Run `edit` on the typed pod spec of a workload whose kind is in `kinds`.
pub fn edit_pod_spec<F>(obj: &mut DynamicObject, kinds: &[&str], edit: F) -> Result<()>
where
    F: FnOnce(&mut PodSpec),
{
    let kind = kind_of(obj);
    if !kinds.contains(&kind) {
        return Ok(());
    }
    let Some(pointer) = pod_spec_pointer(kind) else {
        return Ok(());
    };
    let Some(slot) = obj.data.pointer_mut(pointer) else {
        return Ok(());
    };
    let mut spec: PodSpec = serde_json::from_value(slot.clone())?;
    edit(&mut spec);
    *slot = serde_json::to_value(spec)?;
    Ok(())
}

/// Set an annotation on the pod template of a workload.
pub fn annotate_pod_template(obj: &mut DynamicObject, key: &str, value: &str) {
    let Some(pointer) = pod_template_pointer(kind_of(obj)) else {
        return;
    };
    let Some(Value::Object(template)) = obj.data.pointer_mut(pointer) else {
        return;
    };
    let metadata = template
        .entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Value::Object(metadata) = metadata {
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(annotations) = annotations {
            annotations.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
}

// ── Labels ────────────────────────────────────────────────────────────────────

/// Label every resource with the operand name, keeping an existing value.
pub fn inject_operand_name_label(operand: &str) -> Transformer {
    let operand = operand.to_string();
    Box::new(move |u| {
        u.labels_mut()
            .entry(OPERAND_NAME_LABEL.to_string())
            .or_insert_with(|| operand.clone());
        Ok(())
    })
}

// ── Images ────────────────────────────────────────────────────────────────────

/// Key an override is looked up under: lower-case, `-` replaced by `_`.
fn form_key(prefix: &str, name: &str) -> String {
    format!("{prefix}{}", name.to_lowercase()).replace('-', "_")
}

fn replace_args_images(args: &mut [String], images: &BTreeMap<String, String>) {
    let mut i = 0;
    while i < args.len() {
        if let Some((flag, _)) = args[i].split_once('=') {
            let replaced = images
                .get(&form_key(ARG_PREFIX, flag))
                .map(|url| format!("{flag}={url}"));
            if let Some(replaced) = replaced {
                args[i] = replaced;
            }
        } else if let Some(url) = images.get(&form_key(ARG_PREFIX, &args[i])) {
            if let Some(next) = args.get_mut(i + 1) {
                *next = url.clone();
                i += 1;
            }
        }
        i += 1;
    }
}

/// Override container images (matched by container name) and image-valued
/// container arguments (matched as `arg_<flag>`) on every workload.
pub fn workload_images(images: BTreeMap<String, String>) -> Transformer {
    Box::new(move |u| {
        if images.is_empty() {
            return Ok(());
        }
        edit_pod_spec(u, WORKLOAD_KINDS, |spec| {
            let containers = spec
                .containers
                .iter_mut()
                .chain(spec.init_containers.iter_mut().flatten());
            for container in containers {
                if let Some(url) = images.get(&form_key("", &container.name)) {
                    container.image = Some(url.clone());
                }
                if let Some(args) = container.args.as_mut() {
                    replace_args_images(args, &images);
                }
            }
        })
    })
}

// ── Pod security ──────────────────────────────────────────────────────────────

/// Stamp the `restricted` pod security profile on Deployments, StatefulSets
/// and Jobs.  Job containers keep settings they already declare.
pub fn add_restricted_psa() -> Transformer {
    Box::new(|u| {
        let is_job = kind_of(u) == "Job";
        edit_pod_spec(u, &["Deployment", "StatefulSet", "Job"], |spec| {
            let pod = spec
                .security_context
                .get_or_insert_with(PodSecurityContext::default);
            pod.run_as_non_root.get_or_insert(true);
            pod.seccomp_profile.get_or_insert_with(|| SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            });
            for container in spec.containers.iter_mut() {
                let sc = container
                    .security_context
                    .get_or_insert_with(SecurityContext::default);
                let drop_all = || Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Default::default()
                };
                if is_job {
                    sc.allow_privilege_escalation.get_or_insert(false);
                    sc.capabilities.get_or_insert_with(drop_all);
                } else {
                    sc.allow_privilege_escalation = Some(false);
                    sc.capabilities = Some(drop_all());
                }
            }
        })
    })
}

// ── Scheduling ────────────────────────────────────────────────────────────────

/// Node selector, tolerations and priority class from the component `config`
/// block, on Deployments.
pub fn add_configuration(config: Config) -> Transformer {
    Box::new(move |u| {
        if config.is_empty() {
            return Ok(());
        }
        edit_pod_spec(u, &["Deployment"], |spec| {
            if !config.node_selector.is_empty() {
                spec.node_selector = Some(config.node_selector.clone());
            }
            if !config.tolerations.is_empty() {
                spec.tolerations = Some(config.tolerations.clone());
            }
            if config.priority_class_name.is_some() {
                spec.priority_class_name = config.priority_class_name.clone();
            }
        })
    })
}

// ── ConfigMaps ────────────────────────────────────────────────────────────────

/// Merge `values` into the data of the ConfigMap called `name`.
pub fn add_config_map_values(name: &str, values: BTreeMap<String, String>) -> Transformer {
    let name = name.to_string();
    Box::new(move |u| {
        if kind_of(u) != "ConfigMap" || u.metadata.name.as_deref() != Some(name.as_str()) {
            return Ok(());
        }
        if values.is_empty() {
            return Ok(());
        }
        let data = u
            .data
            .as_object_mut()
            .map(|m| m.entry("data").or_insert_with(|| Value::Object(Default::default())));
        if let Some(Value::Object(data)) = data {
            for (k, v) in &values {
                data.insert(k.clone(), Value::String(v.clone()));
            }
        }
        Ok(())
    })
}

// ── Assembly ──────────────────────────────────────────────────────────────────

/// The transformers every component runs first, in order: operand label,
/// owner, namespace, images, restricted PSA, scheduling config.
pub fn common(
    operand: &str,
    owner: OwnerReference,
    target_namespace: &str,
    images: BTreeMap<String, String>,
    config: &Config,
) -> Vec<Transformer> {
    vec![
        inject_operand_name_label(operand),
        inject_owner(owner),
        inject_namespace(target_namespace),
        workload_images(images),
        add_restricted_psa(),
        add_configuration(config.clone()),
    ]
}

// ── Additional options ────────────────────────────────────────────────────────

fn merge_string_map(obj: &mut BTreeMap<String, String>, extra: &BTreeMap<String, String>) {
    for (k, v) in extra {
        obj.insert(k.clone(), v.clone());
    }
}

/// Merge user overrides into the rendered manifest.  Always the last
/// transformation, so user values win over everything the operator set.
///
/// ConfigMaps named in the options are patched when rendered and created in
/// `target_namespace` otherwise; Deployment and StatefulSet entries are
/// strategic-merged into the rendered workload of the same name.
pub fn apply_additional_options(
    manifest: &Manifest,
    target_namespace: &str,
    options: &AdditionalOptions,
) -> Result<Manifest> {
    if options.disabled == Some(true) || options.is_empty() {
        return Ok(manifest.clone());
    }

    let mut rendered_config_maps = Vec::new();
    let mut resources = Vec::with_capacity(manifest.len());
    for resource in manifest.resources() {
        let mut obj = resource.clone();
        let name = obj.name_any();
        let patch = match kind_of(&obj) {
            "ConfigMap" => {
                if let Some(cm) = options.config_maps.get(&name) {
                    rendered_config_maps.push(name.clone());
                    merge_string_map(obj.labels_mut(), &cm.labels);
                    merge_string_map(obj.annotations_mut(), &cm.annotations);
                    if !cm.data.is_empty() {
                        add_config_map_values(&name, cm.data.clone())(&mut obj)?;
                    }
                }
                None
            }
            "Deployment" => options.deployments.get(&name),
            "StatefulSet" => options.stateful_sets.get(&name),
            _ => None,
        };
        if let Some(patch) = patch {
            let mut value = serde_json::to_value(&obj)?;
            strategic_merge(&mut value, patch);
            obj = serde_json::from_value(value)?;
        }
        resources.push(obj);
    }

    for (name, cm) in &options.config_maps {
        if rendered_config_maps.contains(name) {
            continue;
        }
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(target_namespace.to_string()),
                labels: (!cm.labels.is_empty()).then(|| cm.labels.clone()),
                annotations: (!cm.annotations.is_empty()).then(|| cm.annotations.clone()),
                ..Default::default()
            },
            data: (!cm.data.is_empty()).then(|| cm.data.clone()),
            ..Default::default()
        };
        resources.push(to_dynamic(&config_map)?);
    }

    Ok(Manifest::new(resources))
}
