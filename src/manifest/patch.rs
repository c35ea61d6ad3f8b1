//! Three-way patch computation.
//!
//! Given the last applied configuration (`original`), the freshly rendered
//! object (`modified`) and the live object (`current`), produce the smallest
//! patch that moves `current` to `modified`:
//!
//! * fields set in `modified` that differ from `current` are copied over,
//! * fields present in `original` but dropped from `modified` are deleted,
//! * fields that only exist in `current` (server defaults, status, metadata
//!   the API server owns) are left alone.
//!
//! Built-in kinds get strategic semantics for lists that carry a merge key
//! (containers by name, ports by port number...): lists are diffed item by
//! item instead of being replaced wholesale, and items removed since
//! `original` are emitted as `$patch: delete` directives.  Everything else
//! gets RFC 7386 JSON merge semantics.

use kube::api::GroupVersionKind;
use serde_json::{Map, Value};

/// API groups whose types are compiled into the API server and therefore
/// support strategic merge.
const STRATEGIC_GROUPS: &[&str] = &[
    "",
    "apps",
    "batch",
    "autoscaling",
    "policy",
    "networking.k8s.io",
    "rbac.authorization.k8s.io",
    "admissionregistration.k8s.io",
    "apiextensions.k8s.io",
    "apiregistration.k8s.io",
    "scheduling.k8s.io",
    "storage.k8s.io",
    "coordination.k8s.io",
];

const DIRECTIVE: &str = "$patch";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    JsonMerge,
    Strategic,
}

impl Strategy {
    pub fn for_gvk(gvk: &GroupVersionKind) -> Self {
        if STRATEGIC_GROUPS.contains(&gvk.group.as_str()) {
            Strategy::Strategic
        } else {
            Strategy::JsonMerge
        }
    }
}

/// Merge key for list fields that are merged item by item.
fn merge_key(field: &str, item: &Value) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "env" | "volumes"
        | "imagePullSecrets" | "hostAliases" | "webhooks" | "versions" => Some("name"),
        "volumeMounts" | "volumeDevices" => Some("mountPath"),
        "ports" if item.get("containerPort").is_some() => Some("containerPort"),
        "ports" => Some("port"),
        _ => None,
    }
    .filter(|key| item.get(*key).is_some())
}

fn item_id<'a>(field: &str, item: &'a Value) -> Option<(&'static str, &'a Value)> {
    let key = merge_key(field, item)?;
    item.get(key).map(|v| (key, v))
}

fn find_item<'a>(list: &'a [Value], key: &str, id: &Value) -> Option<&'a Value> {
    list.iter().find(|item| item.get(key) == Some(id))
}

fn is_keyed_list(field: &str, list: &[Value]) -> bool {
    !list.is_empty() && list.iter().all(|item| item_id(field, item).is_some())
}

#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    strategy: Strategy,
    body: Value,
}

impl Patch {
    /// Compute the three-way patch; `None` when there is nothing to change.
    pub fn three_way(
        original: Option<&Value>,
        modified: &Value,
        current: &Value,
        strategy: Strategy,
    ) -> Option<Patch> {
        let (Some(modified), Some(current)) = (modified.as_object(), current.as_object()) else {
            return (modified != current).then(|| Patch {
                strategy,
                body: modified.clone(),
            });
        };
        let original = original.and_then(Value::as_object);
        let body = diff_object(original, modified, current, strategy);
        if body.is_empty() {
            None
        } else {
            Some(Patch {
                strategy,
                body: Value::Object(body),
            })
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn merge_into(&self, target: &mut Value) {
        match self.strategy {
            Strategy::JsonMerge => json_patch::merge(target, &self.body),
            Strategy::Strategic => strategic_merge(target, &self.body),
        }
    }
}

fn diff_object(
    original: Option<&Map<String, Value>>,
    modified: &Map<String, Value>,
    current: &Map<String, Value>,
    strategy: Strategy,
) -> Map<String, Value> {
    let mut patch = Map::new();

    if let Some(original) = original {
        for key in original.keys() {
            if !modified.contains_key(key) && current.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    for (key, want) in modified {
        let Some(have) = current.get(key) else {
            patch.insert(key.clone(), want.clone());
            continue;
        };
        let before = original.and_then(|o| o.get(key));
        match (want, have) {
            (Value::Object(want), Value::Object(have)) => {
                let sub = diff_object(before.and_then(Value::as_object), want, have, strategy);
                if !sub.is_empty() {
                    patch.insert(key.clone(), Value::Object(sub));
                }
            }
            (Value::Array(want_list), Value::Array(have_list))
                if strategy == Strategy::Strategic
                    && is_keyed_list(key, want_list)
                    && have_list.iter().all(|i| item_id(key, i).is_some()) =>
            {
                let before_list = before.and_then(Value::as_array).map(Vec::as_slice);
                if let Some(items) = diff_list(key, before_list, want_list, have_list) {
                    patch.insert(key.clone(), Value::Array(items));
                }
            }
            (want, have) if want != have => {
                patch.insert(key.clone(), want.clone());
            }
            _ => {}
        }
    }
    patch
}

fn diff_list(
    field: &str,
    original: Option<&[Value]>,
    modified: &[Value],
    current: &[Value],
) -> Option<Vec<Value>> {
    let mut items = Vec::new();

    for old in original.unwrap_or_default() {
        let Some((key, id)) = item_id(field, old) else {
            continue;
        };
        if find_item(modified, key, id).is_none()
            && find_item(current, key, id).is_some()
        {
            let mut directive = Map::new();
            directive.insert(key.to_string(), id.clone());
            directive.insert(DIRECTIVE.to_string(), Value::String("delete".into()));
            items.push(Value::Object(directive));
        }
    }

    for want in modified {
        let Some((key, id)) = item_id(field, want) else {
            continue;
        };
        match (find_item(current, key, id), want.as_object()) {
            (Some(Value::Object(have)), Some(want_obj)) => {
                let before = original
                    .and_then(|o| find_item(o, key, id))
                    .and_then(Value::as_object);
                let mut sub = diff_object(before, want_obj, have, Strategy::Strategic);
                if !sub.is_empty() {
                    sub.insert(key.to_string(), id.clone());
                    items.push(Value::Object(sub));
                }
            }
            _ => items.push(want.clone()),
        }
    }

    (!items.is_empty()).then_some(items)
}

/// Apply a strategic patch: keyed lists merge by key, `null` deletes,
/// everything else follows JSON merge.
pub fn strategic_merge(target: &mut Value, patch: &Value) {
    let (Some(target_map), Some(patch_map)) = (target.as_object_mut(), patch.as_object()) else {
        *target = strip_directives(patch);
        return;
    };
    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
            continue;
        }
        match (target_map.get_mut(key), value) {
            (Some(Value::Array(list)), Value::Array(items))
                if items.iter().all(|i| item_id(key, i).is_some()) && !items.is_empty() =>
            {
                merge_list(key, list, items);
            }
            (Some(existing @ Value::Object(_)), Value::Object(_)) => strategic_merge(existing, value),
            _ => {
                target_map.insert(key.clone(), strip_directives(value));
            }
        }
    }
}

fn merge_list(field: &str, list: &mut Vec<Value>, items: &[Value]) {
    for item in items {
        let Some((key, id)) = item_id(field, item) else {
            continue;
        };
        let position = list
            .iter()
            .position(|existing| existing.get(key) == Some(id));
        let delete = item.get(DIRECTIVE).and_then(Value::as_str) == Some("delete");
        match (position, delete) {
            (Some(pos), true) => {
                list.remove(pos);
            }
            (None, true) => {}
            (Some(pos), false) => strategic_merge(&mut list[pos], item),
            (None, false) => list.push(strip_directives(item)),
        }
    }
}

/// Remove `null` members and `$patch` directives from a value that is being
/// inserted fresh.
fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, v)| k.as_str() != DIRECTIVE && !v.is_null())
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|i| i.get(DIRECTIVE).is_none())
                .map(strip_directives)
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Shallow overlay of `modified` onto `live`: every top-level field of the
/// rendered object wins, while the live metadata (resourceVersion, uid...)
/// is kept so the update is accepted.
pub fn overwrite(live: &Value, modified: &Value) -> Value {
    let mut out = live.clone();
    let (Some(out_map), Some(modified_map)) = (out.as_object_mut(), modified.as_object()) else {
        return modified.clone();
    };
    for (key, value) in modified_map {
        if key == "metadata" {
            let meta = out_map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            for field in ["labels", "annotations", "ownerReferences"] {
                if let (Some(meta), Some(v)) = (meta.as_object_mut(), value.get(field)) {
                    meta.insert(field.to_string(), v.clone());
                }
            }
        } else {
            out_map.insert(key.clone(), value.clone());
        }
    }
    out
}

/// RFC 7386 patch that turns `original` into `modified`.  Keys dropped
/// since `original` come out as `null` so the server removes them.
pub fn merge_diff(original: &Value, modified: &Value) -> Value {
    let (Some(original), Some(modified)) = (original.as_object(), modified.as_object()) else {
        return modified.clone();
    };
    let mut patch = Map::new();
    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, want) in modified {
        match original.get(key) {
            Some(have) if have == want => {}
            Some(have @ Value::Object(_)) if want.is_object() => {
                patch.insert(key.clone(), merge_diff(have, want));
            }
            _ => {
                patch.insert(key.clone(), want.clone());
            }
        }
    }
    Value::Object(patch)
}
