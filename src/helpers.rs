use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

// ── Versions ──────────────────────────────────────────────────────────────────

pub const LATEST_VERSION: &str = "0.0.0-latest";
pub const NIGHTLY_VERSION: &str = "0.0.0-nightly";

/// Map a release selector onto the directory name used for payloads on disk.
///
/// `""` and `latest` become `0.0.0-latest`, `nightly` becomes
/// `0.0.0-nightly`; anything else is a concrete version and passes through.
pub fn normalize_version(version: &str) -> String {
    match version.trim() {
        "" | "latest" => LATEST_VERSION.to_string(),
        "nightly" => NIGHTLY_VERSION.to_string(),
        other => other.to_string(),
    }
}

// ── Hashing ───────────────────────────────────────────────────────────────────

/// SHA-256 hash of a string, returned as hex.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable hash of any serializable value (JSON encoding, sorted keys).
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(sha256_hex(&serde_json::to_string(&json)?))
}

// ── Image overrides ───────────────────────────────────────────────────────────

/// Environment variable that rewrites the registry part of every override.
pub const IMAGE_REGISTRY_OVERRIDE: &str = "IMAGE_REGISTRY_OVERRIDE";

/// Collect image overrides from `vars` whose names start with `prefix`.
///
/// `IMAGE_PIPELINES_WEBHOOK=reg/x:1` with prefix `IMAGE_PIPELINES_` yields
/// `webhook -> reg/x:1`. Keys are lower-cased so they can be matched against
/// container names, which are lower-case by convention.
pub fn images_from_env<I>(prefix: &str, vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(prefix)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_lowercase(), v))
        })
        .collect()
}

/// Replace (or prepend) the registry host of every image.
pub fn override_registry(
    images: BTreeMap<String, String>,
    registry: Option<&str>,
) -> BTreeMap<String, String> {
    let Some(registry) = registry.filter(|r| !r.is_empty()) else {
        return images;
    };
    images
        .into_iter()
        .map(|(k, image)| {
            let rewritten = match image.split_once('/') {
                Some((_, rest)) => format!("{registry}/{rest}"),
                None => format!("{registry}/{image}"),
            };
            (k, rewritten)
        })
        .collect()
}

// ── Label selectors ───────────────────────────────────────────────────────────

/// Render a `matchLabels` map as an equality-based selector string.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Evaluate an equality-based selector (`a=b,c!=d,e,!f`) against labels.
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                let v = v.trim_start_matches('=');
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                !labels.contains_key(k.trim())
            } else {
                labels.contains_key(term)
            }
        })
}
