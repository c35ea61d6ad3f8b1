//! Loading manifests from files, directories, byte streams and URLs.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::Manifest;
use crate::error::{Error, Result};

/// Where a manifest comes from.
#[derive(Clone, Debug)]
pub enum Source {
    /// A file, a directory (not descended), or a comma-separated list of both.
    Path(String),
    /// A directory walked recursively.
    Recursive(PathBuf),
    Bytes(Vec<u8>),
    /// Resources already in memory.
    Slice(Vec<Value>),
    Url(String),
}

impl Manifest {
    pub async fn from_source(source: Source, http: &reqwest::Client) -> Result<Manifest> {
        match source {
            Source::Path(paths) => off_runtime(move || Manifest::from_path(&paths)).await,
            Source::Recursive(dir) => Manifest::load_dir(dir).await,
            Source::Bytes(bytes) => Manifest::from_bytes(&bytes),
            Source::Slice(values) => Manifest::from_values(values),
            Source::Url(url) => Manifest::from_url(http, &url).await,
        }
    }

    /// Parse one or more comma-separated paths.  Directories contribute their
    /// `.yaml`, `.yml` and `.json` files in lexical order.
    pub fn from_path(paths: &str) -> Result<Manifest> {
        let mut resources = Vec::new();
        for path in paths.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            resources.extend(read_path(Path::new(path), false)?);
        }
        Ok(Manifest::new(resources))
    }

    pub fn from_recursive_path(dir: &Path) -> Result<Manifest> {
        Ok(Manifest::new(read_path(dir, true)?))
    }

    /// [`Manifest::from_recursive_path`] on the blocking pool.
    pub async fn load_dir(dir: PathBuf) -> Result<Manifest> {
        off_runtime(move || Manifest::from_recursive_path(&dir)).await
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Manifest> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::manifest(format!("manifest is not UTF-8: {e}")))?;
        Ok(Manifest::new(parse_documents(text)?))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Manifest> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| Error::io("<reader>", e))?;
        Manifest::from_bytes(&buf)
    }

    pub fn from_values(values: Vec<Value>) -> Result<Manifest> {
        let mut resources = Vec::with_capacity(values.len());
        for value in values {
            collect(value, &mut resources)?;
        }
        Ok(Manifest::new(resources))
    }

    pub async fn from_url(http: &reqwest::Client, url: &str) -> Result<Manifest> {
        debug!(%url, "fetching manifest");
        let body = http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Manifest::from_bytes(&body)
    }
}

/// Run a filesystem read without stalling the reconcile workers.
async fn off_runtime<F>(read: F) -> Result<Manifest>
where
    F: FnOnce() -> Result<Manifest> + Send + 'static,
{
    tokio::task::spawn_blocking(read)
        .await
        .map_err(|e| Error::manifest(format!("manifest loader failed: {e}")))?
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

fn read_path(path: &Path, recursive: bool) -> Result<Vec<DynamicObject>> {
    let display = path.display().to_string();
    let meta = fs::metadata(path).map_err(|e| Error::io(&display, e))?;
    if meta.is_file() {
        let text = fs::read_to_string(path).map_err(|e| Error::io(&display, e))?;
        return parse_documents(&text)
            .map_err(|e| Error::manifest(format!("{display}: {e}")));
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|e| Error::io(&display, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::io(&display, e))?;
    entries.sort();

    let mut resources = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            if recursive {
                resources.extend(read_path(&entry, true)?);
            }
        } else if is_manifest_file(&entry) {
            resources.extend(read_path(&entry, false)?);
        }
    }
    Ok(resources)
}

/// Split a multi-document YAML (or JSON) stream into resources.
pub fn parse_documents(text: &str) -> Result<Vec<DynamicObject>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        collect(value, &mut resources)?;
    }
    Ok(resources)
}

fn collect(value: Value, out: &mut Vec<DynamicObject>) -> Result<()> {
    let Value::Object(mut map) = value else {
        return match value {
            Value::Null => Ok(()),
            other => Err(Error::manifest(format!("expected a mapping, got {other}"))),
        };
    };
    if map.is_empty() {
        return Ok(());
    }

    if map.get("kind").and_then(Value::as_str) == Some("List") {
        if let Some(Value::Array(items)) = map.remove("items") {
            for item in items {
                collect(item, out)?;
            }
        }
        return Ok(());
    }

    for field in ["apiVersion", "kind"] {
        if map.get(field).and_then(Value::as_str).is_none_or(str::is_empty) {
            return Err(Error::manifest(format!("resource is missing {field}")));
        }
    }
    map.entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    out.push(serde_json::from_value(Value::Object(map))?);
    Ok(())
}
