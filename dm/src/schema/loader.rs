//! Schema loading and `$ref` dereferencing
//!
//! Loading happens in two passes. The async pass walks every `$ref` and
//! fetches each referenced document once (disk or HTTP). The sync pass then
//! inlines every reference from the in-memory documents, tracking the chain
//! of references being expanded so a cycle fails instead of recursing
//! forever.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, info};

use super::SchemaError;

/// Where a schema document lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    File(PathBuf),
    Url(Url),
}

impl Location {
    /// Parse a user-supplied path or URL
    pub fn parse(raw: &str) -> Self {
        let is_remote = raw.starts_with("http://") || raw.starts_with("https://");
        if is_remote && let Ok(url) = Url::parse(raw) {
            return Location::Url(url);
        }
        Location::File(PathBuf::from(raw))
    }

    /// Resolve a reference's document part relative to this location
    fn join(&self, reference: &str) -> Result<Location, SchemaError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Url::parse(reference)
                .map(Location::Url)
                .map_err(|e| unresolved(reference, e.to_string()));
        }

        match self {
            Location::Url(base) => base
                .join(reference)
                .map(Location::Url)
                .map_err(|e| unresolved(reference, e.to_string())),
            Location::File(base) => {
                let dir = base.parent().unwrap_or_else(|| Path::new("."));
                Ok(Location::File(normalize_path(&dir.join(reference))))
            }
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Loads schema documents and dereferences them into one self-contained value
pub struct SchemaLoader {
    http: Client,
}

impl SchemaLoader {
    /// Create a loader with the given HTTP timeout for remote documents
    pub fn new(timeout: Duration) -> Result<Self, SchemaError> {
        debug!(?timeout, "SchemaLoader::new: called");
        let http = Client::builder().timeout(timeout).build().map_err(|e| SchemaError::Load {
            location: "http client".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { http })
    }

    /// Load `root` and inline every `$ref` it (transitively) contains
    pub async fn load(&self, root: &Location) -> Result<Value, SchemaError> {
        debug!(%root, "SchemaLoader::load: called");
        let root = match root {
            Location::File(path) => Location::File(normalize_path(path)),
            other => other.clone(),
        };

        let mut documents: HashMap<Location, Value> = HashMap::new();
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(location) = queue.pop_front() {
            if documents.contains_key(&location) {
                continue;
            }
            let document = self.fetch(&location).await?;

            let mut refs = Vec::new();
            collect_refs(&document, &mut refs);
            for reference in refs {
                let (doc_part, _) = split_reference(&reference);
                if !doc_part.is_empty() {
                    let target = location.join(doc_part)?;
                    if !documents.contains_key(&target) {
                        debug!(%location, %target, "SchemaLoader::load: queueing referenced document");
                        queue.push_back(target);
                    }
                }
            }

            documents.insert(location, document);
        }

        info!(documents = documents.len(), %root, "Schema documents loaded");

        let root_doc = documents
            .get(&root)
            .cloned()
            .ok_or_else(|| unresolved(&root.to_string(), "root document missing".to_string()))?;
        let mut stack = Vec::new();
        dereference(&root_doc, &root, &documents, &mut stack)
    }

    async fn fetch(&self, location: &Location) -> Result<Value, SchemaError> {
        debug!(%location, "SchemaLoader::fetch: called");
        let load_err = |reason: String| SchemaError::Load {
            location: location.to_string(),
            reason,
        };

        match location {
            Location::File(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| load_err(e.to_string()))?;
                serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))
            }
            Location::Url(url) => {
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| load_err(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(load_err(format!("HTTP {}", response.status())));
                }
                response.json().await.map_err(|e| load_err(e.to_string()))
            }
        }
    }
}

/// Dereference a schema that only uses internal (`#/...`) references
pub fn dereference_local(document: &Value) -> Result<Value, SchemaError> {
    let root = Location::File(PathBuf::from("<inline>"));
    let documents = HashMap::from([(root.clone(), document.clone())]);
    let mut stack = Vec::new();
    dereference(document, &root, &documents, &mut stack)
}

fn dereference(
    value: &Value,
    base: &Location,
    documents: &HashMap<Location, Value>,
    stack: &mut Vec<String>,
) -> Result<Value, SchemaError> {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(reference)) = obj.get("$ref") {
                let (doc_part, pointer) = split_reference(reference);
                let target_location = if doc_part.is_empty() {
                    base.clone()
                } else {
                    base.join(doc_part)?
                };

                let key = format!("{}#{}", target_location, pointer);
                if stack.contains(&key) {
                    return Err(SchemaError::Cyclic { reference: key });
                }

                let document = documents
                    .get(&target_location)
                    .ok_or_else(|| unresolved(reference, "document not loaded".to_string()))?;
                let target = if pointer.is_empty() {
                    document
                } else {
                    document
                        .pointer(pointer)
                        .ok_or_else(|| unresolved(reference, format!("pointer {} not found", pointer)))?
                };

                stack.push(key);
                let resolved = dereference(target, &target_location, documents, stack);
                stack.pop();
                return resolved;
            }

            let mut out = serde_json::Map::with_capacity(obj.len());
            for (key, child) in obj {
                out.insert(key.clone(), dereference(child, base, documents, stack)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| dereference(item, base, documents, stack))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn collect_refs(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(reference)) = obj.get("$ref") {
                refs.push(reference.clone());
            }
            for child in obj.values() {
                collect_refs(child, refs);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, refs)),
        _ => {}
    }
}

/// Split `file.json#/definitions/x` into (`file.json`, `/definitions/x`)
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.split_once('#') {
        Some((doc, pointer)) => (doc, pointer),
        None => (reference, ""),
    }
}

/// Collapse `.` and `..` components so the same file always gets the same key
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn unresolved(reference: &str, reason: String) -> SchemaError {
    SchemaError::Unresolved {
        reference: reference.to_string(),
        reason,
    }
}
