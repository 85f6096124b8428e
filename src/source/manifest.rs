//! Local manifest files.
//!
//! Files may hold several YAML documents separated by `---`, JSON, or a
//! `kind: List` wrapping `items`. Directories are expanded to the
//! `.yaml`, `.yml` and `.json` files they contain, sorted by path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ResourceInfo, ResourceSource, SourceError};
use crate::scheme::ResourceScheme;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Reads workloads from files and directories.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    paths: Vec<PathBuf>,
    recursive: bool,
    scheme: ResourceScheme,
}

impl ManifestSource {
    /// Source over `paths`, resolving kinds with `scheme`.
    pub fn new(paths: Vec<PathBuf>, scheme: ResourceScheme) -> Self {
        Self {
            paths,
            recursive: false,
            scheme,
        }
    }

    /// Descend into subdirectories of directory arguments.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    fn expand(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut files = Vec::new();
        for path in &self.paths {
            if path.is_dir() {
                collect_dir(path, self.recursive, &mut files)?;
            } else {
                files.push(path.clone());
            }
        }
        Ok(files)
    }

    fn objects_in(&self, path: &Path) -> Result<Vec<ResourceInfo>, SourceError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();
        let mut infos = Vec::new();
        for document in serde_yaml::Deserializer::from_str(&contents) {
            let value = Value::deserialize(document).map_err(|e| SourceError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            for object in flatten_lists(value) {
                infos.push(self.to_info(object, &origin)?);
            }
        }
        debug!(path = %origin, count = infos.len(), "read manifest");
        Ok(infos)
    }

    fn to_info(&self, object: Value, origin: &str) -> Result<ResourceInfo, SourceError> {
        let field = |pointer: &str, name: &'static str| {
            object
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| SourceError::MissingField {
                    origin: origin.to_owned(),
                    field: name,
                })
        };
        let api_version = field("/apiVersion", "apiVersion")?;
        let kind = field("/kind", "kind")?;
        let name = field("/metadata/name", "metadata.name")?;
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_owned);

        if !self.scheme.recognizes(&api_version) {
            return Err(SourceError::UnknownKind {
                origin: origin.to_owned(),
                api_version,
                kind,
                name,
            });
        }
        Ok(ResourceInfo {
            kind,
            namespace,
            name,
            object,
            origin: origin.to_owned(),
        })
    }
}

fn collect_dir(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> Result<(), SourceError> {
    let read_err = |source| SourceError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            if recursive {
                collect_dir(&path, recursive, files)?;
            }
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
    Ok(())
}

/// Unwrap `kind: List` documents and drop empty ones.
fn flatten_lists(value: Value) -> Vec<Value> {
    if value.is_null() {
        return Vec::new();
    }
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|k| k == "List" || k.ends_with("List"));
    if is_list {
        if let Some(Value::Array(items)) = value.get("items") {
            return items.iter().cloned().flat_map(flatten_lists).collect();
        }
    }
    vec![value]
}

#[async_trait]
impl ResourceSource for ManifestSource {
    fn is_local(&self) -> bool {
        true
    }

    async fn resources(&self) -> Result<Vec<ResourceInfo>, SourceError> {
        let mut infos = Vec::new();
        for file in self.expand()? {
            infos.extend(self.objects_in(&file)?);
        }
        Ok(infos)
    }
}
