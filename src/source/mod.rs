//! Where workloads to evaluate come from.
//!
//! A [`ResourceSource`] yields [`ResourceInfo`] values: the object's content
//! plus the kind, namespace and name the aggregator keys results by.
//!
//! - [`manifest::ManifestSource`]: local YAML/JSON files
//! - [`live::LiveSource`]: objects read from the cluster

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

pub mod live;
pub mod manifest;

/// One object to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    /// Kind, e.g. `Deployment`.
    pub kind: String,
    /// Namespace, `None` when the object does not set one.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
    /// Full object content.
    pub object: Value,
    /// Where the object was read from (file path or `cluster`).
    pub origin: String,
}

impl fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{} from {}", self.kind, ns, self.name, self.origin),
            None => write!(f, "{} {} from {}", self.kind, self.name, self.origin),
        }
    }
}

/// Failures to produce or resolve resources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A manifest path could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A manifest document is not valid YAML or JSON.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// An object is missing a required field.
    #[error("object in {origin} has no {field}")]
    MissingField {
        /// Where the object came from.
        origin: String,
        /// Missing field path.
        field: &'static str,
    },
    /// An object's group version is not registered in the scheme.
    #[error("no kind {kind:?} is registered for version {api_version:?} (object {name:?} in {origin})")]
    UnknownKind {
        /// Where the object came from.
        origin: String,
        /// Declared `apiVersion`.
        api_version: String,
        /// Declared `kind`.
        kind: String,
        /// Object name.
        name: String,
    },
    /// A command-line resource type is not registered in the scheme.
    #[error("the server doesn't have a workload resource type {0:?}")]
    UnknownResourceType(String),
    /// A resource has no namespace and no default was given.
    #[error("{resource} has no namespace; set one in the manifest or pass --namespace with --default-namespaces")]
    MissingNamespace {
        /// Description of the resource.
        resource: String,
    },
    /// Reading objects from the cluster failed.
    #[error("failed to fetch {resource_type} from the cluster: {message}")]
    Fetch {
        /// Resource type being read.
        resource_type: String,
        /// Underlying error text.
        message: String,
    },
}

/// Produces resources to evaluate.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Whether objects come from local files rather than a live cluster.
    fn is_local(&self) -> bool;

    /// Materialize every object.
    async fn resources(&self) -> Result<Vec<ResourceInfo>, SourceError>;
}
