//! Read-only views of cluster state used during evaluation.
//!
//! Three seams:
//! - [`NamespaceLookup`]: fetch one namespace's metadata
//! - [`PodLister`]: list the pods running in a namespace
//! - [`NamespaceLister`]: list namespaces for cluster-wide inspection
//!
//! [`client::KubeCluster`] implements all three against a live API server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub mod client;

/// Failure to read a single namespace or its pods.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The namespace does not exist.
    #[error("namespace {0:?} not found")]
    NotFound(String),
    /// The API request failed.
    #[error("cluster request for namespace {namespace:?} failed: {message}")]
    Request {
        /// Namespace being read.
        namespace: String,
        /// Underlying error text.
        message: String,
    },
}

/// Failure to list namespaces.
#[derive(Debug, thiserror::Error)]
#[error("failed to list namespaces: {0}")]
pub struct ListError(pub String);

/// Fetch a namespace's metadata.
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// Return the namespace called `name`.
    async fn get_namespace(&self, name: &str) -> Result<Namespace, LookupError>;
}

/// List pods in a namespace.
#[async_trait]
pub trait PodLister: Send + Sync {
    /// Return every pod in `namespace`.
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, LookupError>;
}

/// List namespaces.
#[async_trait]
pub trait NamespaceLister: Send + Sync {
    /// Return all namespaces, or only the one called `name`.
    async fn list_namespaces(&self, name: Option<&str>) -> Result<Vec<Namespace>, ListError>;
}

/// Namespace view that knows every namespace and labels none of them.
///
/// Workload evaluation goes through this lookup so a namespace's own Pod
/// Security labels never replace the level being checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralNamespaceLookup;

#[async_trait]
impl NamespaceLookup for NeutralNamespaceLookup {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, LookupError> {
        Ok(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                annotations: Some(BTreeMap::new()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        })
    }
}

/// Pod lister for sources with no cluster behind them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPods;

#[async_trait]
impl PodLister for NoPods {
    async fn list_pods(&self, _namespace: &str) -> Result<Vec<Pod>, LookupError> {
        Ok(Vec::new())
    }
}

/// Labels of a namespace, empty when unset.
pub fn namespace_labels(namespace: &Namespace) -> BTreeMap<String, String> {
    namespace.metadata.labels.clone().unwrap_or_default()
}
