//! Kubernetes API backed cluster views.

use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use super::{ListError, LookupError, NamespaceLister, NamespaceLookup, PodLister};

/// Errors while building a cluster client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The kubeconfig could not be read or resolved.
    #[error("failed to load kube client configuration: {0}")]
    Config(String),
    /// The client could not be constructed from the configuration.
    #[error("failed to create kube client: {0}")]
    Client(String),
}

/// Standard cluster connection flags.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Path to a kubeconfig file. Falls back to `KUBECONFIG` / `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of the current one.
    pub context: Option<String>,
}

/// A connected client plus the namespace the kubeconfig selects.
#[derive(Clone)]
pub struct ClusterConnection {
    /// API client.
    pub client: Client,
    /// Namespace of the active context, `default` when unset.
    pub default_namespace: String,
}

impl ConnectionOptions {
    /// Resolve configuration and build a client.
    ///
    /// With neither a kubeconfig path nor a context, configuration is
    /// inferred (kubeconfig first, then in-cluster service account).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] when the configuration is missing or invalid.
    pub async fn connect(&self) -> Result<ClusterConnection, ConnectError> {
        let config = self.load_config().await?;
        let default_namespace = config.default_namespace.clone();
        debug!(cluster_url = %config.cluster_url, namespace = %default_namespace, "kube config resolved");
        let client = Client::try_from(config).map_err(|e| ConnectError::Client(e.to_string()))?;
        Ok(ClusterConnection {
            client,
            default_namespace,
        })
    }

    async fn load_config(&self) -> Result<Config, ConnectError> {
        if self.kubeconfig.is_none() && self.context.is_none() {
            return Config::infer()
                .await
                .map_err(|e| ConnectError::Config(e.to_string()));
        }
        let options = KubeConfigOptions {
            context: self.context.clone(),
            ..KubeConfigOptions::default()
        };
        match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ConnectError::Config(format!("{}: {e}", path.display()))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ConnectError::Config(e.to_string()))
            }
            None => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ConnectError::Config(e.to_string())),
        }
    }
}

/// Read-only cluster access through the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap a connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn lookup_error(namespace: &str, err: kube::Error) -> LookupError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => LookupError::NotFound(namespace.to_owned()),
        other => LookupError::Request {
            namespace: namespace.to_owned(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl NamespaceLookup for KubeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, LookupError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get(name).await.map_err(|e| lookup_error(name, e))
    }
}

#[async_trait]
impl PodLister for KubeCluster {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, LookupError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| lookup_error(namespace, e))?;
        debug!(namespace, count = pods.items.len(), "listed pods");
        Ok(pods.items)
    }
}

#[async_trait]
impl NamespaceLister for KubeCluster {
    async fn list_namespaces(&self, name: Option<&str>) -> Result<Vec<Namespace>, ListError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(name) = name {
            params = params.fields(&format!("metadata.name={name}"));
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| ListError(e.to_string()))?;
        Ok(list.items)
    }
}
