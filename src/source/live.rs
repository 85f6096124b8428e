//! Objects read from a live cluster by resource type and name.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use tracing::debug;

use super::{ResourceInfo, ResourceSource, SourceError};
use crate::scheme::{ResourceScheme, SupportedKind};

/// Namespace selection for live reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    /// Objects in a single namespace.
    Namespace(String),
    /// Objects across all namespaces. Named lookups are not allowed.
    All,
}

/// Reads objects of one resource type from the cluster.
#[derive(Clone)]
pub struct LiveSource {
    client: Client,
    scheme: ResourceScheme,
    resource_type: String,
    names: Vec<String>,
    scope: NamespaceScope,
}

impl LiveSource {
    /// Read `resource_type` objects in `scope`, optionally only `names`.
    pub fn new(
        client: Client,
        scheme: ResourceScheme,
        resource_type: impl Into<String>,
        names: Vec<String>,
        scope: NamespaceScope,
    ) -> Self {
        Self {
            client,
            scheme,
            resource_type: resource_type.into(),
            names,
            scope,
        }
    }

    fn api(&self, kind: &SupportedKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, kind.plural);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn fetch_error(&self, err: kube::Error) -> SourceError {
        SourceError::Fetch {
            resource_type: self.resource_type.clone(),
            message: err.to_string(),
        }
    }
}

fn to_info(kind: &SupportedKind, object: DynamicObject) -> Result<ResourceInfo, SourceError> {
    let name = object
        .metadata
        .name
        .clone()
        .ok_or_else(|| SourceError::MissingField {
            origin: "cluster".to_owned(),
            field: "metadata.name",
        })?;
    let namespace = object.metadata.namespace.clone();
    let mut content = serde_json::to_value(&object).map_err(|e| SourceError::Fetch {
        resource_type: kind.plural.to_owned(),
        message: e.to_string(),
    })?;
    // List responses omit the type fields on items.
    if let Some(fields) = content.as_object_mut() {
        fields
            .entry("apiVersion")
            .or_insert_with(|| kind.api_version().into());
        fields
            .entry("kind")
            .or_insert_with(|| kind.kind.into());
    }
    Ok(ResourceInfo {
        kind: kind.kind.to_owned(),
        namespace,
        name,
        object: content,
        origin: "cluster".to_owned(),
    })
}

#[async_trait]
impl ResourceSource for LiveSource {
    fn is_local(&self) -> bool {
        false
    }

    async fn resources(&self) -> Result<Vec<ResourceInfo>, SourceError> {
        let kind = self
            .scheme
            .resolve(&self.resource_type)
            .ok_or_else(|| SourceError::UnknownResourceType(self.resource_type.clone()))?;

        let objects = match (&self.scope, self.names.is_empty()) {
            (NamespaceScope::All, true) => self
                .api(kind, None)
                .list(&ListParams::default())
                .await
                .map_err(|e| self.fetch_error(e))?
                .items,
            (NamespaceScope::All, false) => {
                return Err(SourceError::Fetch {
                    resource_type: self.resource_type.clone(),
                    message: "a resource cannot be retrieved by name across all namespaces"
                        .to_owned(),
                })
            }
            (NamespaceScope::Namespace(ns), true) => self
                .api(kind, Some(ns))
                .list(&ListParams::default())
                .await
                .map_err(|e| self.fetch_error(e))?
                .items,
            (NamespaceScope::Namespace(ns), false) => {
                let api = self.api(kind, Some(ns));
                let mut objects = Vec::with_capacity(self.names.len());
                for name in &self.names {
                    objects.push(api.get(name).await.map_err(|e| self.fetch_error(e))?);
                }
                objects
            }
        };
        debug!(kind = kind.kind, count = objects.len(), "fetched live objects");
        objects.into_iter().map(|o| to_info(kind, o)).collect()
    }
}
