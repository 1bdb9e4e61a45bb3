//! # Kubernetes Cluster Client
//!
//! [`ClusterClient`] backed by the API server through `kube::Api<DynamicObject>`.
//!
//! Kinds are resolved with API discovery on first use and cached for the
//! lifetime of the client, so the plural name and scope of every resource in
//! the installed manifests come from the server rather than from guesswork.

use super::{labels_match, ClusterClient, ClusterError, ObjectKey};
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{ApiCapabilities, Scope},
    Client,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// API server implementation of [`ClusterClient`]
pub struct KubeCluster {
    client: Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a kind to its API resource, consulting discovery once per kind
    pub async fn resolve(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        if let Some(hit) = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(gvk)
        {
            return Ok(hit.clone());
        }

        let resolved = match kube::discovery::pinned_kind(&self.client, gvk).await {
            Ok(resolved) => resolved,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(ClusterError::NoMatch(describe(gvk)));
            }
            Err(kube::Error::Discovery(_)) => {
                return Err(ClusterError::NoMatch(describe(gvk)));
            }
            Err(e) => return Err(ClusterError::Api(e)),
        };

        debug!(
            kind = %gvk.kind,
            plural = %resolved.0.plural,
            "Resolved API resource"
        );
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ClusterError> {
        let (ar, caps) = self.resolve(gvk).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError> {
        let api = self.api(&key.gvk, key.namespace.as_deref()).await?;
        api.get_opt(&key.name)
            .await
            .map_err(|e| map_error(key, e))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let api = self.api(gvk, namespace).await?;
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector)
        };
        let list = api.list(&params).await.map_err(ClusterError::Api)?;
        Ok(list
            .items
            .into_iter()
            .filter(|obj| labels_match(obj.metadata.labels.as_ref(), labels))
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = ObjectKey::from_object(obj)?;
        let api = self.api(&key.gvk, key.namespace.as_deref()).await?;
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_error(&key, e))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = ObjectKey::from_object(obj)?;
        let api = self.api(&key.gvk, key.namespace.as_deref()).await?;
        api.replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_error(&key, e))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<(), ClusterError> {
        let api = self.api(&key.gvk, key.namespace.as_deref()).await?;
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_error(key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let api = self.api(&key.gvk, key.namespace.as_deref()).await?;
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error(key, e))
    }
}

fn map_error(key: &ObjectKey, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(e) if e.code == 404 => ClusterError::NotFound(key.to_string()),
        kube::Error::Api(e) if e.code == 409 => ClusterError::Conflict(key.to_string(), e.message),
        other => ClusterError::Api(other),
    }
}

fn describe(gvk: &GroupVersionKind) -> String {
    format!("{}.{}/{}", gvk.kind, gvk.group, gvk.version)
}
