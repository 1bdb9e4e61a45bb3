//! # Cluster Access
//!
//! The object store every reconciler talks to.
//!
//! [`ClusterClient`] is the seam between the reconcile logic and the API
//! server: [`client::KubeCluster`] is the production implementation, and
//! [`memory::InMemoryCluster`] backs the tests. Objects cross the seam as
//! [`DynamicObject`]s; typed views are produced with [`from_dynamic`] and
//! [`to_dynamic`].

pub mod client;
pub mod memory;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identity of a resource: `(kind, group/version, namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(gvk: GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            gvk,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Key of a typed resource kind
    pub fn of<K>(namespace: Option<&str>, name: &str) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new(gvk_of::<K>(), namespace, name)
    }

    /// Key of a dynamic object, derived from its type and object metadata
    pub fn from_object(obj: &DynamicObject) -> Result<Self, ClusterError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| ClusterError::Invalid("object has no apiVersion/kind".to_string()))?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::Invalid(format!("{} has no name", types.kind)))?;
        Ok(Self::new(
            gvk_from_type_meta(types),
            obj.metadata.namespace.as_deref(),
            name,
        ))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk.kind, ns, self.name),
            None => write!(f, "{} {}", self.gvk.kind, self.name),
        }
    }
}

/// Errors returned by a [`ClusterClient`]
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    /// The kind is not registered with the API server (CRD not installed)
    #[error("no matches for kind {0}")]
    NoMatch(String),

    #[error("conflict writing {0}: {1}")]
    Conflict(String, String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(..))
    }
}

/// Typed Get/Create/Update/Delete/List against a cluster object store
///
/// Writes use optimistic concurrency: `update` carries the resource version
/// of the object it was derived from and fails with
/// [`ClusterError::Conflict`] if the stored object moved on.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError>;

    /// List objects of a kind, optionally within one namespace, matching every label
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    /// Merge-patch the status subresource with `{"status": status}`
    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<(), ClusterError>;

    /// Delete an object, [`ClusterError::NotFound`] when absent
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError>;
}

pub fn gvk_of<K>() -> GroupVersionKind
where
    K: Resource<DynamicType = ()>,
{
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

pub fn gvk_from_type_meta(types: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    GroupVersionKind::gvk(group, version, &types.kind)
}

pub fn api_version_of(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

/// Convert a dynamic object into a typed resource
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ClusterError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert a typed resource into a dynamic object
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, ClusterError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Fetch a typed resource
pub async fn get_typed<K>(
    cluster: &dyn ClusterClient,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>, ClusterError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    cluster
        .get(&ObjectKey::of::<K>(namespace, name))
        .await?
        .map(|obj| from_dynamic(&obj))
        .transpose()
}

/// List a typed resource kind
pub async fn list_typed<K>(
    cluster: &dyn ClusterClient,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>, ClusterError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    cluster
        .list(&gvk_of::<K>(), namespace, labels)
        .await?
        .iter()
        .map(from_dynamic)
        .collect()
}

/// Whether every `selector` label is present on `labels` with the same value
pub fn labels_match(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;

    #[test]
    fn test_gvk_from_type_meta_core_and_grouped() {
        let core = gvk_from_type_meta(&TypeMeta {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        });
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
        assert_eq!(api_version_of(&core), "v1");

        let apps = gvk_from_type_meta(&TypeMeta {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
        });
        assert_eq!(apps, gvk_of::<Deployment>());
        assert_eq!(api_version_of(&apps), "apps/v1");
    }

    #[test]
    fn test_object_key_from_object_requires_type_and_name() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "kafka-controller", "namespace": "knative-eventing"}
        }))
        .unwrap();
        let key = ObjectKey::from_object(&obj).unwrap();
        assert_eq!(key.to_string(), "Deployment knative-eventing/kafka-controller");

        let nameless: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {}
        }))
        .unwrap();
        assert!(matches!(
            ObjectKey::from_object(&nameless),
            Err(ClusterError::Invalid(_))
        ));
    }

    #[test]
    fn test_labels_match() {
        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), "1".to_string());
        labels.insert("b".to_string(), "2".to_string());

        let mut selector = BTreeMap::new();
        assert!(labels_match(None, &selector));
        selector.insert("a".to_string(), "1".to_string());
        assert!(labels_match(Some(&labels), &selector));
        assert!(!labels_match(None, &selector));
        selector.insert("b".to_string(), "3".to_string());
        assert!(!labels_match(Some(&labels), &selector));
    }
}
