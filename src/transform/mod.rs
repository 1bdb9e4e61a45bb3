//! # Transform Pipeline
//!
//! Transforms rewrite one resource at a time before it is applied: ownership
//! injection, image substitution, preservation of live fields and
//! parent-specific configuration. A [`Pipeline`] runs a fixed, declared list of
//! transforms over every resource of a [`ResourceSet`].
//!
//! Every transform recognises the kinds and names it cares about and returns
//! every other resource untouched.

pub mod images;
pub mod kafka;
pub mod owner;
pub mod preserve;
pub mod removal;

use crate::cluster::ClusterError;
use crate::manifest::kind::Workload;
use crate::manifest::{ManifestError, ResourceSet};
use async_trait::async_trait;
use kube::core::DynamicObject;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{transform} failed on {resource}: {source}")]
    Resource {
        transform: &'static str,
        resource: String,
        #[source]
        source: Box<TransformError>,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("failed to convert resource: {0}")]
    Convert(#[from] serde_json::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("{0}")]
    Invalid(String),
}

/// A single resource rewrite
#[async_trait]
pub trait Transform: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    async fn apply(&self, resource: DynamicObject) -> Result<DynamicObject, TransformError>;
}

/// Ordered list of transforms
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.transforms.iter().map(|t| t.name()))
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run every transform, in order, over every resource
    pub async fn run(&self, mut set: ResourceSet) -> Result<ResourceSet, TransformError> {
        debug!(
            transforms = ?self,
            resources = set.len(),
            "Transforming manifest"
        );
        let mut transformed = Vec::with_capacity(set.len());
        for resource in set.resources().iter().cloned() {
            let mut resource = resource;
            for transform in &self.transforms {
                let label = describe(&resource);
                resource = transform
                    .apply(resource)
                    .await
                    .map_err(|source| TransformError::Resource {
                        transform: transform.name(),
                        resource: label,
                        source: Box::new(source),
                    })?;
            }
            transformed.push(resource);
        }
        set.replace(transformed)?;
        Ok(set)
    }
}

/// Drops `metadata.creationTimestamp` from typed workloads
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetCreationTimestamp;

#[async_trait]
impl Transform for ResetCreationTimestamp {
    fn name(&self) -> &'static str {
        "reset-creation-timestamp"
    }

    async fn apply(&self, resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        Ok(Workload::from_dynamic(resource)?.into_dynamic()?)
    }
}

fn describe(resource: &DynamicObject) -> String {
    let kind = resource.types.as_ref().map_or("", |t| t.kind.as_str());
    let name = resource.metadata.name.as_deref().unwrap_or_default();
    match resource.metadata.namespace.as_deref() {
        Some(ns) => format!("{kind} {ns}/{name}"),
        None => format!("{kind} {name}"),
    }
}

/// Whether a resource is the `kind` named `name`
pub(crate) fn is_named(resource: &DynamicObject, kind: &str, name: &str) -> bool {
    resource.types.as_ref().is_some_and(|t| t.kind == kind)
        && resource.metadata.name.as_deref() == Some(name)
}

#[cfg(test)]
pub(crate) mod test_support {
    use kube::core::DynamicObject;
    use serde_json::json;

    pub fn deployment(name: &str, namespace: &str, replicas: Option<i32>) -> DynamicObject {
        let mut spec = json!({
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": [
                    {"name": "controller", "image": "registry/controller:template",
                     "env": [{"name": "DISPATCHER_IMAGE", "value": "registry/dispatcher:template"}]}
                ]}
            }
        });
        if let Some(replicas) = replicas {
            spec["replicas"] = json!(replicas);
        }
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": namespace},
            "spec": spec,
        }))
        .unwrap()
    }

    pub fn config_map(name: &str, namespace: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": namespace},
            "data": {}
        }))
        .unwrap()
    }
}
