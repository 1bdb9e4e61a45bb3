//! # Manifests
//!
//! A [`ResourceSet`] is the ordered, duplicate-free collection of resource
//! documents a reconciler builds up, transforms and finally applies or
//! deletes.
//!
//! - `loader.rs` - reading YAML/JSON manifests from files and directories
//! - `kind.rs` - closed-world typed view over the workload kinds transforms touch

pub mod kind;
pub mod loader;

use crate::cluster::{ClusterError, ObjectKey};
use kube::core::DynamicObject;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk manifest directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to parse manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid resource in manifest: {0}")]
    Invalid(#[from] ClusterError),

    /// Two resources with the same identity ended up in one set
    #[error("duplicate resource {0}")]
    Duplicate(String),
}

/// Ordered collection of resource descriptions with unique identities
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    resources: Vec<DynamicObject>,
}

impl ResourceSet {
    /// Build a set, rejecting resources without identity and duplicates
    pub fn new(resources: Vec<DynamicObject>) -> Result<Self, ManifestError> {
        let mut seen = HashSet::with_capacity(resources.len());
        for resource in &resources {
            let key = ObjectKey::from_object(resource)?;
            if !seen.insert(key.clone()) {
                return Err(ManifestError::Duplicate(key.to_string()));
            }
        }
        Ok(Self { resources })
    }

    pub fn resources(&self) -> &[DynamicObject] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<DynamicObject> {
        self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources matching `predicate`, in order
    #[must_use]
    pub fn filter<P>(&self, predicate: P) -> Self
    where
        P: Fn(&DynamicObject) -> bool,
    {
        Self {
            resources: self
                .resources
                .iter()
                .filter(|r| predicate(*r))
                .cloned()
                .collect(),
        }
    }

    /// Concatenate two sets; a resource present in both is an error
    pub fn merge(self, other: Self) -> Result<Self, ManifestError> {
        let mut resources = self.resources;
        resources.extend(other.resources);
        Self::new(resources)
    }

    /// Identity keys in order
    pub fn keys(&self) -> Result<Vec<ObjectKey>, ClusterError> {
        self.resources.iter().map(ObjectKey::from_object).collect()
    }

    /// Replace the resources with transformed ones, keeping identities unique
    pub(crate) fn replace(&mut self, resources: Vec<DynamicObject>) -> Result<(), ManifestError> {
        *self = Self::new(resources)?;
        Ok(())
    }
}

/// Resource predicates used to slice a [`ResourceSet`]
pub mod predicate {
    use kube::core::DynamicObject;

    fn kind(obj: &DynamicObject) -> &str {
        obj.types.as_ref().map_or("", |t| t.kind.as_str())
    }

    fn group(obj: &DynamicObject) -> &str {
        obj.types
            .as_ref()
            .and_then(|t| t.api_version.split_once('/'))
            .map_or("", |(group, _)| group)
    }

    pub fn by_kind(wanted: &str) -> impl Fn(&DynamicObject) -> bool + '_ {
        move |obj| kind(obj) == wanted
    }

    pub fn by_group(wanted: &str) -> impl Fn(&DynamicObject) -> bool + '_ {
        move |obj| group(obj) == wanted
    }

    pub fn is_role(obj: &DynamicObject) -> bool {
        matches!(kind(obj), "Role" | "ClusterRole")
    }

    pub fn is_role_binding(obj: &DynamicObject) -> bool {
        matches!(kind(obj), "RoleBinding" | "ClusterRoleBinding")
    }

    pub fn is_rbac(obj: &DynamicObject) -> bool {
        is_role(obj) || is_role_binding(obj)
    }

    pub fn is_crd(obj: &DynamicObject) -> bool {
        kind(obj) == "CustomResourceDefinition"
    }
}
