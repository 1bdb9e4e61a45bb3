//! # Ownership
//!
//! Children living next to their parent get a native controller owner
//! reference, so the cluster garbage-collects them with the parent.
//!
//! Owner references cannot cross namespaces. Children in another namespace,
//! or cluster-scoped ones, are instead stamped with a pair of annotations
//! naming the parent. That is a weak reference: it only lets watches map a
//! child event back to its parent, and cleanup of those children is the
//! parent reconciler's teardown job.

use super::{Transform, TransformError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use std::collections::BTreeMap;

/// Annotation keys carrying a weak `(name, namespace)` owner reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerAnnotationKeys {
    pub name: &'static str,
    pub namespace: &'static str,
}

impl OwnerAnnotationKeys {
    /// The `(name, namespace)` a child points back to, if it carries both keys
    pub fn owner_of(&self, annotations: &BTreeMap<String, String>) -> Option<(String, String)> {
        let name = annotations.get(self.name)?;
        let namespace = annotations.get(self.namespace)?;
        Some((name.clone(), namespace.clone()))
    }
}

/// How a child is tied to its parent
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerRelation {
    /// Same namespace: garbage collection follows the parent
    Controller(OwnerReference),
    /// Across namespaces: lookup key only, no garbage collection
    Annotated { name: String, namespace: String },
}

/// Attaches the parent to every child
#[derive(Debug, Clone)]
pub struct OwnerTransform {
    owner_ref: OwnerReference,
    name: String,
    namespace: String,
    keys: OwnerAnnotationKeys,
}

impl OwnerTransform {
    pub fn new(parent: &DynamicObject, keys: OwnerAnnotationKeys) -> Result<Self, TransformError> {
        let types = parent
            .types
            .as_ref()
            .ok_or_else(|| TransformError::Invalid("parent has no apiVersion/kind".to_string()))?;
        let name = parent
            .metadata
            .name
            .clone()
            .ok_or_else(|| TransformError::Invalid("parent has no name".to_string()))?;
        let namespace = parent
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| TransformError::Invalid(format!("parent {name} has no namespace")))?;
        let uid = parent
            .metadata
            .uid
            .clone()
            .ok_or_else(|| TransformError::Invalid(format!("parent {name} has no uid")))?;

        Ok(Self {
            owner_ref: OwnerReference {
                api_version: types.api_version.clone(),
                kind: types.kind.clone(),
                name: name.clone(),
                uid,
                controller: Some(true),
                block_owner_deletion: Some(true),
            },
            name,
            namespace,
            keys,
        })
    }

    /// The relation a child in `child_namespace` gets
    pub fn relation_for(&self, child_namespace: Option<&str>) -> OwnerRelation {
        if child_namespace == Some(self.namespace.as_str()) {
            OwnerRelation::Controller(self.owner_ref.clone())
        } else {
            OwnerRelation::Annotated {
                name: self.name.clone(),
                namespace: self.namespace.clone(),
            }
        }
    }
}

#[async_trait]
impl Transform for OwnerTransform {
    fn name(&self) -> &'static str {
        "owner"
    }

    async fn apply(&self, mut resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        match self.relation_for(resource.metadata.namespace.as_deref()) {
            OwnerRelation::Controller(owner_ref) => {
                let refs = resource.metadata.owner_references.get_or_insert_with(Vec::new);
                if !refs.iter().any(|r| r.uid == owner_ref.uid) {
                    refs.push(owner_ref);
                }
            }
            OwnerRelation::Annotated { name, namespace } => {
                let annotations = resource.metadata.annotations.get_or_insert_with(BTreeMap::new);
                annotations.insert(self.keys.name.to_string(), name);
                annotations.insert(self.keys.namespace.to_string(), namespace);
            }
        }
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_support::config_map;
    use serde_json::json;

    const KEYS: OwnerAnnotationKeys = OwnerAnnotationKeys {
        name: "example.dev/ownerName",
        namespace: "example.dev/ownerNamespace",
    };

    fn parent() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": {"name": "knative-kafka", "namespace": "knative-eventing", "uid": "u-1"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_same_namespace_child_gets_owner_reference_once() {
        let transform = OwnerTransform::new(&parent(), KEYS).unwrap();
        let child = transform
            .apply(config_map("kafka-broker-config", "knative-eventing"))
            .await
            .unwrap();
        let child = transform.apply(child).await.unwrap();

        let refs = child.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "KnativeKafka");
        assert_eq!(refs[0].controller, Some(true));
        assert!(child.metadata.annotations.is_none());
    }

    #[tokio::test]
    async fn test_cross_namespace_child_gets_annotations_only() {
        let transform = OwnerTransform::new(&parent(), KEYS).unwrap();
        let child = transform
            .apply(config_map("dashboard", "openshift-config-managed"))
            .await
            .unwrap();

        assert!(child.metadata.owner_references.is_none());
        let annotations = child.metadata.annotations.unwrap();
        assert_eq!(
            KEYS.owner_of(&annotations),
            Some(("knative-kafka".to_string(), "knative-eventing".to_string()))
        );
    }

    #[test]
    fn test_parent_without_uid_is_rejected() {
        let mut p = parent();
        p.metadata.uid = None;
        assert!(OwnerTransform::new(&p, KEYS).is_err());
    }

    #[test]
    fn test_owner_of_needs_both_keys() {
        let mut annotations = BTreeMap::new();
        annotations.insert(KEYS.name.to_string(), "x".to_string());
        assert_eq!(KEYS.owner_of(&annotations), None);
    }
}
