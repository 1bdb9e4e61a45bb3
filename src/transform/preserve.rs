//! # Live Field Preservation
//!
//! A small set of fields on operator-managed Deployments is owned by someone
//! else at runtime (an autoscaler, or the workload's own controller). Before
//! such a Deployment is applied, the field is copied over from the live
//! object so the apply does not undo the external change.
//!
//! Only the fields in [`PreservedField`] can be preserved. A field missing on
//! the live object is never invented, and a missing live object leaves the
//! template alone.

use super::{is_named, Transform, TransformError};
use crate::cluster::{ClusterClient, ObjectKey};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::core::DynamicObject;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Fields that may be taken from the live object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedField {
    /// `spec.replicas`
    Replicas,
    /// One annotation on `spec.template.metadata`
    PodTemplateAnnotation(&'static str),
}

impl PreservedField {
    fn read(self, live: &Value) -> Option<Value> {
        let value = match self {
            Self::Replicas => live.pointer("/spec/replicas"),
            Self::PodTemplateAnnotation(key) => live
                .pointer("/spec/template/metadata/annotations")
                .and_then(|a| a.get(key)),
        }?;
        (!value.is_null()).then(|| value.clone())
    }

    fn write(self, data: &mut Value, value: Value) {
        match self {
            Self::Replicas => {
                if let Some(spec) = data.get_mut("spec").and_then(Value::as_object_mut) {
                    spec.insert("replicas".to_string(), value);
                }
            }
            Self::PodTemplateAnnotation(key) => {
                let Some(template) = data
                    .get_mut("spec")
                    .and_then(|s| s.get_mut("template"))
                    .and_then(Value::as_object_mut)
                else {
                    return;
                };
                let metadata = template
                    .entry("metadata")
                    .or_insert_with(|| Value::Object(Default::default()));
                let Some(metadata) = metadata.as_object_mut() else {
                    return;
                };
                let annotations = metadata
                    .entry("annotations")
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(annotations) = annotations.as_object_mut() {
                    annotations.insert(key.to_string(), value);
                }
            }
        }
    }
}

/// Copies one [`PreservedField`] from a live Deployment
#[derive(Clone)]
pub struct PreserveTransform {
    cluster: Arc<dyn ClusterClient>,
    deployment: &'static str,
    field: PreservedField,
}

impl std::fmt::Debug for PreserveTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreserveTransform")
            .field("deployment", &self.deployment)
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

impl PreserveTransform {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        deployment: &'static str,
        field: PreservedField,
    ) -> Self {
        Self {
            cluster,
            deployment,
            field,
        }
    }
}

#[async_trait]
impl Transform for PreserveTransform {
    fn name(&self) -> &'static str {
        match self.field {
            PreservedField::Replicas => "preserve-replicas",
            PreservedField::PodTemplateAnnotation(_) => "preserve-pod-annotation",
        }
    }

    async fn apply(&self, mut resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        if !is_named(&resource, "Deployment", self.deployment) {
            return Ok(resource);
        }
        let key =
            ObjectKey::of::<Deployment>(resource.metadata.namespace.as_deref(), self.deployment);
        let Some(live) = self.cluster.get(&key).await? else {
            return Ok(resource);
        };

        if let Some(value) = self.field.read(&live.data) {
            debug!(resource = %key, field = ?self.field, "Preserving live field");
            self.field.write(&mut resource.data, value);
        }
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::transform::test_support::deployment;
    use serde_json::json;

    const HASH: &str = "kafka.eventing.knative.dev/configmap-hash";

    fn cluster_with(live: Option<DynamicObject>) -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        if let Some(live) = live {
            cluster.seed(live).unwrap();
        }
        cluster
    }

    #[tokio::test]
    async fn test_replicas_survive_from_live_object() {
        let cluster = cluster_with(Some(deployment("kafka-ch-dispatcher", "ns", Some(7))));
        let transform =
            PreserveTransform::new(cluster, "kafka-ch-dispatcher", PreservedField::Replicas);

        let out = transform
            .apply(deployment("kafka-ch-dispatcher", "ns", Some(2)))
            .await
            .unwrap();
        assert_eq!(out.data["spec"]["replicas"], 7);
    }

    #[tokio::test]
    async fn test_first_create_keeps_template_value() {
        let transform = PreserveTransform::new(
            cluster_with(None),
            "kafka-ch-dispatcher",
            PreservedField::Replicas,
        );
        let out = transform
            .apply(deployment("kafka-ch-dispatcher", "ns", Some(2)))
            .await
            .unwrap();
        assert_eq!(out.data["spec"]["replicas"], 2);
    }

    #[tokio::test]
    async fn test_unset_live_field_is_not_invented() {
        let cluster = cluster_with(Some(deployment("kafka-ch-dispatcher", "ns", None)));
        let replicas = PreserveTransform::new(
            Arc::clone(&cluster) as Arc<dyn ClusterClient>,
            "kafka-ch-dispatcher",
            PreservedField::Replicas,
        );
        let hash = PreserveTransform::new(
            cluster,
            "kafka-ch-dispatcher",
            PreservedField::PodTemplateAnnotation(HASH),
        );

        let out = replicas
            .apply(deployment("kafka-ch-dispatcher", "ns", Some(2)))
            .await
            .unwrap();
        let out = hash.apply(out).await.unwrap();
        assert_eq!(out.data["spec"]["replicas"], 2);
        assert!(out.data["spec"]["template"]["metadata"]
            .get("annotations")
            .is_none());
    }

    #[tokio::test]
    async fn test_pod_template_annotation_is_copied() {
        let mut live = deployment("kafka-ch-dispatcher", "ns", None);
        live.data["spec"]["template"]["metadata"]["annotations"] = json!({ HASH: "abc" });
        let transform = PreserveTransform::new(
            cluster_with(Some(live)),
            "kafka-ch-dispatcher",
            PreservedField::PodTemplateAnnotation(HASH),
        );

        let out = transform
            .apply(deployment("kafka-ch-dispatcher", "ns", None))
            .await
            .unwrap();
        assert_eq!(
            out.data["spec"]["template"]["metadata"]["annotations"][HASH],
            "abc"
        );
    }

    #[tokio::test]
    async fn test_other_deployments_are_untouched() {
        let cluster = cluster_with(Some(deployment("kafka-controller", "ns", Some(7))));
        let transform =
            PreserveTransform::new(cluster, "kafka-ch-dispatcher", PreservedField::Replicas);
        let out = transform
            .apply(deployment("kafka-controller", "ns", Some(2)))
            .await
            .unwrap();
        assert_eq!(out.data["spec"]["replicas"], 2);
    }
}
