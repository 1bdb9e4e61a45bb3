//! # Workload Kinds
//!
//! Transforms only ever reach into a handful of workload kinds. [`Workload`]
//! lifts a dynamic resource into a typed one for those kinds and leaves
//! everything else in [`Workload::Other`], so dispatch is an exhaustive
//! `match` instead of string comparisons spread across transforms.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::core::DynamicObject;

/// A resource, typed when it is one of the handled workload kinds
#[derive(Debug, Clone)]
pub enum Workload {
    Deployment(Box<Deployment>),
    DaemonSet(Box<DaemonSet>),
    StatefulSet(Box<StatefulSet>),
    Job(Box<Job>),
    Other(DynamicObject),
}

impl Workload {
    /// Lift a dynamic object into its typed workload, if it is one
    pub fn from_dynamic(obj: DynamicObject) -> Result<Self, serde_json::Error> {
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map_or(("", ""), |t| (t.api_version.as_str(), t.kind.as_str()));

        Ok(match (api_version, kind) {
            ("apps/v1", "Deployment") => Self::Deployment(Box::new(convert(&obj)?)),
            ("apps/v1", "DaemonSet") => Self::DaemonSet(Box::new(convert(&obj)?)),
            ("apps/v1", "StatefulSet") => Self::StatefulSet(Box::new(convert(&obj)?)),
            ("batch/v1", "Job") => Self::Job(Box::new(convert(&obj)?)),
            _ => Self::Other(obj),
        })
    }

    /// Lower back into a dynamic object
    ///
    /// Typed workloads come back without `metadata.creationTimestamp`; a
    /// server-populated timestamp would otherwise show up as a difference on
    /// every apply.
    pub fn into_dynamic(self) -> Result<DynamicObject, serde_json::Error> {
        let mut obj = match self {
            Self::Deployment(d) => lower(&*d)?,
            Self::DaemonSet(d) => lower(&*d)?,
            Self::StatefulSet(s) => lower(&*s)?,
            Self::Job(j) => lower(&*j)?,
            Self::Other(obj) => return Ok(obj),
        };
        obj.metadata.creation_timestamp = None;
        Ok(obj)
    }

    pub fn name(&self) -> &str {
        let name = match self {
            Self::Deployment(d) => d.metadata.name.as_deref(),
            Self::DaemonSet(d) => d.metadata.name.as_deref(),
            Self::StatefulSet(s) => s.metadata.name.as_deref(),
            Self::Job(j) => j.metadata.name.as_deref(),
            Self::Other(obj) => obj.metadata.name.as_deref(),
        };
        name.unwrap_or_default()
    }

    pub fn generate_name(&self) -> Option<&str> {
        match self {
            Self::Deployment(d) => d.metadata.generate_name.as_deref(),
            Self::DaemonSet(d) => d.metadata.generate_name.as_deref(),
            Self::StatefulSet(s) => s.metadata.generate_name.as_deref(),
            Self::Job(j) => j.metadata.generate_name.as_deref(),
            Self::Other(obj) => obj.metadata.generate_name.as_deref(),
        }
    }

    /// Pod template of a typed workload
    pub fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        match self {
            Self::Deployment(d) => d.spec.as_mut().map(|s| &mut s.template),
            Self::DaemonSet(d) => d.spec.as_mut().map(|s| &mut s.template),
            Self::StatefulSet(s) => s.spec.as_mut().map(|s| &mut s.template),
            Self::Job(j) => j.spec.as_mut().map(|s| &mut s.template),
            Self::Other(_) => None,
        }
    }

    pub fn is_typed(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

fn convert<K: serde::de::DeserializeOwned>(obj: &DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

fn lower<K: serde::Serialize>(obj: &K) -> Result<DynamicObject, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "kafka-controller",
                "namespace": "knative-eventing",
                "creationTimestamp": "2024-01-01T00:00:00Z"
            },
            "spec": {
                "selector": {"matchLabels": {"app": "kafka-controller"}},
                "template": {
                    "metadata": {"labels": {"app": "kafka-controller"}},
                    "spec": {"containers": [{"name": "controller", "image": "a"}]}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_deployment_is_typed_and_round_trips() {
        let mut workload = Workload::from_dynamic(deployment()).unwrap();
        assert!(matches!(workload, Workload::Deployment(_)));
        assert_eq!(workload.name(), "kafka-controller");

        let template = workload.pod_template_mut().unwrap();
        let spec = template.spec.as_mut().unwrap();
        spec.containers[0].image = Some("b".to_string());

        let obj = workload.into_dynamic().unwrap();
        assert!(obj.metadata.creation_timestamp.is_none());
        assert_eq!(
            obj.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "b"
        );
        assert_eq!(obj.types.unwrap().kind, "Deployment");
    }

    #[test]
    fn test_other_kinds_pass_through_untouched() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "x", "creationTimestamp": "2024-01-01T00:00:00Z"},
            "data": {"k": "v"}
        }))
        .unwrap();
        let mut workload = Workload::from_dynamic(obj).unwrap();
        assert!(!workload.is_typed());
        assert!(workload.pod_template_mut().is_none());

        let back = workload.into_dynamic().unwrap();
        assert!(back.metadata.creation_timestamp.is_some());
        assert_eq!(back.data["data"]["k"], "v");
    }
}
