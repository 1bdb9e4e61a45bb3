//! # Admission Validation
//!
//! Checks run before a KnativeKafka, KnativeServing or KnativeEventing is
//! admitted. A rejection carries a human-readable reason and is never retried.
//!
//! The pure checks are free functions; [`Validator`] strings them together and
//! supplies the cluster lookups they need.

use crate::cluster::{gvk_of, ClusterClient, ClusterError, ObjectKey};
use crate::config::ControllerConfig;
use crate::controller::component::Component;
use crate::crd::{knative_eventing_gvk, KnativeKafka, KnativeKafkaSpec};
use kube::core::{DynamicObject, GroupVersionKind};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{kind} may only be created in {required} namespace")]
    WrongNamespace { kind: String, required: String },

    #[error("Only one {kind} allowed per namespace")]
    NotLonely { kind: String },

    #[error("{0} is a required detail when {1} is true")]
    MissingField(&'static str, &'static str),

    #[error("{0}")]
    MissingDependency(String),

    #[error("Version constraint not fulfilled: minimum version: {minimum}, current version: {current}")]
    VersionTooOld { minimum: String, current: String },

    #[error("Could not parse version string {0:?}")]
    InvalidVersion(String),

    #[error("{0}")]
    Lookup(String, #[source] ClusterError),
}

/// Reject when a namespace is required and `namespace` is another one
pub fn validate_namespace(
    kind: &str,
    namespace: &str,
    required: Option<&str>,
) -> Result<(), ValidationError> {
    match required {
        Some(required) if required != namespace => Err(ValidationError::WrongNamespace {
            kind: kind.to_string(),
            required: required.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Reject when another instance of `kind` lives in the namespace
///
/// `existing` are the names already present there; the object itself may be
/// among them on update.
pub fn validate_lonely<'a, I>(kind: &str, name: &str, existing: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a str>,
{
    if existing.into_iter().any(|other| other != name) {
        return Err(ValidationError::NotLonely {
            kind: kind.to_string(),
        });
    }
    Ok(())
}

pub fn validate_kafka_shape(spec: &KnativeKafkaSpec) -> Result<(), ValidationError> {
    if spec.channel.enabled && spec.channel.bootstrap_servers.is_empty() {
        return Err(ValidationError::MissingField(
            "spec.channel.bootstrapServers",
            "spec.channel.enabled",
        ));
    }
    if spec.broker.enabled && spec.broker.default_config.bootstrap_servers.is_empty() {
        return Err(ValidationError::MissingField(
            "spec.broker.defaultConfig.bootstrapServers",
            "spec.broker.enabled",
        ));
    }
    Ok(())
}

/// `major.minor.patch` with an optional leading `v`; missing parts are 0
fn parse_version(version: &str) -> Result<[u64; 3], ValidationError> {
    let pattern = Regex::new(r"^v?(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<patch>\d+))?(?:[-+].*)?$")
        .map_err(|e| ValidationError::InvalidVersion(format!("{version}: {e}")))?;
    let captures = pattern
        .captures(version.trim())
        .ok_or_else(|| ValidationError::InvalidVersion(version.to_string()))?;

    let mut parts = [0u64; 3];
    for (slot, name) in parts.iter_mut().zip(["major", "minor", "patch"]) {
        if let Some(m) = captures.name(name) {
            *slot = m
                .as_str()
                .parse()
                .map_err(|_| ValidationError::InvalidVersion(version.to_string()))?;
        }
    }
    Ok(parts)
}

/// Reject when `actual` is older than `minimum`
///
/// A `0.0` minimum or a `0.0` cluster (CI builds) always passes.
pub fn validate_min_version(actual: &str, minimum: &str) -> Result<(), ValidationError> {
    let wanted = parse_version(minimum)?;
    let current = parse_version(actual)?;
    if wanted == [0, 0, 0] || current[..2] == [0, 0] {
        return Ok(());
    }
    if current.cmp(&wanted) == Ordering::Less {
        return Err(ValidationError::VersionTooOld {
            minimum: minimum.to_string(),
            current: actual.to_string(),
        });
    }
    Ok(())
}

/// Admission checks backed by cluster reads
#[derive(Clone)]
pub struct Validator {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Validator {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: Arc<ControllerConfig>) -> Self {
        Self { cluster, config }
    }

    pub async fn validate_kafka(&self, kafka: &KnativeKafka) -> Result<(), ValidationError> {
        let namespace = kafka.metadata.namespace.as_deref().unwrap_or_default();
        let name = kafka.metadata.name.as_deref().unwrap_or_default();

        validate_namespace(
            "KnativeKafka",
            namespace,
            self.config.required_kafka_namespace.as_deref(),
        )?;
        let existing = self
            .names(&gvk_of::<KnativeKafka>(), namespace, "Unable to list KnativeKafkas")
            .await?;
        validate_lonely("KnativeKafka", name, existing.iter().map(String::as_str))?;
        validate_kafka_shape(&kafka.spec)?;

        let eventing = self
            .names(
                &knative_eventing_gvk(),
                namespace,
                "Unable to list KnativeEventing instance",
            )
            .await?;
        if eventing.is_empty() {
            return Err(ValidationError::MissingDependency(
                "KnativeEventing instance must be installed before KnativeKafka".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn validate_component(
        &self,
        component: Component,
        parent: &DynamicObject,
    ) -> Result<(), ValidationError> {
        let gvk = component.gvk();
        let namespace = parent.metadata.namespace.as_deref().unwrap_or_default();
        let name = parent.metadata.name.as_deref().unwrap_or_default();

        validate_namespace(
            &gvk.kind,
            namespace,
            component.required_namespace(&self.config),
        )?;
        let existing = self
            .names(&gvk, namespace, &format!("Unable to list {}", gvk.kind))
            .await?;
        validate_lonely(&gvk.kind, name, existing.iter().map(String::as_str))?;

        if let Some(minimum) = self.config.min_openshift_version.as_deref() {
            let current = self.cluster_version().await?;
            validate_min_version(&current, minimum)?;
        }
        Ok(())
    }

    async fn names(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        failure: &str,
    ) -> Result<Vec<String>, ValidationError> {
        match self.cluster.list(gvk, Some(namespace), &BTreeMap::new()).await {
            Ok(items) => Ok(items
                .into_iter()
                .filter_map(|item| item.metadata.name)
                .collect()),
            Err(e) if e.is_no_match() => Ok(Vec::new()),
            Err(e) => Err(ValidationError::Lookup(failure.to_string(), e)),
        }
    }

    /// Desired version of the OpenShift cluster
    async fn cluster_version(&self) -> Result<String, ValidationError> {
        let key = ObjectKey::new(
            GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion"),
            None,
            "version",
        );
        let version = self
            .cluster
            .get(&key)
            .await
            .map_err(|e| ValidationError::Lookup("Unable to get ClusterVersion".to_string(), e))?
            .and_then(|cv| cv.data["status"]["desired"]["version"].as_str().map(str::to_string))
            .ok_or_else(|| ValidationError::InvalidVersion(String::new()))?;
        info!(version = %version, "Read OpenShift cluster version");
        Ok(version)
    }
}
