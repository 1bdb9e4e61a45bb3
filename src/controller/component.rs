//! # KnativeServing and KnativeEventing Extensions
//!
//! Both parents belong to the upstream Knative operator. This reconciler only
//! defaults a handful of spec fields for OpenShift and installs the optional
//! extension manifests (console dashboards, service monitors) next to them.
//!
//! The two kinds run through the same [`ComponentParent`]; a
//! [`ComponentProfile`] names what differs between them. Every defaulting
//! stage writes a disjoint spec path, so their order inside a profile does not
//! matter.

use super::context::{Context, ReconcilerError};
use super::parent::ParentReconciler;
use crate::applier;
use crate::config::{ControllerConfig, ManifestPaths};
use crate::constants::{
    DEFAULT_DOMAIN_TEMPLATE, DEFAULT_SERVING_HA_REPLICAS, EVENTING_FINALIZER,
    EVENTING_OWNER_NAME, EVENTING_OWNER_NAMESPACE, KOURIER_INGRESS_CLASS, MONITORING_GROUP,
    SERVING_FINALIZER, SERVING_OWNER_NAME, SERVING_OWNER_NAMESPACE, WEBHOOK_MEMORY_LIMIT,
};
use crate::cluster::ObjectKey;
use crate::crd::{
    knative_eventing_gvk, knative_serving_gvk, CommonSpec, ComponentStatus, ConditionSet,
    HighAvailability, Registry, ResourceRequirementsOverride, CONDITION_DEPLOYMENTS_AVAILABLE,
    CONDITION_INSTALL_SUCCEEDED,
};
use crate::manifest::{loader, predicate, ResourceSet};
use crate::transform::images::{ImageOverrides, ImageTransform};
use crate::transform::owner::{OwnerAnnotationKeys, OwnerTransform};
use crate::transform::removal::{monitoring_enabled, remove_when_disabled};
use crate::transform::{Pipeline, ResetCreationTimestamp};
use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Condition types this operator writes on the upstream parents
pub const EXTENSION_CONDITIONS: ConditionSet =
    ConditionSet::batch(&[CONDITION_INSTALL_SUCCEEDED, CONDITION_DEPLOYMENTS_AVAILABLE]);

/// Which upstream parent a profile describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Serving,
    Eventing,
}

impl Component {
    pub fn gvk(self) -> GroupVersionKind {
        match self {
            Self::Serving => knative_serving_gvk(),
            Self::Eventing => knative_eventing_gvk(),
        }
    }

    pub fn version(self, config: &ControllerConfig) -> &str {
        match self {
            Self::Serving => &config.serving_version,
            Self::Eventing => &config.eventing_version,
        }
    }

    pub fn required_namespace(self, config: &ControllerConfig) -> Option<&str> {
        match self {
            Self::Serving => config.required_serving_namespace.as_deref(),
            Self::Eventing => config.required_eventing_namespace.as_deref(),
        }
    }

    fn extension_paths(self, paths: &ManifestPaths) -> [Option<&PathBuf>; 2] {
        match self {
            Self::Serving => [
                paths.serving_dashboards.as_ref(),
                paths.serving_monitoring.as_ref(),
            ],
            Self::Eventing => [
                paths.eventing_dashboards.as_ref(),
                paths.eventing_monitoring.as_ref(),
            ],
        }
    }
}

/// One OpenShift default applied to the parent spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defaulting {
    /// `domain` from the cluster ingress configuration
    ClusterDomain,
    /// `network.domainTemplate`
    DomainTemplate,
    /// `network.ingress.class`
    IngressClass,
    /// `controller-custom-certs` pointing at the service CA bundle
    ControllerCustomCerts,
    /// `registry` from the image overrides; optionally the queue sidecar image too
    Registry { queue_sidecar: bool },
    /// Memory limit on the named webhook container, unless one is set
    WebhookMemoryLimit(&'static str),
    /// HA replica count, unless one is set
    HighAvailability(i32),
}

impl Defaulting {
    async fn apply(
        self,
        ctx: &Context,
        spec: &mut CommonSpec,
    ) -> Result<(), ReconcilerError> {
        match self {
            Self::ClusterDomain => {
                if let Some(domain) = cluster_domain(ctx).await? {
                    spec.force_config("domain", &domain, "");
                }
            }
            Self::DomainTemplate => {
                spec.force_config("network", "domainTemplate", DEFAULT_DOMAIN_TEMPLATE);
            }
            Self::IngressClass => {
                spec.force_config("network", "ingress.class", KOURIER_INGRESS_CLASS);
            }
            Self::ControllerCustomCerts => {
                let certs = spec
                    .rest
                    .entry("controller-custom-certs".to_string())
                    .or_insert(Value::Null);
                let unset = certs.as_object().is_none_or(|c| {
                    c.values()
                        .all(|v| v.is_null() || v.as_str().is_some_and(str::is_empty))
                });
                if unset {
                    *certs = json!({"name": "config-service-ca", "type": "ConfigMap"});
                }
            }
            Self::Registry { queue_sidecar } => {
                apply_registry(spec, &ctx.config.image_overrides, queue_sidecar);
            }
            Self::WebhookMemoryLimit(container) => {
                ensure_memory_limit(spec, container, WEBHOOK_MEMORY_LIMIT);
            }
            Self::HighAvailability(replicas) => {
                if spec.high_availability.is_none() {
                    spec.high_availability = Some(HighAvailability {
                        replicas: Some(replicas),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Everything that differs between the Serving and Eventing extensions
#[derive(Debug, Clone, Copy)]
pub struct ComponentProfile {
    pub component: Component,
    /// Metric label and log name
    pub name: &'static str,
    pub finalizer: &'static str,
    pub owner_keys: OwnerAnnotationKeys,
    pub up_type: &'static str,
    pub defaulting: &'static [Defaulting],
}

pub const SERVING_PROFILE: ComponentProfile = ComponentProfile {
    component: Component::Serving,
    name: "serving",
    finalizer: SERVING_FINALIZER,
    owner_keys: OwnerAnnotationKeys {
        name: SERVING_OWNER_NAME,
        namespace: SERVING_OWNER_NAMESPACE,
    },
    up_type: "serving_status",
    defaulting: &[
        Defaulting::ClusterDomain,
        Defaulting::DomainTemplate,
        Defaulting::IngressClass,
        Defaulting::ControllerCustomCerts,
        Defaulting::Registry {
            queue_sidecar: true,
        },
        Defaulting::WebhookMemoryLimit("webhook"),
        Defaulting::HighAvailability(DEFAULT_SERVING_HA_REPLICAS),
    ],
};

pub const EVENTING_PROFILE: ComponentProfile = ComponentProfile {
    component: Component::Eventing,
    name: "eventing",
    finalizer: EVENTING_FINALIZER,
    owner_keys: OwnerAnnotationKeys {
        name: EVENTING_OWNER_NAME,
        namespace: EVENTING_OWNER_NAMESPACE,
    },
    up_type: "eventing_status",
    defaulting: &[
        Defaulting::Registry {
            queue_sidecar: false,
        },
        Defaulting::WebhookMemoryLimit("eventing-webhook"),
    ],
};

/// Optional manifests installed alongside a parent
#[derive(Debug, Clone, Default)]
pub struct ExtensionManifests {
    /// Console dashboards, living in the console config namespace
    pub dashboards: Option<ResourceSet>,
    /// Service monitors, dropped when metrics are off
    pub monitoring: Option<ResourceSet>,
}

impl ExtensionManifests {
    pub fn load(component: Component, paths: &ManifestPaths) -> Result<Self, ReconcilerError> {
        let [dashboards, monitoring] = component.extension_paths(paths);
        Ok(Self {
            dashboards: dashboards.map(|p| loader::load(p)).transpose()?,
            monitoring: monitoring.map(|p| loader::load(p)).transpose()?,
        })
    }

    fn all(&self) -> Result<ResourceSet, ReconcilerError> {
        let mut set = ResourceSet::default();
        for part in [&self.dashboards, &self.monitoring].into_iter().flatten() {
            set = set.merge(part.clone())?;
        }
        Ok(set)
    }
}

/// Reconciler shared by KnativeServing and KnativeEventing
#[derive(Debug, Clone)]
pub struct ComponentParent {
    profile: ComponentProfile,
    extensions: ExtensionManifests,
}

impl ComponentParent {
    pub fn new(profile: ComponentProfile, extensions: ExtensionManifests) -> Self {
        Self {
            profile,
            extensions,
        }
    }

    pub fn profile(&self) -> &ComponentProfile {
        &self.profile
    }

    /// Run every defaulting stage over the parent spec
    ///
    /// Returns the defaulted spec document when it differs from the current one.
    pub async fn default_spec(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
    ) -> Result<Option<Value>, ReconcilerError> {
        let raw = parent.data.get("spec").cloned().unwrap_or_else(|| json!({}));
        let mut spec: CommonSpec = serde_json::from_value(raw.clone())
            .map_err(|e| anyhow::anyhow!("{} spec is malformed: {e}", self.profile.name))?;
        for stage in self.profile.defaulting {
            stage.apply(ctx, &mut spec).await?;
        }
        let defaulted = serde_json::to_value(&spec)
            .map_err(|e| anyhow::anyhow!("failed to encode {} spec: {e}", self.profile.name))?;
        Ok((defaulted != raw).then_some(defaulted))
    }

    async fn transformed(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
    ) -> Result<ResourceSet, ReconcilerError> {
        let pipeline = Pipeline::new()
            .with(OwnerTransform::new(parent, self.profile.owner_keys)?)
            .with(ImageTransform::new(ctx.config.image_overrides.clone()))
            .with(ResetCreationTimestamp);
        Ok(pipeline.run(self.extensions.all()?).await?)
    }
}

#[async_trait]
impl ParentReconciler for ComponentParent {
    fn name(&self) -> &'static str {
        self.profile.name
    }

    fn gvk(&self) -> GroupVersionKind {
        self.profile.component.gvk()
    }

    fn finalizer(&self) -> &'static str {
        self.profile.finalizer
    }

    fn up_type(&self) -> &'static str {
        self.profile.up_type
    }

    fn conditions(&self) -> ConditionSet {
        EXTENSION_CONDITIONS
    }

    // observedGeneration belongs to the upstream operator
    fn writes_observed_generation(&self) -> bool {
        false
    }

    async fn install(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
        status: &mut ComponentStatus,
    ) -> Result<(), ReconcilerError> {
        let namespace = parent
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} has no namespace", self.profile.name))?;

        if let Some(spec) = self.default_spec(ctx, parent).await? {
            info!(kind = %self.gvk().kind, namespace = %namespace, "Writing OpenShift defaults to spec");
            let mut updated = parent.clone();
            updated.data["spec"] = spec;
            ctx.cluster.update(&updated).await?;
        }

        let set = self.transformed(ctx, parent).await?;
        let metrics_on = monitoring_enabled(
            ctx.cluster.as_ref(),
            &namespace,
            ctx.config.enable_monitoring_by_default,
        )
        .await?;
        let set = remove_when_disabled(
            ctx.cluster.as_ref(),
            set,
            predicate::by_group(MONITORING_GROUP),
            metrics_on,
        )
        .await?;

        let mut conditions = EXTENSION_CONDITIONS.manage(status);
        debug!(resources = set.len(), "Installing extension manifests");
        match applier::apply(ctx.cluster.as_ref(), &set).await {
            Ok(report) => {
                ctx.metrics.record_apply(&report);
                conditions.mark_true(CONDITION_INSTALL_SUCCEEDED);
            }
            Err(e) => {
                conditions.mark_false(CONDITION_INSTALL_SUCCEEDED, "Error", e.to_string());
                return Err(e.into());
            }
        }

        let unready = applier::unready_workloads(ctx.cluster.as_ref(), &set).await?;
        if !unready.is_empty() {
            let message = unready.join(", ");
            conditions.mark_false(
                CONDITION_DEPLOYMENTS_AVAILABLE,
                "NotReady",
                format!("Waiting on workloads: {message}"),
            );
            return Err(ReconcilerError::NotReady(message));
        }
        conditions.mark_true(CONDITION_DEPLOYMENTS_AVAILABLE);
        drop(conditions);

        status.version = Some(self.profile.component.version(&ctx.config).to_string());
        Ok(())
    }

    async fn teardown(&self, ctx: &Context, parent: &DynamicObject) -> Result<(), ReconcilerError> {
        let set = self.transformed(ctx, parent).await?;
        info!(resources = set.len(), kind = %self.gvk().kind, "Deleting extension resources");
        let report = applier::delete(ctx.cluster.as_ref(), &set).await?;
        ctx.metrics.record_apply(&report);
        Ok(())
    }
}

/// `spec.domain` of the OpenShift cluster ingress configuration
async fn cluster_domain(ctx: &Context) -> Result<Option<String>, ReconcilerError> {
    let key = ObjectKey::new(
        GroupVersionKind::gvk("config.openshift.io", "v1", "Ingress"),
        None,
        "cluster",
    );
    match ctx.cluster.get(&key).await {
        Ok(config) => Ok(config
            .and_then(|c| c.data["spec"]["domain"].as_str().map(str::to_string))
            .filter(|d| !d.is_empty())),
        Err(e) if e.is_no_match() => {
            debug!("No OpenShift ingress config available");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Point the registry at the overridden images
///
/// The `default` entry becomes the registry default; `queue-proxy` is also
/// the queue sidecar image when `queue_sidecar` is set.
fn apply_registry(spec: &mut CommonSpec, overrides: &ImageOverrides, queue_sidecar: bool) {
    if overrides.is_empty() {
        return;
    }
    let registry = spec.registry.get_or_insert_with(Registry::default);
    registry.r#override = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
    if let Some(default) = overrides.get("default") {
        registry.default = default.to_string();
    }
    if queue_sidecar {
        if let Some(image) = overrides.get("queue-proxy") {
            spec.force_config("deployment", "queueSidecarImage", image);
        }
    }
}

fn ensure_memory_limit(spec: &mut CommonSpec, container: &str, memory: &str) {
    if let Some(entry) = spec.resources.iter_mut().find(|r| r.container == container) {
        entry
            .limits
            .get_or_insert_with(BTreeMap::new)
            .entry("memory".to_string())
            .or_insert_with(|| memory.to_string());
        return;
    }
    spec.resources.push(ResourceRequirementsOverride {
        container: container.to_string(),
        limits: Some(BTreeMap::from([("memory".to_string(), memory.to_string())])),
        requests: None,
    });
}
