//! # KnativeKafka Reconciler
//!
//! Installs the Kafka extension of Knative Eventing. The five manifests
//! (channel, source, control plane, broker, sink) are loaded once at startup;
//! every reconcile applies the enabled ones and deletes the disabled ones.
//!
//! ## Install stages
//!
//! 1. Default HA replicas and log level (in memory only)
//! 2. Require a KnativeEventing next to the KnativeKafka
//! 3. Transform: ownership, HA replicas, controller and ConfigMap settings,
//!    images, dispatcher replica and configmap-hash preservation, creation
//!    timestamp reset
//! 4. Drop cert-manager resources unless transport encryption is on
//! 5. Apply RBAC first, then everything else
//! 6. Wait for Deployments and StatefulSets to become available
//!
//! After installing, the manifests of disabled components are transformed
//! and deleted.

use super::context::{Context, ReconcilerError};
use super::parent::ParentReconciler;
use crate::applier;
use crate::cluster::{from_dynamic, gvk_of};
use crate::config::ManifestPaths;
use crate::constants::{
    CERT_MANAGER_GROUP, CONFIGMAP_HASH_ANNOTATION, KAFKA_CHANNEL_DISPATCHER, KAFKA_FINALIZER,
    KAFKA_HA_COMPONENTS, KAFKA_OWNER_NAME, KAFKA_OWNER_NAMESPACE,
};
use crate::crd::{
    knative_eventing_gvk, ComponentStatus, ConditionSet, KnativeKafka, KnativeKafkaSpec,
    CONDITION_DEPENDENCIES_INSTALLED, CONDITION_DEPLOYMENTS_AVAILABLE, CONDITION_INSTALL_SUCCEEDED,
};
use crate::manifest::{loader, predicate, ManifestError, ResourceSet};
use crate::transform::images::ImageTransform;
use crate::transform::kafka::{EventingKafkaTransform, HaReplicasTransform};
use crate::transform::owner::{OwnerAnnotationKeys, OwnerTransform};
use crate::transform::preserve::{PreserveTransform, PreservedField};
use crate::transform::removal::{remove_when_disabled, transport_encryption_enabled};
use crate::transform::{Pipeline, ResetCreationTimestamp, TransformError};
use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Weak owner reference stamped on Kafka children outside the parent namespace
pub const KAFKA_OWNER_KEYS: OwnerAnnotationKeys = OwnerAnnotationKeys {
    name: KAFKA_OWNER_NAME,
    namespace: KAFKA_OWNER_NAMESPACE,
};

pub const KAFKA_CONDITIONS: ConditionSet = ConditionSet::living(&[
    CONDITION_DEPENDENCIES_INSTALLED,
    CONDITION_DEPLOYMENTS_AVAILABLE,
    CONDITION_INSTALL_SUCCEEDED,
]);

/// Which components a manifest build includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    EnabledOnly,
    DisabledOnly,
    All,
}

impl BuildMode {
    fn includes(self, enabled: bool) -> bool {
        match self {
            Self::EnabledOnly => enabled,
            Self::DisabledOnly => !enabled,
            Self::All => true,
        }
    }
}

/// The raw manifests of every Kafka component
#[derive(Debug, Clone, Default)]
pub struct KafkaManifests {
    pub channel: ResourceSet,
    pub source: ResourceSet,
    pub control_plane: ResourceSet,
    pub broker: ResourceSet,
    pub sink: ResourceSet,
}

impl KafkaManifests {
    /// Load every manifest; all five paths are required
    pub fn load(paths: &ManifestPaths) -> Result<Self, ReconcilerError> {
        Ok(Self {
            channel: load_required(paths.kafka_channel.as_ref(), "KAFKACHANNEL_MANIFEST_PATH")?,
            source: load_required(paths.kafka_source.as_ref(), "KAFKASOURCE_MANIFEST_PATH")?,
            control_plane: load_required(
                paths.kafka_controller.as_ref(),
                "KAFKACONTROLLER_MANIFEST_PATH",
            )?,
            broker: load_required(paths.kafka_broker.as_ref(), "KAFKABROKER_MANIFEST_PATH")?,
            sink: load_required(paths.kafka_sink.as_ref(), "KAFKASINK_MANIFEST_PATH")?,
        })
    }

    /// Concatenate the component manifests selected by `mode`
    pub fn build(&self, spec: &KnativeKafkaSpec, mode: BuildMode) -> Result<ResourceSet, ManifestError> {
        let components = [
            (&self.channel, spec.channel.enabled),
            (&self.control_plane, spec.control_plane_enabled()),
            (&self.source, spec.source.enabled),
            (&self.broker, spec.broker.enabled),
            (&self.sink, spec.sink.enabled),
        ];
        let mut set = ResourceSet::default();
        for (manifest, enabled) in components {
            if mode.includes(enabled) {
                set = set.merge(manifest.clone())?;
            }
        }
        Ok(set)
    }

    /// Every kind appearing in any manifest
    pub fn kinds(&self) -> Result<Vec<GroupVersionKind>, ReconcilerError> {
        let mut kinds = BTreeMap::new();
        for manifest in [&self.channel, &self.source, &self.control_plane, &self.broker, &self.sink] {
            for key in manifest.keys()? {
                kinds
                    .entry((key.gvk.group.clone(), key.gvk.version.clone(), key.gvk.kind.clone()))
                    .or_insert(key.gvk);
            }
        }
        Ok(kinds.into_values().collect())
    }
}

fn load_required(path: Option<&PathBuf>, variable: &'static str) -> Result<ResourceSet, ReconcilerError> {
    let path = ManifestPaths::require(path, variable)?;
    Ok(loader::load(&path)?)
}

/// Reconciler for `KnativeKafka`
#[derive(Debug, Clone)]
pub struct KafkaParent {
    manifests: Arc<KafkaManifests>,
}

impl KafkaParent {
    pub fn new(manifests: KafkaManifests) -> Self {
        Self {
            manifests: Arc::new(manifests),
        }
    }

    pub fn manifests(&self) -> &KafkaManifests {
        &self.manifests
    }

    fn pipeline(
        ctx: &Context,
        parent: &DynamicObject,
        spec: &KnativeKafkaSpec,
    ) -> Result<Pipeline, TransformError> {
        Ok(Pipeline::new()
            .with(OwnerTransform::new(parent, KAFKA_OWNER_KEYS)?)
            .with(HaReplicasTransform::new(spec.replicas(), &KAFKA_HA_COMPONENTS))
            .with(EventingKafkaTransform::new(spec.clone()))
            .with(ImageTransform::new(ctx.config.image_overrides.clone()))
            .with(PreserveTransform::new(
                Arc::clone(&ctx.cluster),
                KAFKA_CHANNEL_DISPATCHER,
                PreservedField::Replicas,
            ))
            .with(PreserveTransform::new(
                Arc::clone(&ctx.cluster),
                KAFKA_CHANNEL_DISPATCHER,
                PreservedField::PodTemplateAnnotation(CONFIGMAP_HASH_ANNOTATION),
            ))
            .with(ResetCreationTimestamp))
    }

    async fn transformed(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
        spec: &KnativeKafkaSpec,
        mode: BuildMode,
    ) -> Result<ResourceSet, ReconcilerError> {
        let set = self.manifests.build(spec, mode)?;
        Ok(Self::pipeline(ctx, parent, spec)?.run(set).await?)
    }

    async fn install_enabled(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
        namespace: &str,
        spec: &KnativeKafkaSpec,
        status: &mut ComponentStatus,
    ) -> Result<(), ReconcilerError> {
        let mut conditions = KAFKA_CONDITIONS.manage(status);

        let eventing = ctx
            .cluster
            .list(&knative_eventing_gvk(), Some(namespace), &BTreeMap::new())
            .await;
        match eventing {
            Ok(items) if !items.is_empty() => conditions.mark_true(CONDITION_DEPENDENCIES_INSTALLED),
            Ok(_) => {
                conditions.mark_false(
                    CONDITION_DEPENDENCIES_INSTALLED,
                    "Installing",
                    "Dependency installing: KnativeEventing",
                );
                return Err(ReconcilerError::NotReady(format!(
                    "KnativeEventing is not installed in {namespace}"
                )));
            }
            Err(e) if e.is_no_match() => {
                conditions.mark_false(
                    CONDITION_DEPENDENCIES_INSTALLED,
                    "Installing",
                    "Dependency installing: KnativeEventing",
                );
                return Err(ReconcilerError::NotReady(
                    "KnativeEventing kind is not registered".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let set = self
            .transformed(ctx, parent, spec, BuildMode::EnabledOnly)
            .await?;
        let tls = transport_encryption_enabled(ctx.cluster.as_ref(), namespace).await?;
        let set = remove_when_disabled(
            ctx.cluster.as_ref(),
            set,
            predicate::by_group(CERT_MANAGER_GROUP),
            tls,
        )
        .await?;

        info!(resources = set.len(), "Installing manifest");
        match applier::apply_rbac_ordered(ctx.cluster.as_ref(), &set).await {
            Ok(report) => {
                ctx.metrics.record_apply(&report);
                conditions.mark_true(CONDITION_INSTALL_SUCCEEDED);
            }
            Err(e) => {
                conditions.mark_false(CONDITION_INSTALL_SUCCEEDED, "Error", e.to_string());
                return Err(e.into());
            }
        }
        drop(conditions);
        status.version = Some(ctx.config.kafka_version.clone());

        let unready = applier::unready_workloads(ctx.cluster.as_ref(), &set).await?;
        let mut conditions = KAFKA_CONDITIONS.manage(status);
        if unready.is_empty() {
            conditions.mark_true(CONDITION_DEPLOYMENTS_AVAILABLE);
            Ok(())
        } else {
            let message = unready.join(", ");
            conditions.mark_false(
                CONDITION_DEPLOYMENTS_AVAILABLE,
                "NotReady",
                format!("Waiting on workloads: {message}"),
            );
            Err(ReconcilerError::NotReady(message))
        }
    }

    async fn delete_disabled(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
        spec: &KnativeKafkaSpec,
    ) -> Result<(), ReconcilerError> {
        let set = self
            .transformed(ctx, parent, spec, BuildMode::DisabledOnly)
            .await?;
        if set.is_empty() {
            return Ok(());
        }
        let report = applier::delete(ctx.cluster.as_ref(), &set).await?;
        ctx.metrics.record_apply(&report);
        Ok(())
    }
}

#[async_trait]
impl ParentReconciler for KafkaParent {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<KnativeKafka>()
    }

    fn finalizer(&self) -> &'static str {
        KAFKA_FINALIZER
    }

    fn up_type(&self) -> &'static str {
        "kafka_status"
    }

    fn conditions(&self) -> ConditionSet {
        KAFKA_CONDITIONS
    }

    async fn install(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
        status: &mut ComponentStatus,
    ) -> Result<(), ReconcilerError> {
        let kafka: KnativeKafka = from_dynamic(parent)?;
        let namespace = kafka
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| anyhow::anyhow!("KnativeKafka has no namespace"))?;
        let spec = kafka.spec.with_defaults();

        self.install_enabled(ctx, parent, &namespace, &spec, status)
            .await?;
        self.delete_disabled(ctx, parent, &spec).await
    }

    async fn teardown(&self, ctx: &Context, parent: &DynamicObject) -> Result<(), ReconcilerError> {
        let kafka: KnativeKafka = from_dynamic(parent)?;
        let spec = kafka.spec.with_defaults();
        let set = self.transformed(ctx, parent, &spec, BuildMode::All).await?;
        info!(resources = set.len(), "Deleting KnativeKafka resources");
        let report = applier::delete(ctx.cluster.as_ref(), &set).await?;
        ctx.metrics.record_apply(&report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::manifest::loader::parse_documents;
    use std::path::Path;

    fn set(doc: &str) -> ResourceSet {
        ResourceSet::new(parse_documents(Path::new("test.yaml"), doc).unwrap()).unwrap()
    }

    fn manifests() -> KafkaManifests {
        KafkaManifests {
            channel: set("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: kafka-channel-config\n  namespace: knative-eventing\n"),
            source: set("apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: source\n  namespace: knative-eventing\n"),
            control_plane: set("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: kafka-controller\n  namespace: knative-eventing\n"),
            broker: set("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: kafka-broker-config\n  namespace: knative-eventing\n"),
            sink: set("apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: sink\n  namespace: knative-eventing\n"),
        }
    }

    fn names(set: &ResourceSet) -> Vec<String> {
        set.keys().unwrap().into_iter().map(|k| k.name).collect()
    }

    #[test]
    fn test_build_modes_partition_components() {
        let manifests = manifests();
        let mut spec = KnativeKafkaSpec::default();
        spec.channel.enabled = true;
        spec.sink.enabled = true;

        let enabled = manifests.build(&spec, BuildMode::EnabledOnly).unwrap();
        assert_eq!(names(&enabled), vec!["kafka-channel-config", "kafka-controller", "sink"]);

        let disabled = manifests.build(&spec, BuildMode::DisabledOnly).unwrap();
        assert_eq!(names(&disabled), vec!["source", "kafka-broker-config"]);

        assert_eq!(manifests.build(&spec, BuildMode::All).unwrap().len(), 5);
    }

    #[test]
    fn test_control_plane_is_disabled_without_components() {
        let manifests = manifests();
        let spec = KnativeKafkaSpec::default();
        assert!(manifests.build(&spec, BuildMode::EnabledOnly).unwrap().is_empty());
    }

    #[test]
    fn test_kinds_are_distinct() {
        let kinds = manifests().kinds().unwrap();
        let names: Vec<_> = kinds.iter().map(|k| k.kind.as_str()).collect();
        assert_eq!(names, vec!["ConfigMap", "ServiceAccount", "Deployment"]);
    }

    #[test]
    fn test_missing_manifest_path_is_a_config_error() {
        let err = KafkaManifests::load(&ManifestPaths::default()).unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::Config(ConfigError::MissingVariable("KAFKACHANNEL_MANIFEST_PATH"))
        ));
    }
}
