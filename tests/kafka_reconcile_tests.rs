//! # KnativeKafka Reconcile Tests
//!
//! Drives the Kafka parent reconciler against an in-memory cluster.
//!
//! These tests verify:
//! - The first pass only adds the finalizer
//! - A missing KnativeEventing blocks the install
//! - The dispatcher keeps its live replica count across installs
//! - An unavailable control plane holds the parent in NotReady
//! - Disabling a component deletes only its resources
//! - Deletion tears everything down before releasing the parent
//! - A failed teardown keeps the finalizer until it succeeds

mod common;

use common::{
    available_deployment, context_with, features_config, kafka_manifests, knative_eventing,
    knative_kafka, seed, EVENTING_NAMESPACE,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::core::DynamicObject;
use serde_json::json;
use serverless_operator::cluster::memory::InMemoryCluster;
use serverless_operator::cluster::{gvk_of, ClusterClient, ObjectKey};
use serverless_operator::config::ControllerConfig;
use serverless_operator::controller::context::{Context, ReconcilerError};
use serverless_operator::controller::kafka::{
    KafkaManifests, KafkaParent, KAFKA_CONDITIONS, KAFKA_OWNER_KEYS,
};
use serverless_operator::controller::parent::read_status;
use serverless_operator::controller::Reconciler;
use serverless_operator::crd::{
    KnativeKafka, CONDITION_DEPENDENCIES_INSTALLED, CONDITION_DEPLOYMENTS_AVAILABLE,
    CONDITION_READY,
};
use std::sync::Arc;
use tempfile::TempDir;

const NAME: &str = "knative-kafka";

struct Fixture {
    cluster: Arc<InMemoryCluster>,
    ctx: Context,
    reconciler: Reconciler,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = ControllerConfig {
            kafka_version: "1.35.0".to_string(),
            manifests: kafka_manifests(&dir),
            ..ControllerConfig::default()
        };
        let manifests = KafkaManifests::load(&config.manifests).unwrap();
        let (cluster, ctx) = context_with(config);
        seed(&cluster, knative_kafka(NAME));
        Self {
            cluster,
            ctx,
            reconciler: Reconciler::Kafka(Arc::new(KafkaParent::new(manifests))),
            _dir: dir,
        }
    }

    /// Seed the dependencies a healthy install needs
    fn with_dependencies(self, dispatcher_replicas: i32) -> Self {
        seed(&self.cluster, knative_eventing());
        seed(&self.cluster, features_config());
        seed(&self.cluster, available_deployment("kafka-ch-dispatcher", dispatcher_replicas));
        seed(&self.cluster, available_deployment("kafka-controller", 1));
        self
    }

    async fn reconcile(&self) -> Result<(), ReconcilerError> {
        self.reconciler
            .reconcile(&self.ctx, EVENTING_NAMESPACE, NAME)
            .await
            .map(|_| ())
    }

    fn parent_key(&self) -> ObjectKey {
        ObjectKey::new(gvk_of::<KnativeKafka>(), Some(EVENTING_NAMESPACE), NAME)
    }

    fn deployment(&self, name: &str) -> Option<DynamicObject> {
        let key = ObjectKey::of::<Deployment>(Some(EVENTING_NAMESPACE), name);
        self.cluster.object(&key)
    }
}

#[tokio::test]
async fn test_first_pass_only_adds_finalizer() {
    let fixture = Fixture::new().with_dependencies(1);

    fixture.reconcile().await.unwrap();

    let parent = fixture.cluster.object(&fixture.parent_key()).unwrap();
    assert_eq!(
        parent.metadata.finalizers.unwrap(),
        vec!["knative-kafka-openshift".to_string()],
        "first pass should add the finalizer"
    );
    assert!(
        fixture.cluster.created().is_empty(),
        "no child may be created before the finalizer is persisted"
    );
}

#[tokio::test]
async fn test_missing_knative_eventing_blocks_install() {
    let fixture = Fixture::new();
    fixture.reconcile().await.unwrap();

    let err = fixture.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcilerError::NotReady(_)), "got {err:?}");
    assert!(fixture.cluster.created().is_empty());

    let status = read_status(&fixture.cluster.object(&fixture.parent_key()).unwrap());
    let condition = status.condition(CONDITION_DEPENDENCIES_INSTALLED).unwrap();
    assert_eq!(condition.status, "False");
    assert_eq!(
        condition.message.as_deref(),
        Some("Dependency installing: KnativeEventing")
    );
}

#[tokio::test]
async fn test_install_preserves_dispatcher_replicas() {
    let fixture = Fixture::new().with_dependencies(7);
    fixture.reconcile().await.unwrap();
    fixture.reconcile().await.unwrap();

    let dispatcher = fixture.deployment("kafka-ch-dispatcher").unwrap();
    assert_eq!(
        dispatcher.data["spec"]["replicas"],
        json!(7),
        "live replica count must survive the manifest's replicas: 1"
    );
    let owners = dispatcher.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].uid, "kafka-uid");

    let role = fixture
        .cluster
        .object(&ObjectKey::of::<ClusterRole>(None, "kafka-controller"))
        .unwrap();
    let annotations = role.metadata.annotations.unwrap();
    assert_eq!(
        KAFKA_OWNER_KEYS.owner_of(&annotations),
        Some((NAME.to_string(), EVENTING_NAMESPACE.to_string())),
        "cluster-scoped children carry the owner as annotations"
    );

    let status = read_status(&fixture.cluster.object(&fixture.parent_key()).unwrap());
    assert!(KAFKA_CONDITIONS.is_happy(&status), "status: {status:?}");
    assert_eq!(status.version.as_deref(), Some("1.35.0"));
}

#[tokio::test]
async fn test_unavailable_controller_is_not_ready() {
    let fixture = Fixture::new();
    seed(&fixture.cluster, knative_eventing());
    seed(&fixture.cluster, features_config());
    seed(&fixture.cluster, available_deployment("kafka-ch-dispatcher", 1));
    let mut controller = available_deployment("kafka-controller", 1);
    controller["status"] = json!({"conditions": [{"type": "Available", "status": "False"}]});
    seed(&fixture.cluster, controller);

    fixture.reconcile().await.unwrap();
    let err = fixture.reconcile().await.unwrap_err();
    match &err {
        ReconcilerError::NotReady(message) => assert!(message.contains("kafka-controller")),
        other => panic!("expected NotReady, got {other:?}"),
    }

    let status = read_status(&fixture.cluster.object(&fixture.parent_key()).unwrap());
    let available = status.condition(CONDITION_DEPLOYMENTS_AVAILABLE).unwrap();
    assert_eq!(available.status, "False");
    assert_eq!(available.reason.as_deref(), Some("NotReady"));
    assert!(!status.is_true(CONDITION_READY));
    assert!(
        !available
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("kafka-ch-dispatcher"),
        "only unavailable workloads are listed"
    );
}

#[tokio::test]
async fn test_repeated_install_writes_nothing() {
    let fixture = Fixture::new().with_dependencies(3);
    fixture.reconcile().await.unwrap();
    fixture.reconcile().await.unwrap();
    fixture.cluster.clear_mutations();

    fixture.reconcile().await.unwrap();
    assert!(
        fixture.cluster.created().is_empty() && fixture.cluster.updated().is_empty(),
        "converged install should not write: {:?}",
        fixture.cluster.mutations()
    );
    assert!(fixture.cluster.status_patched().is_empty());
}

#[tokio::test]
async fn test_disabled_component_is_deleted() {
    let fixture = Fixture::new().with_dependencies(1);
    fixture.reconcile().await.unwrap();
    fixture.reconcile().await.unwrap();
    assert!(fixture.deployment("kafka-ch-dispatcher").is_some());

    let mut parent = fixture.cluster.object(&fixture.parent_key()).unwrap();
    parent.data["spec"]["channel"]["enabled"] = json!(false);
    parent.data["spec"]["sink"] = json!({"enabled": true});
    fixture.cluster.update(&parent).await.unwrap();

    fixture.reconcile().await.unwrap();
    assert!(
        fixture.deployment("kafka-ch-dispatcher").is_none(),
        "channel dispatcher should be removed once the channel is disabled"
    );
    assert!(
        fixture.deployment("kafka-controller").is_some(),
        "control plane stays while the sink is enabled"
    );
}

#[tokio::test]
async fn test_deletion_tears_down_children() {
    let fixture = Fixture::new().with_dependencies(1);
    fixture.reconcile().await.unwrap();
    fixture.reconcile().await.unwrap();

    fixture.cluster.delete(&fixture.parent_key()).await.unwrap();
    assert!(
        fixture.cluster.object(&fixture.parent_key()).is_some(),
        "finalizer keeps the parent while children exist"
    );

    fixture.reconcile().await.unwrap();
    assert!(fixture.deployment("kafka-ch-dispatcher").is_none());
    assert!(fixture.deployment("kafka-controller").is_none());
    assert!(
        fixture.cluster.object(&fixture.parent_key()).is_none(),
        "parent is released after teardown"
    );
}

#[tokio::test]
async fn test_failed_teardown_keeps_finalizer() {
    let fixture = Fixture::new().with_dependencies(1);
    fixture.reconcile().await.unwrap();
    fixture.reconcile().await.unwrap();

    fixture.cluster.fail_writes_for("Deployment");
    fixture.cluster.delete(&fixture.parent_key()).await.unwrap();
    assert!(fixture.reconcile().await.is_err());

    let parent = fixture.cluster.object(&fixture.parent_key()).unwrap();
    assert_eq!(
        parent.metadata.finalizers.unwrap_or_default(),
        vec!["knative-kafka-openshift".to_string()],
        "finalizer must stay while children cannot be deleted"
    );
    assert!(fixture.deployment("kafka-controller").is_some());

    fixture.cluster.heal_writes_for("Deployment");
    fixture.reconcile().await.unwrap();
    assert!(fixture.deployment("kafka-controller").is_none());
    assert!(fixture.cluster.object(&fixture.parent_key()).is_none());
}
