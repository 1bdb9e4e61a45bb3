//! # KnativeEventing Extension Tests
//!
//! Runs the shared Serving/Eventing reconciler with the Eventing profile.
//!
//! These tests verify:
//! - OpenShift defaults are written to the parent spec
//! - Service monitors follow the metrics backend of the observability ConfigMap
//! - Dashboards in another namespace are owned through annotations and removed on deletion

mod common;

use common::{context_with, knative_eventing, seed, EVENTING_NAMESPACE};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::GroupVersionKind;
use serde_json::json;
use serverless_operator::cluster::memory::InMemoryCluster;
use serverless_operator::cluster::{ClusterClient, ObjectKey};
use serverless_operator::config::{ControllerConfig, ManifestPaths};
use serverless_operator::controller::component::{
    Component, ComponentParent, ExtensionManifests, EVENTING_PROFILE,
};
use serverless_operator::controller::context::Context;
use serverless_operator::controller::Reconciler;
use serverless_operator::crd::knative_eventing_gvk;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const DASHBOARD_NAMESPACE: &str = "openshift-config-managed";

fn dashboard_key() -> ObjectKey {
    ObjectKey::of::<ConfigMap>(
        Some(DASHBOARD_NAMESPACE),
        "grafana-dashboard-definition-knative-eventing",
    )
}

fn monitor_key() -> ObjectKey {
    ObjectKey::new(
        GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor"),
        Some(EVENTING_NAMESPACE),
        "knative-eventing-controller-sm",
    )
}

fn parent_key() -> ObjectKey {
    ObjectKey::new(knative_eventing_gvk(), Some(EVENTING_NAMESPACE), "knative-eventing")
}

struct Fixture {
    cluster: Arc<InMemoryCluster>,
    ctx: Context,
    reconciler: Reconciler,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let dashboards = dir.path().join("dashboards.yaml");
        fs::write(
            &dashboards,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: grafana-dashboard-definition-knative-eventing\n  namespace: openshift-config-managed\ndata:\n  eventing.json: '{}'\n",
        )
        .unwrap();
        let monitoring = dir.path().join("monitoring.yaml");
        fs::write(
            &monitoring,
            "apiVersion: monitoring.coreos.com/v1\nkind: ServiceMonitor\nmetadata:\n  name: knative-eventing-controller-sm\n  namespace: knative-eventing\nspec:\n  endpoints: []\n",
        )
        .unwrap();

        let paths = ManifestPaths {
            eventing_dashboards: Some(dashboards),
            eventing_monitoring: Some(monitoring),
            ..ManifestPaths::default()
        };
        let extensions = ExtensionManifests::load(Component::Eventing, &paths).unwrap();
        let config = ControllerConfig {
            eventing_version: "1.15".to_string(),
            manifests: paths,
            ..ControllerConfig::default()
        };
        let (cluster, ctx) = context_with(config);
        seed(&cluster, knative_eventing());
        Self {
            cluster,
            ctx,
            reconciler: Reconciler::Component(Arc::new(ComponentParent::new(
                EVENTING_PROFILE,
                extensions,
            ))),
            _dir: dir,
        }
    }

    async fn reconcile(&self) {
        self.reconciler
            .reconcile(&self.ctx, EVENTING_NAMESPACE, "knative-eventing")
            .await
            .unwrap();
    }

    fn set_metrics_backend(&self, backend: &str) {
        seed(
            &self.cluster,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "config-observability", "namespace": EVENTING_NAMESPACE},
                "data": {"metrics.backend-destination": backend}
            }),
        );
    }
}

#[tokio::test]
async fn test_webhook_memory_limit_is_defaulted() {
    let fixture = Fixture::new();
    fixture.reconcile().await;
    fixture.reconcile().await;

    let parent = fixture.cluster.object(&parent_key()).unwrap();
    assert_eq!(
        parent.data["spec"]["resources"],
        json!([{"container": "eventing-webhook", "limits": {"memory": "1024Mi"}}])
    );
    assert_eq!(parent.data["status"]["version"], "1.15");
}

#[tokio::test]
async fn test_service_monitors_follow_metrics_backend() {
    let fixture = Fixture::new();
    fixture.reconcile().await;
    fixture.reconcile().await;
    assert!(
        fixture.cluster.object(&monitor_key()).is_none(),
        "monitoring is off without a backend"
    );
    assert!(fixture.cluster.object(&dashboard_key()).is_some());

    fixture.set_metrics_backend("prometheus");
    fixture.reconcile().await;
    assert!(fixture.cluster.object(&monitor_key()).is_some());

    fixture.set_metrics_backend("none");
    fixture.reconcile().await;
    assert!(
        fixture.cluster.object(&monitor_key()).is_none(),
        "switching the backend off removes the monitor"
    );
}

#[tokio::test]
async fn test_deletion_removes_cross_namespace_dashboards() {
    let fixture = Fixture::new();
    fixture.reconcile().await;
    fixture.reconcile().await;

    let dashboard = fixture.cluster.object(&dashboard_key()).unwrap();
    let annotations = dashboard.metadata.annotations.unwrap();
    assert_eq!(
        EVENTING_PROFILE.owner_keys.owner_of(&annotations),
        Some(("knative-eventing".to_string(), EVENTING_NAMESPACE.to_string()))
    );
    assert!(dashboard.metadata.owner_references.is_none());

    fixture.cluster.delete(&parent_key()).await.unwrap();
    fixture.reconcile().await;

    assert!(fixture.cluster.object(&dashboard_key()).is_none());
    assert!(fixture.cluster.object(&parent_key()).is_none());
}
