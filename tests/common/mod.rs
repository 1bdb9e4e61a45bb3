//! Common fixtures for the reconcile integration tests
//!
//! Every test runs against an [`InMemoryCluster`]; manifests are written to a
//! temporary directory the way the operator image ships them.

#![allow(dead_code, reason = "each test binary uses a subset of the fixtures")]

use serde_json::{json, Value};
use serverless_operator::cluster::memory::InMemoryCluster;
use serverless_operator::cluster::ClusterClient;
use serverless_operator::config::{ControllerConfig, ManifestPaths};
use serverless_operator::controller::context::Context;
use serverless_operator::observability::Metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const EVENTING_NAMESPACE: &str = "knative-eventing";

/// Build a reconcile context over an in-memory cluster
pub fn context_with(config: ControllerConfig) -> (Arc<InMemoryCluster>, Context) {
    let cluster = Arc::new(InMemoryCluster::new());
    let ctx = Context::new(
        Arc::clone(&cluster) as Arc<dyn ClusterClient>,
        Arc::new(config),
        Arc::new(Metrics::new().expect("metrics registry")),
    );
    (cluster, ctx)
}

pub fn seed(cluster: &InMemoryCluster, value: Value) {
    cluster
        .seed(serde_json::from_value(value).expect("valid object"))
        .expect("seed object");
}

fn write(dir: &Path, file: &str, content: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, content).expect("write manifest");
    path
}

/// Write the five Kafka manifests and return their paths
///
/// The channel manifest carries the `kafka-ch-dispatcher` Deployment, the
/// control plane manifest carries `kafka-controller`.
pub fn kafka_manifests(dir: &TempDir) -> ManifestPaths {
    let root = dir.path();
    ManifestPaths {
        kafka_channel: Some(write(
            root,
            "channel.yaml",
            r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: kafka-ch-dispatcher
  namespace: knative-eventing
spec:
  replicas: 1
  selector:
    matchLabels:
      app: kafka-ch-dispatcher
  template:
    metadata:
      labels:
        app: kafka-ch-dispatcher
      annotations:
        kafka.eventing.knative.dev/configmap-hash: manifest
    spec:
      containers:
      - name: dispatcher
        image: registry/dispatcher:1
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: kafka-channel-config
  namespace: knative-eventing
data: {}
",
        )),
        kafka_source: Some(write(
            root,
            "source.yaml",
            r"apiVersion: v1
kind: ServiceAccount
metadata:
  name: kafka-source-dispatcher
  namespace: knative-eventing
",
        )),
        kafka_controller: Some(write(
            root,
            "controller.yaml",
            r"apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: kafka-controller
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: kafka-controller
  namespace: knative-eventing
spec:
  replicas: 1
  selector:
    matchLabels:
      app: kafka-controller
  template:
    metadata:
      labels:
        app: kafka-controller
    spec:
      containers:
      - name: controller
        image: registry/controller:1
        args: []
",
        )),
        kafka_broker: Some(write(
            root,
            "broker.yaml",
            r"apiVersion: v1
kind: ConfigMap
metadata:
  name: kafka-broker-config
  namespace: knative-eventing
data: {}
",
        )),
        kafka_sink: Some(write(
            root,
            "sink.yaml",
            r"apiVersion: v1
kind: ServiceAccount
metadata:
  name: kafka-sink-receiver
  namespace: knative-eventing
",
        )),
        ..ManifestPaths::default()
    }
}

/// A `KnativeKafka` with only the channel switched on
pub fn knative_kafka(name: &str) -> Value {
    json!({
        "apiVersion": "operator.serverless.openshift.io/v1alpha1",
        "kind": "KnativeKafka",
        "metadata": {"name": name, "namespace": EVENTING_NAMESPACE, "uid": "kafka-uid"},
        "spec": {
            "channel": {"enabled": true, "bootstrapServers": "my-cluster-kafka-bootstrap.kafka:9092"}
        }
    })
}

pub fn knative_eventing() -> Value {
    json!({
        "apiVersion": "operator.knative.dev/v1beta1",
        "kind": "KnativeEventing",
        "metadata": {"name": "knative-eventing", "namespace": EVENTING_NAMESPACE},
        "spec": {}
    })
}

pub fn features_config() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "config-features", "namespace": EVENTING_NAMESPACE},
        "data": {}
    })
}

/// A Deployment the cluster already scaled and reports as available
pub fn available_deployment(name: &str, replicas: i32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": EVENTING_NAMESPACE},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": [{"name": "main", "image": "registry/main:1"}]}
            }
        },
        "status": {"conditions": [{"type": "Available", "status": "True"}]}
    })
}

/// A Kourier `Ingress` exposing `hosts` externally
pub fn kourier_ingress(name: &str, hosts: &[&str]) -> Value {
    json!({
        "apiVersion": "networking.internal.knative.dev/v1alpha1",
        "kind": "Ingress",
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": "ingress-uid",
            "annotations": {"networking.knative.dev/ingress.class": "kourier.ingress.networking.knative.dev"},
        },
        "spec": {"rules": [{"hosts": hosts, "visibility": "ExternalIP"}]},
        "status": {"publicLoadBalancer": {"ingress": [
            {"domainInternal": "kourier.knative-serving-ingress.svc.cluster.local"}
        ]}}
    })
}
