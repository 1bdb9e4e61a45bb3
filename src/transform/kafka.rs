//! # Kafka Transforms
//!
//! Rewrites specific to the Kafka extension manifests: high-availability
//! replica counts, the set of controllers `kafka-controller` runs, and the
//! broker, channel and logging ConfigMaps rendered from the `KnativeKafka`
//! spec.

use super::{is_named, Transform, TransformError};
use crate::constants::KAFKA_CONTROLLER_DEPLOYMENT;
use crate::crd::KnativeKafkaSpec;
use crate::manifest::kind::Workload;
use async_trait::async_trait;
use kube::core::DynamicObject;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

const BROKER_CONFIG: &str = "kafka-broker-config";
const CHANNEL_CONFIG: &str = "kafka-channel-config";
const LOGGING_CONFIG: &str = "kafka-config-logging";

/// Sets `spec.replicas` on the named Deployments
#[derive(Debug, Clone)]
pub struct HaReplicasTransform {
    replicas: i32,
    deployments: &'static [&'static str],
}

impl HaReplicasTransform {
    pub fn new(replicas: i32, deployments: &'static [&'static str]) -> Self {
        Self {
            replicas,
            deployments,
        }
    }
}

#[async_trait]
impl Transform for HaReplicasTransform {
    fn name(&self) -> &'static str {
        "ha-replicas"
    }

    async fn apply(&self, mut resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        let Some(deployment) = self
            .deployments
            .iter()
            .find(|d| is_named(&resource, "Deployment", d))
        else {
            return Ok(resource);
        };
        info!(deployment, replicas = self.replicas, "Setting Kafka HA component");
        if let Some(spec) = resource.data.get_mut("spec").and_then(Value::as_object_mut) {
            spec.insert("replicas".to_string(), json!(self.replicas));
        }
        Ok(resource)
    }
}

/// Projects the `KnativeKafka` spec onto the Kafka control plane
#[derive(Debug, Clone)]
pub struct EventingKafkaTransform {
    spec: KnativeKafkaSpec,
}

impl EventingKafkaTransform {
    pub fn new(spec: KnativeKafkaSpec) -> Self {
        Self { spec }
    }

    /// `--disable-controllers` value for every component switched off
    pub fn disabled_controllers(&self) -> Option<String> {
        let mut disabled = BTreeMap::from([
            (
                "BROKER",
                "broker-controller,trigger-controller,namespaced-broker-controller,namespaced-trigger-controller",
            ),
            ("CHANNEL", "channel-controller"),
            ("SINK", "sink-controller"),
            ("SOURCE", "source-controller"),
        ]);
        if self.spec.broker.enabled {
            disabled.remove("BROKER");
        }
        if self.spec.channel.enabled {
            disabled.remove("CHANNEL");
        }
        if self.spec.sink.enabled {
            disabled.remove("SINK");
        }
        if self.spec.source.enabled {
            disabled.remove("SOURCE");
        }
        (!disabled.is_empty()).then(|| disabled.into_values().collect::<Vec<_>>().join(","))
    }

    fn configure_controller(&self, resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        let mut workload = Workload::from_dynamic(resource)?;
        let container = workload
            .pod_template_mut()
            .and_then(|t| t.spec.as_mut())
            .and_then(|s| s.containers.first_mut())
            .ok_or_else(|| {
                TransformError::Invalid(format!(
                    "{KAFKA_CONTROLLER_DEPLOYMENT} has no containers"
                ))
            })?;
        container.args = self
            .disabled_controllers()
            .map(|list| vec![format!("--disable-controllers={list}")]);
        Ok(workload.into_dynamic()?)
    }

    fn config_entries(&self, name: &str) -> Vec<(&'static str, String)> {
        let mut entries = Vec::new();
        match name {
            LOGGING_CONFIG => {
                entries.push(("config.xml", render_logging_config(self.spec.log_level())));
            }
            BROKER_CONFIG => {
                let config = &self.spec.broker.default_config;
                entries.push(("bootstrap.servers", config.bootstrap_servers.clone()));
                entries.push(("default.topic.partitions", config.num_partitions.to_string()));
                entries.push((
                    "default.topic.replication.factor",
                    config.replication_factor.to_string(),
                ));
                if !config.auth_secret_name.is_empty() {
                    entries.push(("auth.secret.ref.name", config.auth_secret_name.clone()));
                }
            }
            CHANNEL_CONFIG => {
                let channel = &self.spec.channel;
                entries.push(("bootstrap.servers", channel.bootstrap_servers.clone()));
                if !channel.auth_secret_name.is_empty() {
                    entries.push(("auth.secret.ref.name", channel.auth_secret_name.clone()));
                }
                if !channel.auth_secret_namespace.is_empty() {
                    entries.push((
                        "auth.secret.ref.namespace",
                        channel.auth_secret_namespace.clone(),
                    ));
                }
            }
            _ => {}
        }
        entries
    }
}

#[async_trait]
impl Transform for EventingKafkaTransform {
    fn name(&self) -> &'static str {
        "eventing-kafka"
    }

    async fn apply(&self, mut resource: DynamicObject) -> Result<DynamicObject, TransformError> {
        if is_named(&resource, "Deployment", KAFKA_CONTROLLER_DEPLOYMENT) {
            return self.configure_controller(resource);
        }

        let name = resource.metadata.name.clone().unwrap_or_default();
        let is_config_map = resource.types.as_ref().is_some_and(|t| t.kind == "ConfigMap");
        let entries = if is_config_map {
            self.config_entries(&name)
        } else {
            Vec::new()
        };
        if entries.is_empty() {
            return Ok(resource);
        }

        info!(configmap = %name, "Updating ConfigMap with values from KnativeKafka spec");
        let root = resource
            .data
            .as_object_mut()
            .ok_or_else(|| TransformError::Invalid(format!("ConfigMap {name} is not an object")))?;
        let data = root
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if data.is_null() {
            *data = Value::Object(Map::new());
        }
        let data = data
            .as_object_mut()
            .ok_or_else(|| TransformError::Invalid(format!("ConfigMap {name} data is not a map")))?;
        for (key, value) in entries {
            data.insert(key.to_string(), Value::String(value));
        }
        Ok(resource)
    }
}

/// Logback configuration for the Kafka data plane with the given root level
pub fn render_logging_config(level: &str) -> String {
    format!(
        r#"    <configuration>
      <appender name="jsonConsoleAppender" class="ch.qos.logback.core.ConsoleAppender">
        <encoder class="net.logstash.logback.encoder.LogstashEncoder"/>
      </appender>
      <root level="{level}">
        <appender-ref ref="jsonConsoleAppender"/>
      </root>
    </configuration>"#
    )
}
