//! # KnativeKafka
//!
//! The Kafka extension parent resource.
//!
//! ```yaml
//! apiVersion: operator.serverless.openshift.io/v1alpha1
//! kind: KnativeKafka
//! metadata:
//!   name: knative-kafka
//!   namespace: knative-eventing
//! spec:
//!   channel:
//!     enabled: true
//!     bootstrapServers: my-cluster-kafka-bootstrap.kafka:9092
//!   broker:
//!     enabled: true
//!     defaultConfig:
//!       bootstrapServers: my-cluster-kafka-bootstrap.kafka:9092
//!       numPartitions: 10
//!       replicationFactor: 3
//!   source:
//!     enabled: true
//!   sink:
//!     enabled: false
//! ```

use super::knative::HighAvailability;
use super::status::ComponentStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.serverless.openshift.io",
    version = "v1alpha1",
    kind = "KnativeKafka",
    plural = "knativekafkas",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeKafkaSpec {
    /// Kafka-backed Broker implementation
    #[serde(default)]
    pub broker: Broker,
    /// KafkaSource
    #[serde(default)]
    pub source: Source,
    /// KafkaSink
    #[serde(default)]
    pub sink: Sink,
    /// KafkaChannel
    #[serde(default)]
    pub channel: Channel,
    /// Replica count of the control-plane deployments
    #[serde(
        default,
        rename = "high-availability",
        skip_serializing_if = "Option::is_none"
    )]
    pub high_availability: Option<HighAvailability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
}

impl KnativeKafkaSpec {
    /// The shared control plane is needed as soon as any component is enabled
    pub fn control_plane_enabled(&self) -> bool {
        self.broker.enabled || self.sink.enabled || self.source.enabled || self.channel.enabled
    }

    /// Fill in the defaults applied before every install
    ///
    /// The defaulted copy is used in memory only and never written back.
    pub fn with_defaults(&self) -> Self {
        let mut spec = self.clone();
        if spec.high_availability.is_none() {
            spec.high_availability = Some(HighAvailability { replicas: Some(1) });
        }
        if spec.logging.is_none() {
            spec.logging = Some(Logging {
                level: crate::constants::DEFAULT_KAFKA_LOG_LEVEL.to_string(),
            });
        }
        spec
    }

    /// HA replica count after defaulting
    pub fn replicas(&self) -> i32 {
        self.high_availability
            .as_ref()
            .and_then(|ha| ha.replicas)
            .unwrap_or(1)
    }

    /// Root log level after defaulting
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .map_or(crate::constants::DEFAULT_KAFKA_LOG_LEVEL, |l| l.level.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Broker {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default_config: BrokerDefaultConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerDefaultConfig {
    /// Comma separated list of bootstrap servers
    #[serde(default)]
    pub bootstrap_servers: String,
    #[serde(default)]
    pub num_partitions: i32,
    #[serde(default)]
    pub replication_factor: i16,
    /// Secret holding the Kafka credentials, in the `knative-eventing` namespace
    #[serde(default)]
    pub auth_secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Sink {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bootstrap_servers: String,
    #[serde(default)]
    pub auth_secret_namespace: String,
    #[serde(default)]
    pub auth_secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    /// Root logger level, e.g. INFO or DEBUG
    #[serde(default)]
    pub level: String,
}
