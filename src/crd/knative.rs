//! # Knative Operator Parents
//!
//! KnativeServing and KnativeEventing are owned by the upstream Knative
//! operator. This operator only extends them, so it works on their untyped
//! documents and reads the few shared spec fields through [`CommonSpec`].

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KNATIVE_OPERATOR_GROUP: &str = "operator.knative.dev";
pub const KNATIVE_OPERATOR_VERSION: &str = "v1beta1";

pub fn knative_serving_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(KNATIVE_OPERATOR_GROUP, KNATIVE_OPERATOR_VERSION, "KnativeServing")
}

pub fn knative_eventing_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(KNATIVE_OPERATOR_GROUP, KNATIVE_OPERATOR_VERSION, "KnativeEventing")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct HighAvailability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Image registry settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Registry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub r#override: BTreeMap<String, String>,
}

/// Per-container resource requirements override
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResourceRequirementsOverride {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, String>>,
}

/// Typed view of the spec fields shared by KnativeServing and KnativeEventing
///
/// Fields not listed here are kept in `rest` so a round trip is lossless.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CommonSpec {
    /// ConfigMap name (without `config-` prefix) to key/value pairs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<Registry>,
    #[serde(
        default,
        rename = "high-availability",
        skip_serializing_if = "Option::is_none"
    )]
    pub high_availability: Option<HighAvailability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRequirementsOverride>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, serde_json::Value>,
}

impl CommonSpec {
    /// Set `config[name][key]` unless a value is already present
    pub fn default_config(&mut self, name: &str, key: &str, value: &str) {
        self.config
            .entry(name.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Set `config[name][key]`, overwriting any existing value
    pub fn force_config(&mut self, name: &str, key: &str, value: &str) {
        self.config
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}
