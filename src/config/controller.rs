//! # Controller Configuration
//!
//! Operator settings loaded from environment variables.

use crate::transform::images::ImageOverrides;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Startup configuration errors. These are fatal and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVariable(&'static str),
}

/// Paths to the manifests installed on behalf of each parent kind
///
/// Kafka paths are required when the Kafka controller runs; the Serving and
/// Eventing extension manifests are optional.
#[derive(Debug, Clone, Default)]
pub struct ManifestPaths {
    pub kafka_channel: Option<PathBuf>,
    pub kafka_source: Option<PathBuf>,
    pub kafka_controller: Option<PathBuf>,
    pub kafka_broker: Option<PathBuf>,
    pub kafka_sink: Option<PathBuf>,
    pub serving_dashboards: Option<PathBuf>,
    pub serving_monitoring: Option<PathBuf>,
    pub eventing_dashboards: Option<PathBuf>,
    pub eventing_monitoring: Option<PathBuf>,
}

impl ManifestPaths {
    /// Return a required Kafka manifest path or fail with the variable name
    pub fn require(path: Option<&PathBuf>, variable: &'static str) -> Result<PathBuf, ConfigError> {
        path.cloned().ok_or(ConfigError::MissingVariable(variable))
    }
}

/// Operator-level configuration
///
/// All settings have defaults and can be overridden via environment variables
/// set on the operator Deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Global log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Upper bound of parallel reconciles per controller
    pub max_concurrent_reconciliations: u16,
    /// Requeue period after a successful reconcile (seconds)
    pub resync_interval_secs: u64,
    /// Per-resource error backoff lower bound (seconds)
    pub backoff_min_secs: u64,
    /// Per-resource error backoff upper bound (seconds)
    pub backoff_max_secs: u64,
    /// Watch stream restart backoff start (milliseconds)
    pub watch_backoff_start_ms: u64,
    /// Watch stream restart backoff cap (milliseconds)
    pub watch_backoff_max_ms: u64,
    /// Delay before restarting a watch stream after an unknown error (seconds)
    pub watch_restart_delay_secs: u64,
    /// Namespace the operator runs in
    pub pod_namespace: String,
    /// Namespace KnativeKafka objects must live in, if constrained
    pub required_kafka_namespace: Option<String>,
    /// Namespace KnativeServing objects must live in, if constrained
    pub required_serving_namespace: Option<String>,
    /// Namespace KnativeEventing objects must live in, if constrained
    pub required_eventing_namespace: Option<String>,
    /// Minimum supported OpenShift version
    pub min_openshift_version: Option<String>,
    /// Monitoring default when the observability ConfigMap names no backend
    pub enable_monitoring_by_default: bool,
    /// Version stamped into KnativeKafka status
    pub kafka_version: String,
    /// Version stamped into KnativeServing status
    pub serving_version: String,
    /// Version stamped into KnativeEventing status
    pub eventing_version: String,
    /// Manifest locations
    pub manifests: ManifestPaths,
    /// Image overrides parsed from `IMAGE_*` variables
    pub image_overrides: ImageOverrides,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_backoff_start_ms: DEFAULT_WATCH_BACKOFF_START_MS,
            watch_backoff_max_ms: DEFAULT_WATCH_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            pod_namespace: "openshift-serverless".to_string(),
            required_kafka_namespace: None,
            required_serving_namespace: None,
            required_eventing_namespace: None,
            min_openshift_version: None,
            enable_monitoring_by_default: false,
            kafka_version: String::new(),
            serving_version: String::new(),
            eventing_version: String::new(),
            manifests: ManifestPaths::default(),
            image_overrides: ImageOverrides::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of environment variables
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        use crate::constants::*;
        let env: HashMap<String, String> = vars.into_iter().collect();
        let defaults = Self::default();

        Self {
            metrics_port: env_var_or_default(&env, "METRICS_PORT", defaults.metrics_port),
            log_level: env_var_or_default_str(&env, "LOG_LEVEL", &defaults.log_level),
            log_format: env_var_or_default_str(&env, "LOG_FORMAT", &defaults.log_format),
            max_concurrent_reconciliations: env_var_or_default(
                &env,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            resync_interval_secs: env_var_or_default(
                &env,
                "RESYNC_INTERVAL_SECS",
                defaults.resync_interval_secs,
            ),
            backoff_min_secs: env_var_or_default(&env, "BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default(&env, "BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_backoff_start_ms: env_var_or_default(
                &env,
                "BACKOFF_START_MS",
                DEFAULT_WATCH_BACKOFF_START_MS,
            ),
            watch_backoff_max_ms: env_var_or_default(
                &env,
                "BACKOFF_MAX_MS",
                DEFAULT_WATCH_BACKOFF_MAX_MS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                &env,
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            pod_namespace: env_var_or_default_str(&env, "POD_NAMESPACE", &defaults.pod_namespace),
            required_kafka_namespace: env_var_non_empty(&env, "REQUIRED_KAFKA_NAMESPACE"),
            required_serving_namespace: env_var_non_empty(&env, "REQUIRED_SERVING_NAMESPACE"),
            required_eventing_namespace: env_var_non_empty(&env, "REQUIRED_EVENTING_NAMESPACE"),
            min_openshift_version: env_var_non_empty(&env, "MIN_OPENSHIFT_VERSION"),
            enable_monitoring_by_default: env_var_or_default_bool(
                &env,
                "ENABLE_MONITORING_BY_DEFAULT",
                false,
            ),
            kafka_version: env_var_or_default_str(&env, "KNATIVE_EVENTING_KAFKA_BROKER_VERSION", ""),
            serving_version: env_var_or_default_str(&env, "KNATIVE_SERVING_VERSION", ""),
            eventing_version: env_var_or_default_str(&env, "KNATIVE_EVENTING_VERSION", ""),
            manifests: ManifestPaths {
                kafka_channel: env_var_path(&env, "KAFKACHANNEL_MANIFEST_PATH"),
                kafka_source: env_var_path(&env, "KAFKASOURCE_MANIFEST_PATH"),
                kafka_controller: env_var_path(&env, "KAFKACONTROLLER_MANIFEST_PATH"),
                kafka_broker: env_var_path(&env, "KAFKABROKER_MANIFEST_PATH"),
                kafka_sink: env_var_path(&env, "KAFKASINK_MANIFEST_PATH"),
                serving_dashboards: env_var_path(&env, "SERVING_DASHBOARD_MANIFEST_PATH"),
                serving_monitoring: env_var_path(&env, "SERVING_MONITORING_MANIFEST_PATH"),
                eventing_dashboards: env_var_path(&env, "EVENTING_DASHBOARD_MANIFEST_PATH"),
                eventing_monitoring: env_var_path(&env, "EVENTING_MONITORING_MANIFEST_PATH"),
            },
            image_overrides: ImageOverrides::from_environ(
                env.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                IMAGE_OVERRIDE_PREFIX,
            ),
        }
    }

    /// Requeue period after a successful reconcile
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Delay before restarting a failed watch stream
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read a variable or return the default value
fn env_var_or_default<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str, default: T) -> T {
    env.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a variable as boolean or return the default
fn env_var_or_default_bool(env: &HashMap<String, String>, key: &str, default: bool) -> bool {
    env.get(key)
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1" || v == "yes" || v == "on"
        })
        .unwrap_or(default)
}

/// Read a variable as string or return the default
fn env_var_or_default_str(env: &HashMap<String, String>, key: &str, default: &str) -> String {
    env.get(key).cloned().unwrap_or_else(|| default.to_string())
}

/// Read a variable, treating an empty value as unset
fn env_var_non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

fn env_var_path(env: &HashMap<String, String>, key: &str) -> Option<PathBuf> {
    env_var_non_empty(env, key).map(PathBuf::from)
}
