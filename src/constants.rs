//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Values prefixed with `DEFAULT_` can be overridden via environment
//! variables (see [`crate::config::ControllerConfig`]). The annotation, label
//! and finalizer keys are part of the contract with other cluster components
//! and must not change.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default maximum number of parallel reconciles per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 4;

/// Default period after which a healthy parent is reconciled again (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Default lower bound of the per-resource Fibonacci error backoff (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default upper bound of the per-resource Fibonacci error backoff (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default exponential backoff starting value for watch stream restarts (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch stream restarts (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting a watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Prefix of environment variables carrying image overrides
pub const IMAGE_OVERRIDE_PREFIX: &str = "IMAGE_";

/// Separator between parent and child name in an image override variable
pub const IMAGE_OVERRIDE_SEPARATOR: &str = "__";

/// Namespace the Knative Eventing control plane lives in
pub const EVENTING_NAMESPACE: &str = "knative-eventing";

/// Namespace OpenShift console dashboards are installed into
pub const CONSOLE_CONFIG_NAMESPACE: &str = "openshift-config-managed";

/// Annotation recording the document last applied to a child resource
pub const LAST_APPLIED_ANNOTATION: &str = "operator.serverless.openshift.io/last-applied";

// Kafka extension

/// Finalizer guarding teardown of KnativeKafka child resources
pub const KAFKA_FINALIZER: &str = "knative-kafka-openshift";

/// Annotation naming the owning KnativeKafka on cross-namespace children
pub const KAFKA_OWNER_NAME: &str = "knativekafkas.operator.serverless.openshift.io/ownerName";

/// Annotation naming the owning KnativeKafka namespace on cross-namespace children
pub const KAFKA_OWNER_NAMESPACE: &str =
    "knativekafkas.operator.serverless.openshift.io/ownerNamespace";

/// Pod template annotation the Kafka dispatcher controller maintains itself
pub const CONFIGMAP_HASH_ANNOTATION: &str = "kafka.eventing.knative.dev/configmap-hash";

/// Deployment whose replica count and configmap hash are owned by the Kafka controller
pub const KAFKA_CHANNEL_DISPATCHER: &str = "kafka-ch-dispatcher";

/// Deployments scaled by the KnativeKafka high-availability setting
pub const KAFKA_HA_COMPONENTS: [&str; 2] = ["kafka-controller", "kafka-webhook-eventing"];

/// Deployment running the Kafka controllers that can be selectively disabled
pub const KAFKA_CONTROLLER_DEPLOYMENT: &str = "kafka-controller";

/// ConfigMaps in `knative-eventing` whose changes resync every KnativeKafka
pub const KAFKA_DEPENDENT_CONFIGMAPS: [&str; 3] =
    ["config-tracing", "kafka-config-logging", "config-features"];

/// Log level applied when the KnativeKafka spec does not set one
pub const DEFAULT_KAFKA_LOG_LEVEL: &str = "INFO";

// Serving and Eventing extensions

/// Finalizer guarding teardown of KnativeServing extension resources
pub const SERVING_FINALIZER: &str = "knative-serving-openshift";

/// Finalizer guarding teardown of KnativeEventing extension resources
pub const EVENTING_FINALIZER: &str = "knative-eventing-openshift";

/// Annotation naming the owning KnativeServing on cross-namespace children
pub const SERVING_OWNER_NAME: &str = "serving.knative.openshift.io/ownerName";

/// Annotation naming the owning KnativeServing namespace on cross-namespace children
pub const SERVING_OWNER_NAMESPACE: &str = "serving.knative.openshift.io/ownerNamespace";

/// Annotation naming the owning KnativeEventing on cross-namespace children
pub const EVENTING_OWNER_NAME: &str = "eventing.knative.openshift.io/ownerName";

/// Annotation naming the owning KnativeEventing namespace on cross-namespace children
pub const EVENTING_OWNER_NAMESPACE: &str = "eventing.knative.openshift.io/ownerNamespace";

/// Domain template making every Knative service host a single wildcard level deep
pub const DEFAULT_DOMAIN_TEMPLATE: &str = "{{.Name}}-{{.Namespace}}.{{.Domain}}";

/// Ingress class handled by Kourier and the Route translator
pub const KOURIER_INGRESS_CLASS: &str = "kourier.ingress.networking.knative.dev";

/// Memory limit enforced on the Serving and Eventing webhooks
pub const WEBHOOK_MEMORY_LIMIT: &str = "1024Mi";

/// High-availability replica default for KnativeServing
pub const DEFAULT_SERVING_HA_REPLICAS: i32 = 2;

// Feature flag ConfigMaps

/// ConfigMap holding eventing feature flags
pub const FEATURES_CONFIGMAP: &str = "config-features";

/// Feature flag key selecting transport encryption
pub const TRANSPORT_ENCRYPTION_KEY: &str = "transport-encryption";

/// ConfigMap holding observability settings
pub const OBSERVABILITY_CONFIGMAP: &str = "config-observability";

/// Observability key selecting the metrics backend
pub const METRICS_BACKEND_KEY: &str = "metrics.backend-destination";

/// API group of TLS resources removed when transport encryption is off
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";

/// API group of monitoring resources removed when metrics are off
pub const MONITORING_GROUP: &str = "monitoring.coreos.com";

// Ingress translation

/// Finalizer guarding Route cleanup for Knative Ingresses
pub const INGRESS_FINALIZER: &str = "ocp-ingress";

/// Annotation selecting the ingress implementation
pub const INGRESS_CLASS_ANNOTATION: &str = "networking.knative.dev/ingress.class";

/// Label pointing from a Route to its Knative Ingress
pub const INGRESS_LABEL: &str = "networking.internal.knative.dev/ingress";

/// Label carrying the owning Ingress name on generated Routes
pub const OPENSHIFT_INGRESS_LABEL: &str = "serving.knative.openshift.io/ingressName";

/// Label carrying the owning Ingress namespace on generated Routes
pub const OPENSHIFT_INGRESS_NAMESPACE_LABEL: &str = "serving.knative.openshift.io/ingressNamespace";

/// Ingress annotation suppressing Route generation
pub const DISABLE_ROUTE_ANNOTATION: &str = "serving.knative.openshift.io/disableRoute";

/// Ingress annotation forcing passthrough termination
pub const ENABLE_PASSTHROUGH_ANNOTATION: &str = "serving.knative.openshift.io/enablePassthrough";

/// HAProxy timeout annotation set on every generated Route
pub const ROUTE_TIMEOUT_ANNOTATION: &str = "haproxy.router.openshift.io/timeout";

/// Route timeout, matching Knative's default maximum revision timeout
pub const DEFAULT_ROUTE_TIMEOUT: &str = "600s";

/// Target port name for edge-terminated Routes
pub const HTTP_PORT_NAME: &str = "http2";

/// Target port name for passthrough Routes
pub const HTTPS_PORT_NAME: &str = "https";

/// Service port signalling that a backend speaks TLS
pub const SERVICE_HTTPS_PORT: i32 = 443;
