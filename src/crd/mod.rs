//! # Custom Resource Definitions
//!
//! Resource types read and written by the operator.
//!
//! ## Module Structure
//!
//! - `kafka.rs` - KnativeKafka, the only CRD this operator defines
//! - `knative.rs` - shared view of the upstream KnativeServing/KnativeEventing specs
//! - `ingress.rs` - Knative networking Ingress
//! - `route.rs` - OpenShift Route
//! - `status.rs` - condition-based parent status

mod ingress;
mod kafka;
mod knative;
mod route;
mod status;

pub use ingress::{
    HttpIngressPath, HttpIngressRuleValue, HttpOption, Ingress, IngressBackendSplit, IngressRule,
    IngressSpec, IngressStatus, IngressTls, LoadBalancerIngressStatus, LoadBalancerStatus,
    Visibility,
};
pub use kafka::{
    Broker, BrokerDefaultConfig, Channel, KnativeKafka, KnativeKafkaSpec, Logging, Sink, Source,
};
pub use knative::{
    knative_eventing_gvk, knative_serving_gvk, CommonSpec, HighAvailability, Registry,
    ResourceRequirementsOverride, KNATIVE_OPERATOR_GROUP, KNATIVE_OPERATOR_VERSION,
};
pub use route::{
    InsecureEdgeTerminationPolicy, Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig,
    TlsTermination, WildcardPolicy,
};
pub use status::{
    ComponentStatus, Condition, ConditionManager, ConditionSet, CONDITION_DEPENDENCIES_INSTALLED,
    CONDITION_DEPLOYMENTS_AVAILABLE, CONDITION_INSTALL_SUCCEEDED, CONDITION_READY, STATUS_FALSE,
    STATUS_TRUE, STATUS_UNKNOWN,
};
