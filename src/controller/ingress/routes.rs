//! # Ingress to Route Translation
//!
//! Derives the OpenShift Routes that expose a Knative Ingress through the
//! cluster router. Every external host gets one Route pointing at the Kourier
//! gateway service named in the Ingress load balancer status.

use crate::constants::{
    DEFAULT_ROUTE_TIMEOUT, DISABLE_ROUTE_ANNOTATION, ENABLE_PASSTHROUGH_ANNOTATION,
    HTTPS_PORT_NAME, HTTP_PORT_NAME, INGRESS_LABEL, OPENSHIFT_INGRESS_LABEL,
    OPENSHIFT_INGRESS_NAMESPACE_LABEL, ROUTE_TIMEOUT_ANNOTATION, SERVICE_HTTPS_PORT,
};
use crate::crd::{
    HttpOption, Ingress, IngressRule, InsecureEdgeTerminationPolicy, Route, RoutePort, RouteSpec,
    RouteTargetReference, TlsConfig, TlsTermination, Visibility, WildcardPolicy,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The load balancer status names no `<service>.<namespace>.svc...` address yet
    #[error("unable to find Ingress LoadBalancer with DomainInternal set")]
    NoValidLoadBalancerDomain,
}

/// `route-<uid>-<first 6 hex chars of sha256(host)>`
pub fn route_name(uid: &str, host: &str) -> String {
    let digest = Sha256::digest(host.as_bytes());
    format!(
        "route-{uid}-{:02x}{:02x}{:02x}",
        digest[0], digest[1], digest[2]
    )
}

/// Hosts reachable from outside the cluster
///
/// `a.b` is kept; `a.b.svc...` and other in-cluster names are not.
fn is_external_host(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    labels.len() == 2 || (labels.len() > 2 && labels[2] != "svc")
}

/// `(service, namespace)` of the gateway, from the last usable internal domain
fn load_balancer_service(ingress: &Ingress) -> Result<(String, String), RouteError> {
    ingress
        .status
        .as_ref()
        .and_then(|s| s.public_load_balancer.as_ref())
        .into_iter()
        .flat_map(|lb| &lb.ingress)
        .filter_map(|lb| lb.domain_internal.as_deref())
        .filter_map(|domain| {
            let labels: Vec<&str> = domain.split('.').collect();
            (labels.len() > 2 && labels[2] == "svc" && !labels[0].is_empty() && !labels[1].is_empty())
                .then(|| (labels[0].to_string(), labels[1].to_string()))
        })
        .last()
        .ok_or(RouteError::NoValidLoadBalancerDomain)
}

/// Every Route the Ingress should have, in rule and host order
pub fn make_routes(ingress: &Ingress) -> Result<Vec<Route>, RouteError> {
    let annotations = ingress.metadata.annotations.clone().unwrap_or_default();
    if annotations.contains_key(DISABLE_ROUTE_ANNOTATION) {
        return Ok(Vec::new());
    }

    let targets: Vec<(&IngressRule, &str)> = ingress
        .spec
        .rules
        .iter()
        .filter(|rule| rule.visibility != Visibility::ClusterLocal)
        .flat_map(|rule| {
            rule.hosts
                .iter()
                .map(String::as_str)
                .filter(|host| is_external_host(host))
                .map(move |host| (rule, host))
        })
        .collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let (service, namespace) = load_balancer_service(ingress)?;
    Ok(targets
        .into_iter()
        .map(|(rule, host)| make_route(ingress, &annotations, rule, host, &service, &namespace))
        .collect())
}

fn make_route(
    ingress: &Ingress,
    ingress_annotations: &BTreeMap<String, String>,
    rule: &IngressRule,
    host: &str,
    service: &str,
    namespace: &str,
) -> Route {
    let ingress_name = ingress.metadata.name.clone().unwrap_or_default();
    let ingress_namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let uid = ingress.metadata.uid.as_deref().unwrap_or_default();

    let mut annotations = ingress_annotations.clone();
    annotations.insert(
        ROUTE_TIMEOUT_ANNOTATION.to_string(),
        DEFAULT_ROUTE_TIMEOUT.to_string(),
    );

    let mut labels = ingress.metadata.labels.clone().unwrap_or_default();
    labels.insert(INGRESS_LABEL.to_string(), ingress_name.clone());
    labels.insert(OPENSHIFT_INGRESS_LABEL.to_string(), ingress_name);
    labels.insert(OPENSHIFT_INGRESS_NAMESPACE_LABEL.to_string(), ingress_namespace);

    let passthrough = rule.targets_port(SERVICE_HTTPS_PORT)
        || ingress_annotations.contains_key(ENABLE_PASSTHROUGH_ANNOTATION)
        || ingress
            .spec
            .tls
            .iter()
            .any(|tls| tls.hosts.iter().any(|h| h == host));

    let (target_port, tls) = if passthrough {
        (
            HTTPS_PORT_NAME,
            TlsConfig {
                termination: TlsTermination::Passthrough,
                insecure_edge_termination_policy: Some(InsecureEdgeTerminationPolicy::Redirect),
            },
        )
    } else {
        let insecure = match ingress.spec.http_option {
            Some(HttpOption::Redirected) => InsecureEdgeTerminationPolicy::Redirect,
            _ => InsecureEdgeTerminationPolicy::Allow,
        };
        (
            HTTP_PORT_NAME,
            TlsConfig {
                termination: TlsTermination::Edge,
                insecure_edge_termination_policy: Some(insecure),
            },
        )
    };

    Route {
        metadata: ObjectMeta {
            name: Some(route_name(uid, host)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        spec: RouteSpec {
            host: host.to_string(),
            path: None,
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: service.to_string(),
                weight: Some(100),
            },
            port: Some(RoutePort {
                target_port: IntOrString::String(target_port.to_string()),
            }),
            tls: Some(tls),
            wildcard_policy: WildcardPolicy::None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UID: &str = "8a7e9a9d-fbc6-11e9-a88e-0261aff8d6d8";

    fn ingress(spec: serde_json::Value, annotations: serde_json::Value) -> Ingress {
        serde_json::from_value(json!({
            "apiVersion": "networking.internal.knative.dev/v1alpha1",
            "kind": "Ingress",
            "metadata": {
                "name": "ingress",
                "namespace": "default",
                "uid": UID,
                "labels": {"serving.knative.dev/route": "hello"},
                "annotations": annotations,
            },
            "spec": spec,
            "status": {"publicLoadBalancer": {"ingress": [
                {"domainInternal": "kourier.knative-serving-ingress.svc.cluster.local"}
            ]}}
        }))
        .unwrap()
    }

    fn rule(hosts: &[&str], visibility: &str, port: i32) -> serde_json::Value {
        json!({
            "hosts": hosts,
            "visibility": visibility,
            "http": {"paths": [{"splits": [
                {"serviceName": "hello", "serviceNamespace": "default", "servicePort": port, "percent": 100}
            ]}]}
        })
    }

    fn tls_of(route: &Route) -> (TlsTermination, Option<InsecureEdgeTerminationPolicy>, IntOrString) {
        let tls = route.spec.tls.clone().unwrap();
        (
            tls.termination,
            tls.insecure_edge_termination_policy,
            route.spec.port.clone().unwrap().target_port,
        )
    }

    #[test]
    fn test_route_name_is_deterministic() {
        let host = "public.default.domainName";
        let name = route_name(UID, host);
        assert_eq!(name, route_name(UID, host));
        let suffix = name.strip_prefix(&format!("route-{UID}-")).unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(name, route_name(UID, "other.default.domainName"));
    }

    #[test]
    fn test_external_rule_produces_edge_route() {
        let ing = ingress(
            json!({"rules": [rule(&["public.default.domainName"], "ExternalIP", 80)]}),
            json!({"foo": "bar"}),
        );
        let routes = make_routes(&ing).unwrap();
        assert_eq!(routes.len(), 1);

        let route = &routes[0];
        assert_eq!(route.metadata.namespace.as_deref(), Some("knative-serving-ingress"));
        assert_eq!(route.spec.to.name, "kourier");
        assert_eq!(route.spec.to.weight, Some(100));
        assert_eq!(
            tls_of(route),
            (
                TlsTermination::Edge,
                Some(InsecureEdgeTerminationPolicy::Allow),
                IntOrString::String("http2".to_string())
            )
        );
        let annotations = route.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations["foo"], "bar");
        assert_eq!(annotations[ROUTE_TIMEOUT_ANNOTATION], "600s");
        let labels = route.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[OPENSHIFT_INGRESS_LABEL], "ingress");
        assert_eq!(labels[OPENSHIFT_INGRESS_NAMESPACE_LABEL], "default");
        assert_eq!(labels[INGRESS_LABEL], "ingress");
        assert_eq!(labels["serving.knative.dev/route"], "hello");
    }

    #[test]
    fn test_cluster_local_and_internal_hosts_are_skipped() {
        let ing = ingress(
            json!({"rules": [
                rule(&["public.default.domainName"], "ClusterLocal", 80),
                rule(&["hello.default.svc", "hello.default.svc.cluster.local"], "ExternalIP", 80),
            ]}),
            json!({}),
        );
        assert!(make_routes(&ing).unwrap().is_empty());
    }

    #[test]
    fn test_redirected_http_option() {
        let ing = ingress(
            json!({"httpOption": "Redirected", "rules": [rule(&["a.b.c"], "ExternalIP", 80)]}),
            json!({}),
        );
        let routes = make_routes(&ing).unwrap();
        assert_eq!(
            tls_of(&routes[0]).1,
            Some(InsecureEdgeTerminationPolicy::Redirect)
        );
    }

    #[test]
    fn test_passthrough_triggers() {
        let passthrough = (
            TlsTermination::Passthrough,
            Some(InsecureEdgeTerminationPolicy::Redirect),
            IntOrString::String("https".to_string()),
        );

        let https_backend = ingress(json!({"rules": [rule(&["a.b.c"], "ExternalIP", 443)]}), json!({}));
        assert_eq!(tls_of(&make_routes(&https_backend).unwrap()[0]), passthrough);

        let annotated = ingress(
            json!({"rules": [rule(&["a.b.c"], "ExternalIP", 80)]}),
            json!({(ENABLE_PASSTHROUGH_ANNOTATION): ""}),
        );
        assert_eq!(tls_of(&make_routes(&annotated).unwrap()[0]), passthrough);

        let tls_hosts = ingress(
            json!({
                "tls": [{"hosts": ["a.b.c"], "secretName": "cert"}],
                "rules": [rule(&["a.b.c", "x.y.z"], "ExternalIP", 80)]
            }),
            json!({}),
        );
        let routes = make_routes(&tls_hosts).unwrap();
        assert_eq!(tls_of(&routes[0]), passthrough);
        assert_eq!(tls_of(&routes[1]).0, TlsTermination::Edge);
    }

    #[test]
    fn test_disable_annotation_suppresses_routes() {
        let ing = ingress(
            json!({"rules": [rule(&["a.b.c"], "ExternalIP", 80)]}),
            json!({(DISABLE_ROUTE_ANNOTATION): ""}),
        );
        assert!(make_routes(&ing).unwrap().is_empty());
    }

    #[test]
    fn test_missing_load_balancer_is_an_error() {
        let mut ing = ingress(json!({"rules": [rule(&["a.b.c"], "ExternalIP", 80)]}), json!({}));
        ing.status = None;
        assert!(matches!(
            make_routes(&ing),
            Err(RouteError::NoValidLoadBalancerDomain)
        ));

        ing.status = serde_json::from_value(json!({"publicLoadBalancer": {"ingress": [
            {"domainInternal": "kourier.knative-serving-ingress.svc.cluster.local"},
            {"domainInternal": "not-a-service"},
            {"domainInternal": "gateway.other-ns.svc.cluster.local"}
        ]}}))
        .unwrap();
        let routes = make_routes(&ing).unwrap();
        assert_eq!(routes[0].spec.to.name, "gateway");
        assert_eq!(routes[0].metadata.namespace.as_deref(), Some("other-ns"));
    }
}
