//! # Ingress Controller
//!
//! Keeps the OpenShift Routes of every Kourier-class Knative Ingress in line
//! with what [`routes::make_routes`] derives from it.
//!
//! Routes usually live in the gateway namespace, not next to their Ingress, so
//! they carry the `ingressName`/`ingressNamespace` label pair instead of an
//! owner reference. The finalizer makes sure they are deleted with the
//! Ingress.

pub mod routes;

use super::context::{Context, ReconcilerError};
use crate::applier::ApplyReport;
use crate::cluster::{from_dynamic, get_typed, to_dynamic, ObjectKey};
use crate::constants::{
    INGRESS_CLASS_ANNOTATION, INGRESS_FINALIZER, KOURIER_INGRESS_CLASS, OPENSHIFT_INGRESS_LABEL,
    OPENSHIFT_INGRESS_NAMESPACE_LABEL,
};
use crate::crd::{Ingress, Route};
use kube::core::DynamicObject;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use routes::{make_routes, RouteError};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Whether the Ingress belongs to this controller
pub fn is_kourier_class(ingress: &Ingress) -> bool {
    ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
        .is_some_and(|class| class == KOURIER_INGRESS_CLASS)
}

/// Labels selecting the Routes generated for an Ingress
pub fn owner_labels(name: &str, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OPENSHIFT_INGRESS_LABEL.to_string(), name.to_string()),
        (OPENSHIFT_INGRESS_NAMESPACE_LABEL.to_string(), namespace.to_string()),
    ])
}

/// The Ingress a Route was generated for, from its owner labels
pub fn ingress_of(route_labels: &BTreeMap<String, String>) -> Option<(String, String)> {
    let name = route_labels.get(OPENSHIFT_INGRESS_LABEL)?;
    let namespace = route_labels.get(OPENSHIFT_INGRESS_NAMESPACE_LABEL)?;
    Some((name.clone(), namespace.clone()))
}

/// Run one reconcile pass for the Ingress `namespace/name`
pub async fn reconcile_ingress(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let Some(ingress) = get_typed::<Ingress>(ctx.cluster.as_ref(), Some(namespace), name).await?
    else {
        debug!(namespace, name, "Ingress no longer exists");
        return Ok(Action::await_change());
    };
    if !is_kourier_class(&ingress) {
        return Ok(Action::await_change());
    }

    let key = ObjectKey::of::<Ingress>(Some(namespace), name);
    let finalized = ingress
        .finalizers()
        .iter()
        .any(|f| f == INGRESS_FINALIZER);

    if ingress.metadata.deletion_timestamp.is_some() {
        if finalized {
            finalize(ctx, &key, namespace, name).await?;
        }
        return Ok(Action::await_change());
    }

    if !finalized {
        info!(resource = %key, finalizer = INGRESS_FINALIZER, "Adding finalizer");
        let mut updated = ingress;
        updated
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(INGRESS_FINALIZER.to_string());
        ctx.cluster.update(&to_dynamic(&updated)?).await?;
        return Ok(Action::await_change());
    }

    let existing = owned_routes(ctx, namespace, name).await?;
    let desired = match make_routes(&ingress) {
        Ok(desired) => desired,
        Err(RouteError::NoValidLoadBalancerDomain) => {
            // The load balancer status update triggers the next pass
            warn!(
                resource = %key,
                "Failed to generate routes: {}",
                RouteError::NoValidLoadBalancerDomain
            );
            return Ok(Action::await_change());
        }
    };

    let mut leftover: HashMap<ObjectKey, DynamicObject> = existing
        .into_iter()
        .filter_map(|route| ObjectKey::from_object(&route).ok().map(|k| (k, route)))
        .collect();
    let mut report = ApplyReport::default();
    for route in &desired {
        let route_key = ObjectKey::of::<Route>(
            route.metadata.namespace.as_deref(),
            route.metadata.name.as_deref().unwrap_or_default(),
        );
        let live = match leftover.remove(&route_key) {
            Some(live) => Some(live),
            None => ctx.cluster.get(&route_key).await?,
        };
        reconcile_route(ctx, route, live, &mut report).await?;
    }
    for (route_key, route) in leftover {
        let host = route.data["spec"]["host"].as_str().unwrap_or_default().to_string();
        info!(resource = %route_key, host, "Deleting route");
        delete_route(ctx, &route_key, &mut report).await?;
    }
    ctx.metrics.record_apply(&report);

    Ok(Action::requeue(ctx.config.resync_interval()))
}

async fn reconcile_route(
    ctx: &Context,
    desired: &Route,
    live: Option<DynamicObject>,
    report: &mut ApplyReport,
) -> Result<(), ReconcilerError> {
    let host = desired.spec.host.as_str();
    let Some(mut live) = live else {
        let key = ObjectKey::of::<Route>(
            desired.metadata.namespace.as_deref(),
            desired.metadata.name.as_deref().unwrap_or_default(),
        );
        info!(resource = %key, host, "Creating route");
        ctx.cluster.create(&to_dynamic(desired)?).await?;
        report.created += 1;
        return Ok(());
    };

    let current: Route = from_dynamic(&live)?;
    let labels = desired.metadata.labels.clone().unwrap_or_default();
    let annotations = desired.metadata.annotations.clone().unwrap_or_default();
    if current.spec == desired.spec
        && current.metadata.labels.clone().unwrap_or_default() == labels
        && current.metadata.annotations.clone().unwrap_or_default() == annotations
    {
        report.unchanged += 1;
        return Ok(());
    }

    debug!(host, "Updating route");
    live.metadata.labels = Some(labels);
    live.metadata.annotations = Some(annotations);
    live.data["spec"] = serde_json::to_value(&desired.spec)
        .map_err(crate::cluster::ClusterError::Serialization)?;
    ctx.cluster.update(&live).await?;
    report.updated += 1;
    Ok(())
}

async fn delete_route(
    ctx: &Context,
    key: &ObjectKey,
    report: &mut ApplyReport,
) -> Result<(), ReconcilerError> {
    match ctx.cluster.delete(key).await {
        Ok(()) => {
            report.deleted += 1;
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn owned_routes(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Vec<DynamicObject>, ReconcilerError> {
    let gvk = crate::cluster::gvk_of::<Route>();
    Ok(ctx
        .cluster
        .list(&gvk, None, &owner_labels(name, namespace))
        .await?)
}

async fn finalize(
    ctx: &Context,
    key: &ObjectKey,
    namespace: &str,
    name: &str,
) -> Result<(), ReconcilerError> {
    let mut report = ApplyReport::default();
    for route in owned_routes(ctx, namespace, name).await? {
        let route_key = ObjectKey::from_object(&route)?;
        info!(resource = %route_key, "Deleting route");
        delete_route(ctx, &route_key, &mut report).await?;
    }
    ctx.metrics.record_apply(&report);

    let Some(mut fresh) = ctx.cluster.get(key).await? else {
        return Ok(());
    };
    if let Some(finalizers) = fresh.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != INGRESS_FINALIZER);
    }
    ctx.cluster.update(&fresh).await?;
    info!(resource = %key, finalizer = INGRESS_FINALIZER, "Removed finalizer");
    Ok(())
}
