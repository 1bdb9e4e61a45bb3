//! # Applier
//!
//! Converges the cluster towards a [`ResourceSet`].
//!
//! ## Apply
//!
//! Every resource is created when absent. When it exists, the desired
//! document is merged into the live object: maps merge key by key, lists and
//! scalars are replaced. Fields only the server knows about (status, uid,
//! defaults) survive, and the object is only written when the merge changed
//! something. Applying the same set twice therefore writes nothing the second
//! time.
//!
//! Each applied document is recorded in the
//! [`LAST_APPLIED_ANNOTATION`] of the child. Keys present in that record but
//! missing from the new document are removed before merging, so a key dropped
//! from a template disappears from the cluster too. Keys someone else added
//! are never in the record and are left alone. CRDs are too large for the
//! annotation and are merged without a record.
//!
//! The first failure aborts the pass. Whatever was applied stays; the next
//! reconcile picks up from there.
//!
//! ## Delete
//!
//! A resource that is already gone, or whose kind is not registered, counts
//! as deleted. CustomResourceDefinitions are never deleted.

use crate::cluster::{from_dynamic, ClusterClient, ClusterError, ObjectKey};
use crate::constants::LAST_APPLIED_ANNOTATION;
use crate::manifest::{predicate, ResourceSet};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

/// What an apply or delete pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ApplyReport {
    /// Number of objects written
    pub fn changed(&self) -> usize {
        self.created + self.updated
    }

    fn absorb(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
    }
}

/// Create or update every resource, in set order
pub async fn apply(
    cluster: &dyn ClusterClient,
    set: &ResourceSet,
) -> Result<ApplyReport, ClusterError> {
    let mut report = ApplyReport::default();
    for desired in set.resources() {
        let key = ObjectKey::from_object(desired)?;
        match cluster.get(&key).await? {
            None => {
                cluster.create(&with_last_applied(desired)?).await?;
                info!(resource = %key, "✨ Created resource");
                report.created += 1;
            }
            Some(live) => {
                let merged = merge_into_live(&live, desired)?;
                if merged == serde_json::to_value(&live)? {
                    debug!(resource = %key, "Resource up to date");
                    report.unchanged += 1;
                    continue;
                }
                let merged: DynamicObject = serde_json::from_value(merged)?;
                cluster.update(&merged).await?;
                info!(resource = %key, "🔄 Updated resource");
                report.updated += 1;
            }
        }
    }
    Ok(report)
}

/// Apply roles first, then role bindings, then everything else
///
/// Bindings can only be created once the roles they grant exist, and the
/// workloads need both.
pub async fn apply_rbac_ordered(
    cluster: &dyn ClusterClient,
    set: &ResourceSet,
) -> Result<ApplyReport, ClusterError> {
    let mut report = apply(cluster, &set.filter(predicate::is_role)).await?;
    report.absorb(apply(cluster, &set.filter(predicate::is_role_binding)).await?);
    report.absorb(apply(cluster, &set.filter(|r| !predicate::is_rbac(r))).await?);
    Ok(report)
}

/// Delete everything but CRDs: plain resources first, RBAC last
///
/// Keeping RBAC until the end lets the workloads being removed finish with
/// their permissions intact.
pub async fn delete(
    cluster: &dyn ClusterClient,
    set: &ResourceSet,
) -> Result<ApplyReport, ClusterError> {
    let mut report = delete_all(
        cluster,
        &set.filter(|r| !predicate::is_crd(r) && !predicate::is_rbac(r)),
    )
    .await?;
    report.absorb(delete_all(cluster, &set.filter(predicate::is_rbac)).await?);
    Ok(report)
}

async fn delete_all(
    cluster: &dyn ClusterClient,
    set: &ResourceSet,
) -> Result<ApplyReport, ClusterError> {
    let mut report = ApplyReport::default();
    for key in set.keys()? {
        match cluster.delete(&key).await {
            Ok(()) => {
                info!(resource = %key, "🗑️  Deleted resource");
                report.deleted += 1;
            }
            Err(e) if e.is_not_found() || e.is_no_match() => {
                debug!(resource = %key, "Resource already absent");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

/// Live object with `desired` merged in, as JSON
///
/// Keys recorded as last applied to `live` but absent from `desired` are
/// dropped first.
pub fn merge_into_live(
    live: &DynamicObject,
    desired: &DynamicObject,
) -> Result<Value, ClusterError> {
    let desired = with_last_applied(desired)?;
    let mut merged = serde_json::to_value(live)?;
    if let Some(previous) = last_applied(live) {
        prune_value(&mut merged, &previous, &applied_document(&desired)?);
    }
    merge_value(&mut merged, serde_json::to_value(&desired)?);
    Ok(merged)
}

/// `desired` annotated with the document being applied
fn with_last_applied(desired: &DynamicObject) -> Result<DynamicObject, ClusterError> {
    let mut recorded = desired.clone();
    if predicate::is_crd(desired) {
        return Ok(recorded);
    }
    let document = serde_json::to_string(&applied_document(desired)?)?;
    recorded
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(LAST_APPLIED_ANNOTATION.to_string(), document);
    Ok(recorded)
}

/// The document as applied, without its own record
fn applied_document(obj: &DynamicObject) -> Result<Value, ClusterError> {
    let mut doc = obj.clone();
    if let Some(annotations) = doc.metadata.annotations.as_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
        if annotations.is_empty() {
            doc.metadata.annotations = None;
        }
    }
    Ok(serde_json::to_value(&doc)?)
}

/// Document last applied to `live`, if it carries a readable record
pub fn last_applied(live: &DynamicObject) -> Option<Value> {
    let raw = live.metadata.annotations.as_ref()?.get(LAST_APPLIED_ANNOTATION)?;
    match serde_json::from_str(raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            debug!(error = %e, "Ignoring unreadable last-applied record");
            None
        }
    }
}

/// Remove from `target` what `previous` set and `desired` no longer sets
fn prune_value(target: &mut Value, previous: &Value, desired: &Value) {
    let (Value::Object(target), Value::Object(previous)) = (target, previous) else {
        return;
    };
    for (key, was) in previous {
        match desired.get(key) {
            None if was.is_object() => {
                // only what we set goes, keys added by others stay
                let Some(existing) = target.get_mut(key) else {
                    continue;
                };
                if existing.is_object() {
                    prune_value(existing, was, &Value::Object(serde_json::Map::new()));
                }
                if existing.as_object().is_none_or(serde_json::Map::is_empty) {
                    target.remove(key);
                }
            }
            None => {
                target.remove(key);
            }
            Some(wanted) if was.is_object() && wanted.is_object() => {
                if let Some(existing) = target.get_mut(key) {
                    prune_value(existing, was, wanted);
                }
            }
            Some(_) => {}
        }
    }
}

fn merge_value(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if value.is_object() && existing.is_object() => {
                        merge_value(existing, value);
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Names of Deployments and StatefulSets in the set that are not ready yet
pub async fn unready_workloads(
    cluster: &dyn ClusterClient,
    set: &ResourceSet,
) -> Result<Vec<String>, ClusterError> {
    let mut unready = Vec::new();
    for key in set.keys()? {
        let ready = match key.gvk.kind.as_str() {
            "Deployment" => cluster
                .get(&key)
                .await?
                .map(|o| from_dynamic::<Deployment>(&o))
                .transpose()?
                .is_some_and(|d| is_deployment_available(&d)),
            "StatefulSet" => cluster
                .get(&key)
                .await?
                .map(|o| from_dynamic::<StatefulSet>(&o))
                .transpose()?
                .is_some_and(|s| is_stateful_set_available(&s)),
            _ => continue,
        };
        if !ready {
            unready.push(key.to_string());
        }
    }
    Ok(unready)
}

/// `Available=True`
pub fn is_deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

/// At least one ready replica, or exactly the desired count when scaled to zero
pub fn is_stateful_set_available(stateful_set: &StatefulSet) -> bool {
    let ready = stateful_set
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    match stateful_set.spec.as_ref().and_then(|s| s.replicas) {
        None => ready == 1,
        Some(0) => ready == 0,
        Some(_) => ready >= 1,
    }
}
