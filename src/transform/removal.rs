//! # Conditional Removal
//!
//! Some resource groups are only wanted while a feature is switched on in the
//! cluster: cert-manager resources with transport encryption, monitoring
//! resources with a metrics backend. When the feature is off, whatever was
//! applied earlier is deleted and the resources are dropped from the set, so
//! they are neither recreated nor left behind.
//!
//! The feature flags are read from live ConfigMaps on every reconcile.

use super::TransformError;
use crate::cluster::{get_typed, ClusterClient, ClusterError, ObjectKey};
use crate::constants::{
    FEATURES_CONFIGMAP, METRICS_BACKEND_KEY, OBSERVABILITY_CONFIGMAP, TRANSPORT_ENCRYPTION_KEY,
};
use crate::manifest::ResourceSet;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, info};

/// Drop resources matching `predicate` when `enabled` is false
///
/// Deletion treats a missing object, or a kind the API server does not know,
/// as already gone.
pub async fn remove_when_disabled<P>(
    cluster: &dyn ClusterClient,
    set: ResourceSet,
    predicate: P,
    enabled: bool,
) -> Result<ResourceSet, TransformError>
where
    P: Fn(&kube::core::DynamicObject) -> bool,
{
    if enabled {
        return Ok(set);
    }

    let doomed = set.filter(&predicate);
    for key in doomed.keys()? {
        match cluster.delete(&key).await {
            Ok(()) => info!(resource = %key, "🗑️  Removed resource of disabled feature"),
            Err(e) if e.is_not_found() || e.is_no_match() => {
                debug!(resource = %key, "Resource of disabled feature already absent");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(set.filter(|r| !predicate(r)))
}

/// Whether eventing transport encryption is `permissive` or `strict`
///
/// The features ConfigMap must exist; a missing key means disabled.
pub async fn transport_encryption_enabled(
    cluster: &dyn ClusterClient,
    namespace: &str,
) -> Result<bool, ClusterError> {
    let config = get_typed::<ConfigMap>(cluster, Some(namespace), FEATURES_CONFIGMAP)
        .await?
        .ok_or_else(|| {
            ClusterError::NotFound(
                ObjectKey::of::<ConfigMap>(Some(namespace), FEATURES_CONFIGMAP).to_string(),
            )
        })?;
    let value = config
        .data
        .as_ref()
        .and_then(|d| d.get(TRANSPORT_ENCRYPTION_KEY))
        .map(|v| v.trim().to_ascii_lowercase());
    Ok(matches!(value.as_deref(), Some("permissive" | "strict")))
}

/// Whether monitoring resources should be installed
///
/// `none` and `opencensus` backends switch monitoring off, any other backend
/// switches it on. Without a configured backend `default` decides.
pub fn monitoring_enabled_for(backend: Option<&str>, default: bool) -> bool {
    match backend.map(str::trim) {
        Some("none" | "opencensus") => false,
        Some(b) if !b.is_empty() => true,
        _ => default,
    }
}

/// [`monitoring_enabled_for`] with the backend read from the observability ConfigMap
pub async fn monitoring_enabled(
    cluster: &dyn ClusterClient,
    namespace: &str,
    default: bool,
) -> Result<bool, ClusterError> {
    let config = get_typed::<ConfigMap>(cluster, Some(namespace), OBSERVABILITY_CONFIGMAP).await?;
    let backend = config
        .as_ref()
        .and_then(|c| c.data.as_ref())
        .and_then(|d| d.get(METRICS_BACKEND_KEY))
        .map(String::as_str);
    Ok(monitoring_enabled_for(backend, default))
}
