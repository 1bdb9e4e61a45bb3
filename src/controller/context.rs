//! # Reconcile Context
//!
//! Everything a reconcile needs, built once at startup and shared by every
//! controller: the cluster client, configuration, metrics and the per-resource
//! error backoff.

use crate::cluster::{ClusterClient, ClusterError};
use crate::config::{ConfigError, ControllerConfig};
use crate::controller::backoff::BackoffState;
use crate::manifest::ManifestError;
use crate::observability::Metrics;
use crate::transform::TransformError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workloads were applied but are not available yet
    #[error("waiting for workloads to become ready: {0}")]
    NotReady(String),

    #[error("Reconciliation failed: {0}")]
    Other(#[from] anyhow::Error),
}

impl ReconcilerError {
    /// Requeue reason recorded in metrics
    pub fn requeue_reason(&self) -> &'static str {
        match self {
            Self::NotReady(_) => "not-ready",
            Self::Cluster(e) if e.is_conflict() => "conflict",
            _ => "error-backoff",
        }
    }
}

/// Shared dependencies of every reconciler
#[derive(Clone)]
pub struct Context {
    pub cluster: Arc<dyn ClusterClient>,
    pub config: Arc<ControllerConfig>,
    pub metrics: Arc<Metrics>,
    /// Backoff state per resource (`kind/namespace/name`)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        config: Arc<ControllerConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            config,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error history of a resource after a successful reconcile
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
