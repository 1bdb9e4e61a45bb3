//! # Initialization
//!
//! Operator startup: rustls setup, tracing, metrics, server startup and
//! Kubernetes client setup.

use crate::cluster::client::KubeCluster;
use crate::cluster::{ClusterClient, ClusterError};
use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::context::Context;
use crate::observability::logging::{self, LogFormat};
use crate::observability::Metrics;
use crate::server::{start_server, ServerState};
use anyhow::{Context as _, Result};
use kube::core::GroupVersionKind;
use kube::Client;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loops need
pub struct InitializationResult {
    pub client: Client,
    /// The API server cluster, also used for discovery
    pub cluster: Arc<KubeCluster>,
    /// Reconcile context shared by every controller
    pub ctx: Context,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registry creation
/// - HTTP server startup
/// - Kubernetes client creation
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    logging::init(&config.log_level, LogFormat::parse(&config.log_format))
        .context("Failed to initialize tracing")?;

    info!("Starting Serverless Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let server_state = Arc::new(ServerState::new(Arc::clone(&metrics)));

    let server_port = config.metrics_port;
    let server_handle = {
        let state = Arc::clone(&server_state);
        tokio::spawn(async move {
            if let Err(e) = start_server(server_port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(
        &server_state,
        &server_handle,
        Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS),
        Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let ctx = Context::new(
        Arc::clone(&cluster) as Arc<dyn ClusterClient>,
        Arc::new(config),
        metrics,
    );

    info!("Operator initialized, starting watch loops...");

    Ok(InitializationResult {
        client,
        cluster,
        ctx,
        server_state,
    })
}

/// Wait for the HTTP server to bind its listener
pub async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.listening() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log the instances of a parent kind that exist at startup, by namespace
///
/// A kind whose CRD is not installed is reported and skipped.
pub async fn log_existing(cluster: &dyn ClusterClient, gvk: &GroupVersionKind) {
    let items = match cluster.list(gvk, None, &BTreeMap::new()).await {
        Ok(items) => items,
        Err(ClusterError::NoMatch(_)) => {
            warn!("{} is not installed; its controller will wait for the CRD", gvk.kind);
            return;
        }
        Err(e) => {
            warn!(error = %e, "Failed to list existing {} resources", gvk.kind);
            return;
        }
    };

    let mut by_namespace: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for item in &items {
        by_namespace
            .entry(item.metadata.namespace.clone().unwrap_or_default())
            .or_default()
            .insert(item.metadata.name.clone().unwrap_or_default());
    }

    info!(
        "Resource Kind: {} - {} existing in {} namespaces",
        gvk.kind,
        items.len(),
        by_namespace.len()
    );
    for (namespace, names) in &by_namespace {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        info!("  Namespace {}: {}", namespace, summarize(&names));
    }
}

/// Comma-separated names, abbreviated past three
fn summarize(names: &[&str]) -> String {
    match names {
        [first, second, third, _, ..] => {
            format!("{first}, {second}, {third}, ... ({} total)", names.len())
        }
        _ => names.join(", "),
    }
}
