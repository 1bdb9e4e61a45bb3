//! # Runtime
//!
//! Process wiring around the reconcilers: startup, one watch loop per
//! controller and the error policy they share.
//!
//! - `initialization`: rustls, tracing, metrics server and cluster client
//! - `watch_loop`: `kube_runtime::Controller` setup and restart loop
//! - `error_policy`: per-resource backoff and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

use crate::controller::context::{Context, ReconcilerError};
use crate::controller::component::Component;
use crate::controller::Reconciler;
use kube::Resource;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, Instrument, Span};

/// Which controllers a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerSet {
    /// KnativeKafka, KnativeServing and KnativeEventing
    Operator,
    /// Knative Ingress to Route translation
    Ingress,
    All,
}

impl ControllerSet {
    pub fn runs_operator(self) -> bool {
        matches!(self, Self::Operator | Self::All)
    }

    pub fn runs_ingress(self) -> bool {
        matches!(self, Self::Ingress | Self::All)
    }
}

/// What a watch loop hands to each reconcile: the reconciler and its context
#[derive(Debug, Clone)]
pub struct Worker {
    pub reconciler: Reconciler,
    pub ctx: Context,
}

impl Worker {
    pub fn new(reconciler: Reconciler, ctx: Context) -> Self {
        Self { reconciler, ctx }
    }
}

/// Reconcile entry point for every controller
///
/// The event payload only names the object; the reconciler re-reads it.
pub async fn reconcile<K>(obj: Arc<K>, worker: Arc<Worker>) -> Result<Action, ReconcilerError>
where
    K: Resource,
{
    let controller = worker.reconciler.name();
    let name = obj.meta().name.clone().unwrap_or_default();
    let namespace = obj.meta().namespace.clone().unwrap_or_default();
    let span = reconcile_span(&worker.reconciler, &name, &namespace);

    async move {
        let metrics = &worker.ctx.metrics;
        metrics.increment_reconciliations(controller);
        let started = Instant::now();

        let result = worker
            .reconciler
            .reconcile(&worker.ctx, &namespace, &name)
            .await;
        metrics.observe_reconciliation_duration(controller, started.elapsed());

        match &result {
            Ok(action) => {
                worker.ctx.reset_backoff(&error_policy::resource_key(
                    controller,
                    Some(&namespace),
                    &name,
                ));
                debug!(action = ?action, "watch.event.reconciled");
            }
            Err(e) => {
                error!(error = %e, "watch.event.reconciliation_failed");
            }
        }
        result
    }
    .instrument(span)
    .await
}

fn reconcile_span(reconciler: &Reconciler, name: &str, namespace: &str) -> Span {
    match reconciler {
        Reconciler::Kafka(_) => tracing::info_span!(
            "controller.kafka.reconcile",
            resource.name = name,
            resource.namespace = namespace
        ),
        Reconciler::Component(parent) if parent.profile().component == Component::Eventing => {
            tracing::info_span!(
                "controller.eventing.reconcile",
                resource.name = name,
                resource.namespace = namespace
            )
        }
        Reconciler::Component(_) => tracing::info_span!(
            "controller.serving.reconcile",
            resource.name = name,
            resource.namespace = namespace
        ),
        Reconciler::Ingress => tracing::info_span!(
            "controller.ingress.reconcile",
            resource.name = name,
            resource.namespace = namespace
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::cluster::ClusterClient;
    use crate::config::ControllerConfig;
    use crate::crd::Ingress;
    use crate::observability::Metrics;

    #[tokio::test]
    async fn test_reconcile_records_metrics_and_resets_backoff() {
        let ctx = Context::new(
            Arc::new(InMemoryCluster::new()) as Arc<dyn ClusterClient>,
            Arc::new(ControllerConfig::default()),
            Arc::new(Metrics::new().unwrap()),
        );
        let worker = Arc::new(Worker::new(Reconciler::Ingress, ctx));
        let mut ingress = Ingress::new("gone", Default::default());
        ingress.metadata.namespace = Some("default".to_string());
        let ingress = Arc::new(ingress);

        let error = ReconcilerError::Other(anyhow::anyhow!("boom"));
        error_policy::handle_reconciliation_error(Arc::clone(&ingress), &error, Arc::clone(&worker));

        let action = reconcile(ingress, Arc::clone(&worker)).await.unwrap();
        assert_eq!(action, Action::await_change());

        let key = error_policy::resource_key("ingress", Some("default"), "gone");
        let states = worker.ctx.backoff_states.lock().unwrap();
        assert_eq!(states[&key].error_count, 0);
        drop(states);
        let encoded = String::from_utf8(worker.ctx.metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("serverless_operator_reconciliations_total{controller=\"ingress\"} 1"));
    }
}
