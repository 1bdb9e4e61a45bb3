//! # Controller
//!
//! Reconcilers for every watched kind.
//!
//! - `backoff`: Fibonacci backoff for failed reconciles
//! - `context`: shared reconcile dependencies and the reconcile error
//! - `parent`: finalizer-gated lifecycle shared by the parent kinds
//! - `kafka`: KnativeKafka
//! - `component`: KnativeServing and KnativeEventing extensions
//! - `ingress`: Knative Ingress to OpenShift Route translation
//! - `validation`: admission checks for the parent kinds

pub mod backoff;
pub mod component;
pub mod context;
pub mod ingress;
pub mod kafka;
pub mod parent;
pub mod validation;

use component::ComponentParent;
use context::{Context, ReconcilerError};
use kafka::KafkaParent;
use kube_runtime::controller::Action;
use parent::reconcile_parent;
use std::sync::Arc;

/// The reconcilers a watch loop can drive
#[derive(Clone)]
pub enum Reconciler {
    Kafka(Arc<KafkaParent>),
    Component(Arc<ComponentParent>),
    Ingress,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Reconciler").field(&self.name()).finish()
    }
}

impl Reconciler {
    /// Metric label and span name of the controller
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "kafka",
            Self::Component(parent) => parent.profile().name,
            Self::Ingress => "ingress",
        }
    }

    /// Run one pass for the object `namespace/name`
    pub async fn reconcile(
        &self,
        ctx: &Context,
        namespace: &str,
        name: &str,
    ) -> Result<Action, ReconcilerError> {
        match self {
            Self::Kafka(parent) => reconcile_parent(parent.as_ref(), ctx, namespace, name).await,
            Self::Component(parent) => {
                reconcile_parent(parent.as_ref(), ctx, namespace, name).await
            }
            Self::Ingress => ingress::reconcile_ingress(ctx, namespace, name).await,
        }
    }
}
