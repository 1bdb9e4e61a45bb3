//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use serverless_operator::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (KnativeKafka, Ingress, Route, status conditions)
//! - The cluster seam (ClusterClient, ObjectKey, InMemoryCluster)
//! - Reconciler types (Context, ReconcilerError, the parent reconcilers)
//! - Manifest and transform types
//! - Config types

pub use crate::crd::*;

pub use crate::cluster::memory::InMemoryCluster;
pub use crate::cluster::{ClusterClient, ClusterError, ObjectKey};

pub use crate::controller::component::{ComponentParent, EVENTING_PROFILE, SERVING_PROFILE};
pub use crate::controller::context::{Context, ReconcilerError};
pub use crate::controller::kafka::{KafkaManifests, KafkaParent};
pub use crate::controller::parent::{reconcile_parent, ParentReconciler};
pub use crate::controller::Reconciler;

pub use crate::manifest::{ManifestError, ResourceSet};
pub use crate::transform::{Pipeline, Transform, TransformError};

pub use crate::config::{ConfigError, ControllerConfig, ManifestPaths};
pub use crate::observability::Metrics;
