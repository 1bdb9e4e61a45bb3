//! # Observability
//!
//! - `metrics`: Prometheus metrics, owned by an explicitly constructed [`Metrics`]
//! - `logging`: tracing subscriber setup

pub mod logging;
pub mod metrics;

pub use metrics::Metrics;
