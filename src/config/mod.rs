//! # Configuration
//!
//! Environment-driven operator configuration.

mod controller;

pub use controller::{ConfigError, ControllerConfig, ManifestPaths};
