//! # Serverless Operator
//!
//! Installs the OpenShift extensions of Knative Serving and Eventing, the
//! Knative Kafka components, and translates Knative Ingresses into OpenShift
//! Routes.
//!
//! ## Usage
//!
//! ```bash
//! # Parent controllers (KnativeKafka, KnativeServing, KnativeEventing)
//! serverless-operator operator
//!
//! # Ingress to Route translation
//! serverless-operator ingress
//!
//! # Everything in one process
//! serverless-operator all --metrics-port 9090
//! ```
//!
//! Every flag falls back to its environment variable, and from there to the
//! defaults in `constants.rs`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serverless_operator::config::ControllerConfig;
use serverless_operator::runtime::initialization::initialize;
use serverless_operator::runtime::watch_loop::run_controllers;
use serverless_operator::runtime::ControllerSet;
use tracing::info;

/// OpenShift Serverless operator
#[derive(Debug, Parser)]
#[command(name = "serverless-operator", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Port of the metrics and probe server
    #[arg(long, global = true, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json or text)
    #[arg(long, global = true, env = "LOG_FORMAT")]
    log_format: Option<String>,

    /// Upper bound of parallel reconciles per controller
    #[arg(long, global = true, env = "MAX_CONCURRENT_RECONCILIATIONS")]
    max_concurrent_reconciliations: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the KnativeKafka, KnativeServing and KnativeEventing controllers
    Operator,
    /// Run the Knative Ingress to OpenShift Route controller
    Ingress,
    /// Run every controller
    All,
}

impl Cli {
    fn controllers(&self) -> ControllerSet {
        match self.command {
            Command::Operator => ControllerSet::Operator,
            Command::Ingress => ControllerSet::Ingress,
            Command::All => ControllerSet::All,
        }
    }

    /// Environment configuration with the command line on top
    fn config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::from_env();
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.log_format.clone_from(format);
        }
        if let Some(limit) = self.max_concurrent_reconciliations {
            config.max_concurrent_reconciliations = limit;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let init = initialize(cli.config()).await?;

    run_controllers(cli.controllers(), &init).await?;

    info!("Operator stopped");
    Ok(())
}
