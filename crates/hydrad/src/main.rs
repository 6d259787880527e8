//! hydrad — the Hydra cluster controller daemon.
//!
//! Runs inside the cluster's controller container and assembles:
//! - Container runtime client (Docker Engine API)
//! - Service registry (Redis, or an embedded redb file)
//! - Load balancer control client (HAProxy admin socket)
//! - Orchestration controller + failure monitors
//! - HTTP control API
//!
//! # Usage
//!
//! ```text
//! hydrad serve --config /etc/hydra/hydra.toml
//! hydrad default-config > hydra.toml
//! ```

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hydra_core::HydraConfig;

#[derive(Parser)]
#[command(name = "hydrad", about = "Hydra cluster controller")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and serve the control API.
    Serve {
        /// Path to hydra.toml. Built-in defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// API port (overrides `[api] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Cluster name (overrides `[cluster] name` and discovery).
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Serve {
            config,
            port,
            cluster,
        } => {
            let mut config = match &config {
                Some(path) => HydraConfig::from_file(path)?,
                None => HydraConfig::default(),
            };
            if let Some(port) = port {
                config.api.port = port;
            }
            if cluster.is_some() {
                config.cluster.name = cluster;
            }
            serve::run(config).await
        }
        Command::DefaultConfig => {
            print!("{}", HydraConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hydrad=debug,hydra_cluster=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
