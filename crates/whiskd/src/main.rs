//! whiskd — the Whisk controller daemon.
//!
//! Single binary that assembles the activation dispatch core:
//! - Action metadata store (redb)
//! - In-process message bus
//! - Dispatch gateway (scheduler, capacity ledger, activation tracker)
//! - Health monitor sweep loop
//! - Completion and heartbeat consumers
//! - Operational REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! whiskd standalone --port 3233 --data-dir /var/lib/whisk --invokers 4
//! whiskd default-config > whisk.toml
//! ```

mod invoker_sim;
mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use whisk_core::ControllerConfig;

use crate::standalone::StandaloneOptions;

#[derive(Parser)]
#[command(name = "whiskd", about = "Whisk controller daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller with simulated invokers in one process.
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "3233")]
        port: u16,

        /// Data directory for the action store.
        #[arg(long, default_value = "/var/lib/whisk")]
        data_dir: PathBuf,

        /// Controller configuration file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of simulated invokers.
        #[arg(long, default_value = "2")]
        invokers: usize,

        /// Memory each simulated invoker advertises, in MB.
        #[arg(long, default_value = "2048")]
        invoker_memory_mb: u64,

        /// Container slots each simulated invoker advertises.
        #[arg(long, default_value = "16")]
        invoker_slots: u32,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            config,
            invokers,
            invoker_memory_mb,
            invoker_slots,
        } => {
            standalone::run_standalone(StandaloneOptions {
                port,
                data_dir,
                config,
                invokers,
                invoker_memory_mb,
                invoker_slots,
            })
            .await
        }
        Command::DefaultConfig => {
            print!("{}", ControllerConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,whiskd=debug,whisk=debug"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
