//! ---
//! ordset_section: "01-core-functionality"
//! ordset_subsection: "binary"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Binary entrypoint for the ordset daemon."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
mod sim;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ordset_api::InMemoryStore;
use ordset_common::{init_tracing, AppConfig};
use ordset_controller::{Controller, ControllerContext};
use ordset_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::sim::{seed_store, NodeAgent};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "ordset daemon",
    long_about = "Runs the ordinal workload controller against an in-memory cluster."
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the number of reconcile workers")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the controller")]
    Run,
    #[command(about = "Load and validate configuration, then print it")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/ordsetd.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(workers) = cli.workers {
        config.controller.workers = workers;
    }
    config.validate()?;
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("# source: {}", loaded.source.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run => {
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"));

            init_tracing("ordsetd", &config.logging)?;
            info!(source = %loaded.source.display(), "configuration loaded");
            run_daemon(config, registry).await?;
        }
    }
    Ok(())
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store = InMemoryStore::new();
    store.pods().set_graceful_deletion(true);
    let seeded = seed_store(
        &store,
        &config.simulation.manifests,
        &config.simulation.namespace,
    )
    .await?;
    if seeded == 0 {
        warn!("no workloads seeded; the controller will idle until workloads are created");
    }

    let (shutdown_tx, _) = broadcast::channel(4);
    let agent = NodeAgent::new(store.pods(), config.simulation.ready_after);
    let agent_task = agent.spawn(shutdown_tx.subscribe());

    let mut context = ControllerContext::in_memory(&store, config.controller.clone());
    if metrics_server.is_some() {
        context = context.with_registry(registry);
    }
    let handle = Controller::new(context)?.start().await?;

    info!(workloads = seeded, "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    handle.shutdown().await?;
    let _ = shutdown_tx.send(());
    if let Err(err) = agent_task.await {
        warn!(error = %err, "node agent task failed");
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!("daemon shutdown complete");
    Ok(())
}
