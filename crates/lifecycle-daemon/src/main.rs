//! Service lifecycle daemon
//!
//! Loads a YAML service file, registers every declared service, starts the
//! auto-start ones in dependency order and keeps them health-checked until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use service_orchestration::{InitSummary, MetricsSnapshot, OrchestratorConfig, ServiceContext};
use service_registry::{PluginFactory, ReqwestConnector, SystemHealth};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};

#[derive(Parser, Debug)]
#[command(name = "lifecycle-daemon")]
#[command(about = "Start configured services in dependency order and keep them health-checked")]
#[command(version)]
struct Cli {
    /// Path to the YAML service file
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Initialize, probe every service once, print a report and exit
    #[arg(long)]
    once: bool,
}

/// Printed by `--once`
#[derive(Serialize)]
struct Report {
    init: InitSummary,
    health: SystemHealth,
    metrics: MetricsSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    info!("Loading service configuration from {}", cli.config.display());
    let config = OrchestratorConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let connector = ReqwestConnector::from_current()?;
    let factory = PluginFactory::with_http(Arc::new(connector));
    let context = ServiceContext::new(async_runtime_compat::default_spawner(), factory, config);

    let init = context.initialize().await;
    for (id, reason) in &init.failed {
        warn!("Service {} is not running: {}", id, reason);
    }

    if cli.once {
        context.manager.run_health_checks().await;
        let report = Report {
            init,
            health: context.manager.get_system_health(),
            metrics: context.manager.get_metrics_snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        context.shutdown().await;
        return Ok(());
    }

    info!(
        "Managing {} services, press Ctrl+C to stop",
        context.registry.len()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutting down");
    context.shutdown().await;
    Ok(())
}
