//! ---
//! ring_section: "08-binaries"
//! ring_subsection: "binary"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Binary entrypoint for the netring daemon."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netring_common::logging::init_tracing;
use netring_common::{MemberConfig, RegistryConfig};
use netring_member::{MemberAgent, SystemTracer};
use netring_metrics::{new_registry, RegistryMetrics};
use netring_registry::{cleanup, spawn_server, LocationAnalyzer, RegistryService};
use netring_store::MemoryStore;
use netring_supervisor::{Supervisor, SupervisorOptions};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "netring daemon",
    long_about = "Distributed connectivity monitoring: run the coordination registry or a probing member."
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the coordination registry")]
    Registry,
    #[command(about = "Run a member agent")]
    Member,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Registry => run_registry(cli.config).await,
        Commands::Member => run_member(cli.config).await,
    }
}

fn config_candidates(explicit: Option<PathBuf>, role: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path);
    }
    candidates.push(PathBuf::from(format!("configs/{role}.toml")));
    candidates.push(PathBuf::from(format!("/etc/netring/{role}.toml")));
    candidates
}

async fn run_registry(config_path: Option<PathBuf>) -> Result<()> {
    let config = RegistryConfig::load(&config_candidates(config_path, "registry"))
        .context("failed to load registry configuration")?;
    init_tracing("netring-registry", &config.logging)?;

    let store = Arc::new(MemoryStore::new());
    let metrics = RegistryMetrics::new(new_registry())?;
    let analyzer = if config.expected_members.enable_missing_detection {
        let path = config
            .expected_members
            .config_file
            .as_ref()
            .context("expected_members.config_file missing")?;
        let analyzer = LocationAnalyzer::from_file(path, store.clone())?;
        info!(file = %path.display(), "expected-location analysis enabled");
        Some(analyzer)
    } else {
        None
    };

    let listen = config.server.socket_addr()?;
    let service = Arc::new(RegistryService::new(store, config, metrics, analyzer));
    let supervisor = Supervisor::new(SupervisorOptions::default());
    cleanup::spawn_tasks(service.clone(), &supervisor);

    let server = spawn_server(service, supervisor.clone(), listen).await?;
    info!(address = %server.local_addr(), "registry running; waiting for termination signal");

    shutdown_signal().await;
    info!("termination signal received; shutting down");
    supervisor.shutdown().await;
    server.shutdown().await?;
    Ok(())
}

async fn run_member(config_path: Option<PathBuf>) -> Result<()> {
    let config = MemberConfig::load(&config_candidates(config_path, "member"))
        .context("failed to load member configuration")?;
    init_tracing("netring-member", &config.logging)?;

    let agent = MemberAgent::start(config, Arc::new(SystemTracer::new())).await?;
    info!(
        instance_id = %agent.instance_id(),
        address = %agent.local_addr(),
        "member running; waiting for termination signal"
    );

    shutdown_signal().await;
    info!("termination signal received; deregistering and shutting down");
    agent.shutdown().await?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut term = match unix_signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler; ctrl-c only");
            let _ = signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
