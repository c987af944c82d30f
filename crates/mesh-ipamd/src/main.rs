//! mesh-ipamd - Mesh IPAM daemon
//!
//! Watches the local cluster network settings and keeps the subnet allocator
//! used for cross-cluster tunnels in step with them.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mesh_ipam::Ipam;
use mesh_netsync::{
    FileSettingsSource, JsonTunnelLister, NetworkSettings, NetworkSynchronizer, TunnelLister,
    recover_cluster_subnets,
};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "mesh-ipamd")]
#[command(about = "Mesh IPAM daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/mesh-ipamd/config.json")]
        config: PathBuf,
    },

    /// Validate the config, network settings and tunnel records without running
    Check {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/mesh-ipamd/config.json")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/mesh-ipamd/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("mesh_ipamd=info".parse()?)
                .add_directive("mesh_ipam=info".parse()?)
                .add_directive("mesh_netsync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_daemon(config).await?,
        Commands::Check { config } => check(&config)?,
        Commands::InitConfig { output } => init_config(&output)?,
    }

    Ok(())
}

async fn run_daemon(config_path: PathBuf) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting mesh-ipamd");

    let config = DaemonConfig::load(&config_path)?;
    let pools = config.parsed_pools()?;
    info!(
        settings = %config.settings_path.display(),
        tunnels = %config.tunnels_path.display(),
        pools = ?pools,
        "loaded config"
    );

    let ipam = Arc::new(Ipam::new());
    let lister = JsonTunnelLister::new(&config.tunnels_path);
    let sync = Arc::new(NetworkSynchronizer::new(Arc::clone(&ipam), lister, pools));

    let (tx, rx) = mpsc::channel::<NetworkSettings>(16);
    let source = FileSettingsSource::new(
        &config.settings_path,
        Duration::from_secs(config.poll_interval_secs),
    )
    .spawn(tx);

    let runner = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.run(rx).await })
    };

    tokio::select! {
        () = sync.wait_configured() => {
            let stats = ipam.stats();
            info!(
                pools = stats.pools.len(),
                registered = stats.registered.len(),
                clusters = stats.cluster_count(),
                "IPAM ready"
            );
        }
        result = tokio::signal::ctrl_c() => {
            result.context("cannot listen for shutdown signal")?;
            info!("shutdown requested before configuration arrived");
            source.abort();
            runner.abort();
            return Ok(());
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("shutting down");

    source.abort();
    if let Err(e) = runner.await {
        error!(error = %e, "synchronizer task failed");
    }
    Ok(())
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::load(config_path)?;
    println!("Config:   {} (ok)", config_path.display());

    let settings = NetworkSettings::from_file(&config.settings_path)?;
    let reserved = settings.reserved_networks()?;
    println!("Settings: {}", config.settings_path.display());
    for network in &reserved {
        println!("  reserved {network}");
    }

    let endpoints = JsonTunnelLister::new(&config.tunnels_path).list_tunnel_endpoints()?;
    let recovered = recover_cluster_subnets(&endpoints);
    println!(
        "Tunnels:  {} ({} records, {} with a subnet)",
        config.tunnels_path.display(),
        endpoints.len(),
        recovered.len()
    );
    for (cluster, network) in &recovered {
        println!("  {cluster} -> {network}");
    }

    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let json = DaemonConfig::default().to_json_pretty()?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(output, json).with_context(|| format!("cannot write {}", output.display()))?;

    println!("Config written to: {}", output.display());
    Ok(())
}
