use anyhow::{Context, Result};
use clap::Parser;
use crank_connector::{Connector, ConnectorConfig, ConnectorManager, ReqwestOrigin};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crank-connector")]
#[command(author = "Crank Team")]
#[command(version = "0.1.0")]
#[command(about = "Relay requests from crank routers to a local origin", long_about = None)]
struct Cli {
    /// Config file (defaults to crank.yml in the working or home directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Origin base URL, overrides the config file
    #[arg(short, long)]
    target: Option<String>,

    /// Router socket URL, repeatable, overrides the config file
    #[arg(short, long = "router")]
    routers: Vec<String>,

    /// Idle sockets per router, overrides the config file
    #[arg(short, long)]
    sockets: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "crank_connector=debug"
    } else {
        "crank_connector=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = load_config(&cli)?;
    let target = config.target_url()?;
    let origin = ReqwestOrigin::new(&config.origin).context("Failed to build origin client")?;
    let connector = Connector::new(Arc::new(origin), target);

    let mut manager = ConnectorManager::new(config, connector);
    manager.start_all();
    info!(sockets = manager.active_slots(), "Connector running. Press Ctrl+C to stop");

    manager.wait_for_shutdown().await;
    info!("All sockets stopped");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ConnectorConfig> {
    let path = cli.config.clone().or_else(ConnectorConfig::find_config);

    let mut config = match path {
        Some(path) => {
            info!("Using config file {}", path.display());
            ConnectorConfig::load(&path)?
        }
        None => {
            let target = cli
                .target
                .clone()
                .context("No config file found; --target is required")?;
            ConnectorConfig::new(target, cli.routers.clone())
        }
    };

    if let Some(target) = &cli.target {
        config.target = target.clone();
    }
    if !cli.routers.is_empty() {
        config.routers = cli.routers.clone();
    }
    if let Some(sockets) = cli.sockets {
        config.sockets_per_router = sockets;
    }

    config.validate()?;
    Ok(config)
}
