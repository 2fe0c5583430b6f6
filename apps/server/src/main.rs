use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbar_bridge::ConnectorRegistry;
use crossbar_config::{load as load_config, load_from, AppConfig};
use crossbar_gateway::Topology;
use crossbar_router::Router;
use crossbar_runtime::{prune_correlation, telemetry, RelayServices};
use tracing::info;

#[derive(Parser)]
#[command(name = "crossbar")]
#[command(about = "Relay messages between chat networks (runs the relay by default)")]
struct Cli {
    /// Configuration file; falls back to CROSSBAR_CONFIG or ./crossbar.toml
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every account and relay until interrupted (default)
    Run,
    /// Validate the configuration and print the routing table
    Check,
    /// Trim the durable correlation store to its configured cap
    Prune,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = match &cli.config {
        Some(path) => load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => load_config().context("failed to load configuration")?,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_relay(&config).await,
        Commands::Check => check(&config),
        Commands::Prune => prune(&config).await,
    }
}

async fn run_relay(config: &AppConfig) -> anyhow::Result<()> {
    info!("starting Crossbar relay");

    let topology = Topology::build(config).context("invalid gateway configuration")?;
    let services = RelayServices::initialise(config)
        .await
        .context("failed to initialise relay services")?;

    let registry = ConnectorRegistry::with_builtin();
    let router = Router::new(config, &topology, &registry, services.router.clone())
        .context("failed to build router")?;
    router.start().await.context("failed to start connectors")?;

    router
        .run(crossbar_runtime::shutdown_signal())
        .await
        .context("relay loop failed")?;

    info!("relay shut down");
    Ok(())
}

fn check(config: &AppConfig) -> anyhow::Result<()> {
    let topology = Topology::build(config).context("invalid gateway configuration")?;
    let registry = ConnectorRegistry::with_builtin();

    println!("=== ACCOUNTS ===");
    for account in topology.accounts_in_use() {
        let protocol = topology
            .accounts
            .get(account)
            .map(|rules| rules.config.protocol())
            .unwrap_or_default();
        let status = if registry.supports(protocol) {
            "ok"
        } else {
            "no connector"
        };
        println!("{:<30} {:<15} {}", account, protocol, status);
    }

    println!("\n=== GATEWAYS ===");
    for gateway in &topology.gateways {
        let kind = if gateway.same_channel {
            " (same channel)"
        } else {
            ""
        };
        println!("{}{}", gateway.name, kind);
        for channel in gateway.channels.values() {
            println!(
                "  {:<30} {:<25} {:?}",
                channel.name, channel.account, channel.direction
            );
        }
    }

    info!(
        gateways = topology.gateways.len(),
        accounts = topology.accounts_in_use().len(),
        "configuration is valid"
    );
    Ok(())
}

async fn prune(config: &AppConfig) -> anyhow::Result<()> {
    let removed = prune_correlation(config).await?;
    println!("Removed {removed} correlated messages");
    Ok(())
}
