use clap::Parser;
use tracing::info;

use hednet_node::agent::NodeAgent;
use hednet_node::config::{NodeConfig, DEFAULT_API_URL, DEFAULT_CHANNEL_URL};
use hednet_node::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "hednet-node",
    about = "Background agent impersonating a HedNet browser-extension node",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "HEDNET_TOKEN",
        hide_env_values = true,
        help = "Bearer token issued to the browser extension"
    )]
    token: String,

    #[arg(
        long,
        env = "HEDNET_API_URL",
        default_value = DEFAULT_API_URL,
        help = "Base URL of the HedNet API"
    )]
    api_url: String,

    #[arg(
        long,
        env = "HEDNET_CHANNEL_URL",
        default_value = DEFAULT_CHANNEL_URL,
        help = "WebSocket URL for the realtime channel"
    )]
    channel_url: String,

    #[arg(
        long = "log-filter",
        env = "HEDNET_LOG",
        default_value = "info,hednet_node=debug",
        help = "tracing filter directives"
    )]
    log_filter: String,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_filter);

    let config = NodeConfig::build(&cli.api_url, &cli.channel_url, &cli.token)?;
    info!(
        api = %config.base_url,
        channel = %config.channel_url,
        resources = config.resources.len(),
        "starting hednet node"
    );

    let mut agent = NodeAgent::new(config)?;
    if !agent.start().await {
        anyhow::bail!("failed to start node");
    }

    tokio::signal::ctrl_c().await?;
    info!("received interrupt signal");
    agent.stop().await;
    Ok(())
}
