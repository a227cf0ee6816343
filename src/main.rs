use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use paircall::call::{CallController, Identity, RtcEngine};
use paircall::config::{self, Config};
use paircall::relay::WsRelay;
use tracing::info;

#[derive(Parser)]
#[command(name = "paircall")]
#[command(about = "Two-party calls with an application data channel, signaled over a relay", long_about = None)]
struct Cli {
    /// Identity announced to the relay (defaults to the configured one)
    #[arg(long, global = true)]
    identity: Option<String>,

    /// Relay WebSocket URL
    #[arg(long, global = true)]
    relay: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a remote identity
    Call {
        /// Identity to call
        peer: String,
    },
    /// Wait for an inbound call
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let identity = cli
        .identity
        .or_else(|| config.identity.clone())
        .unwrap_or_else(config::generate_identity);
    let relay_url = cli.relay.unwrap_or_else(|| config.relay.url.clone());

    let (mut controller, mut points) = CallController::new(
        Identity::new(identity.as_str()),
        Arc::new(RtcEngine),
        config.call.clone(),
    );

    let relay = WsRelay::connect(&relay_url).await?;
    info!(identity = %identity, relay = %relay_url, "ready");

    tokio::spawn(async move {
        while let Some(point) = points.recv().await {
            println!("point x={} y={} state={}", point.x, point.y, point.state);
        }
    });

    if let Commands::Call { peer } = &cli.command {
        controller.call(Identity::new(peer.as_str())).await?;
    }

    controller.run(relay).await
}
