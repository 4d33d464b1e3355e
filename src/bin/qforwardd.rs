//! Forwarder daemon
//!
//! Binds the broker's two ports, then serves until Ctrl-C.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use qforward::{Broker, ForwarderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qforward=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();

    tracing::info!("Starting query forwarder...");

    let config = ForwarderConfig::load();
    let broker = Broker::bind(config)
        .await
        .context("Failed to start the broker")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            signal_token.cancel();
        }
    });

    broker.run(shutdown).await?;
    tracing::info!("Query forwarder stopped");
    Ok(())
}
