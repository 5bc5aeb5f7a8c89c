//! GCP Relay
//!
//! Receives Pub/Sub change events and forwards them to an AWS EventBridge
//! bus. Uses the instance identity for federation - no AWS keys in config.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gcp_relay::{router, Forwarder, RelayConfig};

const QUIET_CRATES: &str = "aws_smithy_runtime=error,aws_config=error,hyper=error,hyper_util=error,reqwest=error";

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::parse();

    init_logging(config.log_debug)?;

    info!("🚀 Starting GCP Relay");

    let forwarder = Forwarder::from_config(&config).context("Invalid relay configuration")?;
    info!(
        "📦 Forwarding to {} as {}",
        forwarder.target(),
        config.aws_role
    );

    let app = router(Arc::new(forwarder));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},{QUIET_CRATES}")));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .json()
        .try_init()
        .map_err(|e| anyhow!("Failed to initialise logging: {e}"))
}
