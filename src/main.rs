//! kapiproxy - Main entry point
//!
//! Everything is compiled in: there are no flags and no environment settings.

use anyhow::{Context, Result};
use kapiproxy::{ProxyConfig, ProxyServer, TlsIdentity};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    // No listener without a valid identity
    let identity = TlsIdentity::generate().context("Failed to self-sign TLS certificate")?;

    info!(
        "Starting server...\nCA certificate (PEM in base64 format):\n{}",
        identity.certificate_pem_base64()
    );

    let server = ProxyServer::new(ProxyConfig::default(), &identity)?;
    server.run().await
}
