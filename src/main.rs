//! Demo binary running a `forwardline` server.
//!
//! Parses CLI arguments, starts a server that logs every batch, and shuts it
//! down after the requested duration or on Ctrl-C.

mod cli;

use std::time::Duration;

use clap::Parser;
use forwardline::{
    ForwardCallback,
    ForwardServer,
    ServerConfig,
    TlsConfig,
    server::Protocol,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let protocol = match (cli.tls_cert, cli.tls_key) {
        (Some(cert), Some(key)) => Protocol::Tls(TlsConfig::from_pem_files(cert, key)),
        _ => Protocol::Plain,
    };
    let mut config = ServerConfig {
        local_address: cli.bind,
        protocol,
        heartbeat: !cli.no_heartbeat,
        ..ServerConfig::default()
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let callback = ForwardCallback::sync_consumer(|batch| {
        info!(
            tag = batch.tag(),
            events = batch.len(),
            chunk = ?batch.chunk_id().map(ToString::to_string),
            "batch received"
        );
        Ok(())
    });
    let server = ForwardServer::new(config, callback)?;
    server.start()?;
    info!(local_addr = %server.local_addr(), "forwardline running");

    match cli.duration {
        Some(seconds) => {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                res = tokio::signal::ctrl_c() => res?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    info!("shutting down");
    server.shutdown().await;
    Ok(())
}
