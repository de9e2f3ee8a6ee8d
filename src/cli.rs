//! Command line interface for the `forwardline` demo binary.
//!
//! Runs a Forward server for a fixed duration, logging every batch it
//! receives.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `forwardline` binary.
#[derive(Debug, Parser)]
#[command(
    name = "forwardline",
    version,
    about = "Receive Fluentd Forward protocol traffic and log each batch"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "0.0.0.0:24224")]
    pub bind: SocketAddr,

    /// Seconds to run before shutting down; runs until Ctrl-C when omitted.
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// PEM certificate chain; enables TLS together with `--tls-key`.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `--tls-cert`.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Callback worker threads; one per CPU when omitted.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Do not answer UDP heartbeats.
    #[arg(long)]
    pub no_heartbeat: bool,
}
