//! Test helpers shared across server modules.

use std::net::{Ipv4Addr, SocketAddr};

use rstest::fixture;

use super::ServerConfig;
use crate::dispatch::ForwardCallback;

/// Loopback address with an ephemeral port.
#[must_use]
pub fn loopback() -> SocketAddr { SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0) }

#[fixture]
/// Configuration bound to an ephemeral loopback port with small pools.
pub fn local_config() -> ServerConfig {
    ServerConfig {
        local_address: loopback(),
        workers: 2,
        queue_capacity: 16,
        ..ServerConfig::default()
    }
}

#[fixture]
/// Callback that accepts and acknowledges every batch.
pub fn accept_all() -> ForwardCallback { ForwardCallback::sync_consumer(|_| Ok(())) }
