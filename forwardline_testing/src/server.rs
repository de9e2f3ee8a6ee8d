//! Helpers that run a server on an ephemeral loopback port.

use std::{
    net::{Ipv4Addr, SocketAddr},
    thread,
    time::{Duration, Instant},
};

use forwardline::{ForwardCallback, ForwardServer, ServerConfig, ServerState};
use rstest::fixture;

/// Upper bound for waiting on server-side effects.
pub const WAIT: Duration = Duration::from_secs(10);

#[fixture]
/// Configuration on `127.0.0.1:0` with two workers and no heartbeat.
pub fn loopback_config() -> ServerConfig {
    ServerConfig {
        local_address: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0),
        workers: 2,
        heartbeat: false,
        ..ServerConfig::default()
    }
}

/// Build and start a server.
///
/// # Panics
///
/// Panics if the server cannot be built or started.
#[must_use]
pub fn start_server(config: ServerConfig, callback: ForwardCallback) -> ForwardServer {
    let server = ForwardServer::new(config, callback).expect("build server");
    server.start().expect("start server");
    server
}

/// Shut `server` down and block until it has stopped.
///
/// # Panics
///
/// Panics if shutdown does not complete within [`WAIT`].
pub fn stop_server(server: &ForwardServer) {
    let handle = server.shutdown();
    let deadline = Instant::now() + WAIT;
    while !handle.is_complete() {
        assert!(Instant::now() < deadline, "shutdown did not complete");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.state(), ServerState::Stopped);
}
