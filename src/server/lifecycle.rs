//! Lifecycle states and the shutdown completion handle.

use std::{fmt, future::IntoFuture};

use futures::future::BoxFuture;
use log::debug;
use tokio::sync::watch;

/// Position of a server in its lifecycle.
///
/// `Built -> Starting -> Running -> Stopping -> Stopped`; a built server that
/// is shut down goes straight to `Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Sockets bound; no threads running.
    Built,
    /// Threads are being launched.
    Starting,
    /// Accepting and serving connections.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Every socket closed and every thread joined.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Built => "built",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Published lifecycle state. Reaching [`ServerState::Stopped`] is the
/// shutdown completion signal and happens exactly once.
pub(crate) struct Phase {
    tx: watch::Sender<ServerState>,
}

impl Phase {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Built);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ServerState { *self.tx.borrow() }

    pub(crate) fn set(&self, state: ServerState) {
        let previous = self.tx.send_replace(state);
        debug!("server state changed: from={previous}, to={state}");
    }

    pub(crate) fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Resolves once a server has fully stopped.
///
/// Every call to [`ForwardServer::shutdown`](super::ForwardServer::shutdown)
/// returns a handle to the same completion. Await it from async code or poll
/// [`is_complete`](Self::is_complete).
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    rx: watch::Receiver<ServerState>,
}

impl ShutdownHandle {
    /// Whether shutdown has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool { *self.rx.borrow() == ServerState::Stopped }
}

impl IntoFuture for ShutdownHandle {
    type Output = ();
    type IntoFuture = BoxFuture<'static, ()>;

    fn into_future(self) -> Self::IntoFuture {
        let mut rx = self.rx;
        Box::pin(async move {
            // The sender lives as long as the server; a dropped sender means
            // the server is gone and nothing is left to wait for.
            let _ = rx.wait_for(|state| *state == ServerState::Stopped).await;
        })
    }
}
