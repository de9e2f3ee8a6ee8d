//! Forward server lifecycle.
//!
//! [`ForwardServer::new`] validates a [`ServerConfig`] and binds its sockets.
//! [`start`](ForwardServer::start) launches the worker pool and the event
//! loops and registers the acceptor, then returns without waiting for any
//! traffic. [`shutdown`](ForwardServer::shutdown) stops everything on a
//! background thread and hands back a [`ShutdownHandle`] that resolves once
//! every socket is closed and every worker has exited.

use std::{
    io,
    mem,
    net::{SocketAddr, TcpListener as StdTcpListener, UdpSocket as StdUdpSocket},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use log::{info, warn};
use socket2::{Domain, Protocol as IpProtocol, Socket, Type};

mod config;
pub mod error;
mod lifecycle;

pub use config::{DEFAULT_BACKLOG, DEFAULT_PORT, Protocol, ServerConfig, ValidatedConfig};
pub use error::{ConfigError, LifecycleError, ServerError};
use lifecycle::Phase;
pub use lifecycle::{ServerState, ShutdownHandle};

/// Back-off settings for the acceptor.
pub use crate::reactor::BackoffConfig;
use crate::{
    connection::SessionContext,
    dispatch::{Dispatcher, ForwardCallback},
    reactor::{Acceptor, Attachment, EventLoop, EventLoopHandle, Heartbeat, Placement},
};

/// Sockets bound at construction and handed to the event loops on start.
struct Sockets {
    listener: StdTcpListener,
    heartbeat: Option<StdUdpSocket>,
}

/// Threads owned by a started server.
struct Running {
    loops: Vec<EventLoopHandle>,
    threads: Vec<JoinHandle<()>>,
    dispatcher: Arc<Dispatcher>,
}

impl Running {
    /// Close every attachment, join the loop threads, then drain and join
    /// the workers.
    fn stop(self) {
        for handle in &self.loops {
            handle.stop();
        }
        for thread in self.threads {
            let name = thread.thread().name().unwrap_or("forward-event-loop").to_owned();
            if thread.join().is_err() {
                warn!("event loop exited abnormally: thread={name}");
            }
        }
        self.dispatcher.shutdown();
    }
}

enum Resources {
    Built(Sockets),
    Running(Running),
    Released,
}

struct Inner {
    config: ValidatedConfig,
    callback: ForwardCallback,
    local_addr: SocketAddr,
    resources: Mutex<Resources>,
    phase: Phase,
}

/// A Fluentd Forward protocol server.
///
/// ```no_run
/// use forwardline::{
///     dispatch::ForwardCallback,
///     server::{ForwardServer, ServerConfig},
/// };
///
/// # async fn run() -> Result<(), forwardline::server::ServerError> {
/// let callback = ForwardCallback::sync_consumer(|batch| {
///     println!("{} events for {}", batch.len(), batch.tag());
///     Ok(())
/// });
/// let server = ForwardServer::new(ServerConfig::default(), callback)?;
/// server.start()?;
/// // ...
/// server.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ForwardServer {
    inner: Arc<Inner>,
}

impl ForwardServer {
    /// Validate `config` and bind the listening sockets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid or an
    /// address cannot be bound. Nothing is bound when validation fails.
    pub fn new(config: ServerConfig, callback: ForwardCallback) -> Result<Self, ServerError> {
        let config = config.validate()?;
        let (sockets, local_addr) = bind(config.config())?;
        info!(
            "server bound: local_addr={local_addr}, tls={}, heartbeat={}",
            config.is_tls(),
            sockets.heartbeat.is_some()
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                callback,
                local_addr,
                resources: Mutex::new(Resources::Built(sockets)),
                phase: Phase::new(),
            }),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.inner.local_addr }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState { self.inner.phase.get() }

    /// Launch the worker pool and event loops and begin accepting.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] unless the server is in the
    /// built state, [`LifecycleError::ShutDown`] after shutdown, and
    /// [`LifecycleError::Spawn`] when threads cannot be launched; a server
    /// that failed to launch is stopped.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut resources = lock(&self.inner.resources);
        match self.inner.phase.get() {
            ServerState::Built => {}
            ServerState::Starting | ServerState::Running => {
                return Err(LifecycleError::AlreadyStarted);
            }
            ServerState::Stopping | ServerState::Stopped => return Err(LifecycleError::ShutDown),
        }
        let Resources::Built(sockets) = mem::replace(&mut *resources, Resources::Released) else {
            return Err(LifecycleError::ShutDown);
        };
        self.inner.phase.set(ServerState::Starting);
        match launch(&self.inner, sockets) {
            Ok(running) => {
                info!(
                    "server started: local_addr={}, event_loops={}, workers={}",
                    self.inner.local_addr,
                    running.loops.len(),
                    self.inner.config.config().workers
                );
                *resources = Resources::Running(running);
                self.inner.phase.set(ServerState::Running);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "server failed to start: local_addr={}, error={e}",
                    self.inner.local_addr
                );
                self.inner.phase.set(ServerState::Stopped);
                Err(LifecycleError::Spawn(e))
            }
        }
    }

    /// Stop accepting, close every connection and stop the workers.
    ///
    /// Returns immediately. Every call returns a handle to the same
    /// completion; the handle resolves once the server is stopped, after
    /// which no callback runs.
    pub fn shutdown(&self) -> ShutdownHandle {
        let handle = self.inner.phase.handle();
        let mut resources = lock(&self.inner.resources);
        match mem::replace(&mut *resources, Resources::Released) {
            Resources::Built(sockets) => {
                drop(sockets);
                self.inner.phase.set(ServerState::Stopped);
                info!(
                    "server stopped before start: local_addr={}",
                    self.inner.local_addr
                );
            }
            Resources::Running(running) => {
                self.inner.phase.set(ServerState::Stopping);
                drop(resources);
                stop_in_background(Arc::clone(&self.inner), running);
            }
            Resources::Released => {}
        }
        handle
    }
}

impl Drop for ForwardServer {
    fn drop(&mut self) { let _ = self.shutdown(); }
}

impl std::fmt::Debug for ForwardServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardServer")
            .field("local_addr", &self.inner.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bind the TCP listener and, when enabled, the UDP heartbeat socket on the
/// same port.
fn bind(config: &ServerConfig) -> Result<(Sockets, SocketAddr), ConfigError> {
    let addr = config.local_address;
    let listener = listen(addr, config.backlog).map_err(|source| ConfigError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ConfigError::Bind { addr, source })?;
    let heartbeat = if config.heartbeat {
        let socket = StdUdpSocket::bind(local_addr).map_err(|source| ConfigError::Bind {
            addr: local_addr,
            source,
        })?;
        Some(socket)
    } else {
        None
    };
    Ok((
        Sockets {
            listener,
            heartbeat,
        },
        local_addr,
    ))
}

fn listen(addr: SocketAddr, backlog: i32) -> io::Result<StdTcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(IpProtocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Start the workers and loops, then register the acceptor and heartbeat on
/// the first loop. Everything started so far is stopped again on failure.
fn launch(inner: &Inner, sockets: Sockets) -> io::Result<Running> {
    let settings = inner.config.config();
    let dispatcher = Arc::new(Dispatcher::start(
        settings.workers,
        settings.queue_capacity,
        &inner.callback,
    )?);
    let mut running = Running {
        loops: Vec::with_capacity(settings.event_loops),
        threads: Vec::with_capacity(settings.event_loops),
        dispatcher: Arc::clone(&dispatcher),
    };
    let context = Arc::new(SessionContext {
        chunk_size_limit: settings.chunk_size_limit,
        read_buffer_capacity: settings.read_buffer_capacity,
        tls: inner.config.tls(),
        ack_token: Arc::clone(&settings.ack_token),
        dispatcher,
    });
    if let Err(e) = attach(inner, &mut running, context, sockets) {
        running.stop();
        return Err(e);
    }
    Ok(running)
}

fn attach(
    inner: &Inner,
    running: &mut Running,
    context: Arc<SessionContext>,
    sockets: Sockets,
) -> io::Result<()> {
    let settings = inner.config.config();
    for id in 0..settings.event_loops {
        let (event_loop, handle) = EventLoop::new(id)?;
        running.threads.push(event_loop.spawn()?);
        running.loops.push(handle);
    }
    let first = running
        .loops
        .first()
        .ok_or_else(|| io::Error::other("no event loop configured"))?;
    let placement = Placement::new(running.loops.clone(), context, inner.config.socket_options());
    let backoff = settings.accept_backoff;
    let Sockets {
        listener,
        heartbeat,
    } = sockets;
    first.register(move || Acceptor::open(listener, placement, backoff).map(Attachment::Acceptor))?;
    if let Some(socket) = heartbeat {
        first.register(move || Heartbeat::open(socket).map(Attachment::Heartbeat))?;
    }
    Ok(())
}

/// Stop `running` on a dedicated thread and publish completion. Falls back
/// to the calling thread when no thread can be spawned.
fn stop_in_background(inner: Arc<Inner>, running: Running) {
    let slot = Arc::new(Mutex::new(Some(running)));
    let task = {
        let inner = Arc::clone(&inner);
        let slot = Arc::clone(&slot);
        move || finish_stop(&inner, &slot)
    };
    if let Err(e) = thread::Builder::new()
        .name("forward-shutdown".to_owned())
        .spawn(task)
    {
        warn!("shutdown thread unavailable, stopping inline: error={e}");
        finish_stop(&inner, &slot);
    }
}

fn finish_stop(inner: &Inner, slot: &Mutex<Option<Running>>) {
    let Some(running) = lock(slot).take() else {
        return;
    };
    running.stop();
    inner.phase.set(ServerState::Stopped);
    info!("server stopped: local_addr={}", inner.local_addr);
}

#[cfg(test)]
pub(crate) mod test_util;
