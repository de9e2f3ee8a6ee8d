//! Accepting connections and placing them on event loops.

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use futures::FutureExt;
use log::{debug, info, warn};
use socket2::SockRef;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use super::{Attachment, BackoffConfig, EventLoopHandle};
use crate::connection::{ConnectionId, ConnectionSession, SessionContext};

/// Consecutive accept failures tolerated before the acceptor backs off.
pub(crate) const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 8;

/// Accepts handled per readiness event before yielding.
const MAX_ACCEPTS_PER_WAKE: usize = 64;

/// Options applied to every accepted socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SocketOptions {
    pub(crate) nodelay: bool,
    pub(crate) keepalive: bool,
    pub(crate) send_buffer_size: Option<usize>,
    pub(crate) recv_buffer_size: Option<usize>,
}

impl SocketOptions {
    fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        let sock_ref = SockRef::from(stream);
        sock_ref.set_keepalive(self.keepalive)?;
        if let Some(size) = self.send_buffer_size {
            sock_ref.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.recv_buffer_size {
            sock_ref.set_recv_buffer_size(size)?;
        }
        Ok(())
    }
}

/// Assigns accepted connections to event loops in round-robin order.
pub(crate) struct Placement {
    loops: Vec<EventLoopHandle>,
    next_loop: usize,
    next_id: u64,
    context: Arc<SessionContext>,
    socket: SocketOptions,
}

impl Placement {
    pub(crate) fn new(
        loops: Vec<EventLoopHandle>,
        context: Arc<SessionContext>,
        socket: SocketOptions,
    ) -> Self {
        Self {
            loops,
            next_loop: 0,
            next_id: 1,
            context,
            socket,
        }
    }

    /// Configure `stream` and register a session for it on the next loop.
    ///
    /// A connection that cannot be placed is dropped, which closes it.
    fn place(&mut self, (stream, peer): (TcpStream, SocketAddr)) {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        if let Err(e) = self.socket.apply(&stream) {
            warn!("failed to apply socket options: id={id}, peer={peer}, error={e}");
        }
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("failed to detach accepted socket: id={id}, peer={peer}, error={e}");
                return;
            }
        };
        let Some(handle) = self.loops.get(self.next_loop) else {
            warn!("no event loop available: id={id}, peer={peer}");
            return;
        };
        self.next_loop = (self.next_loop + 1) % self.loops.len();
        let context = Arc::clone(&self.context);
        let registered = handle.register(move || {
            ConnectionSession::open(id, peer, stream, &context)
                .map(|session| Attachment::Session(Box::new(session)))
        });
        match registered {
            Ok(()) => debug!(
                "connection placed: id={id}, peer={peer}, event_loop={}",
                handle.id()
            ),
            Err(e) => warn!("failed to place connection: id={id}, peer={peer}, error={e}"),
        }
    }
}

/// Result of draining the pending-connection queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Drained {
    pub(crate) accepted: usize,
    pub(crate) back_off: bool,
}

/// Handle `first` and every further result `next` yields without waiting.
///
/// Errors are logged and skipped; once `consecutive_errors` reaches
/// [`MAX_CONSECUTIVE_ACCEPT_ERRORS`] draining stops and the caller should
/// back off. Any success resets the count.
pub(crate) fn drain_pending<C>(
    first: io::Result<C>,
    mut next: impl FnMut() -> Option<io::Result<C>>,
    mut place: impl FnMut(C),
    consecutive_errors: &mut u32,
) -> Drained {
    let mut drained = Drained {
        accepted: 0,
        back_off: false,
    };
    let mut pending = Some(first);
    let mut handled = 0;
    while let Some(result) = pending {
        match result {
            Ok(conn) => {
                *consecutive_errors = 0;
                place(conn);
                drained.accepted += 1;
            }
            Err(e) => {
                *consecutive_errors += 1;
                warn!("accept error: error={e}, consecutive={consecutive_errors}");
                if *consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                    drained.back_off = true;
                    return drained;
                }
            }
        }
        handled += 1;
        if handled >= MAX_ACCEPTS_PER_WAKE {
            break;
        }
        pending = next();
    }
    drained
}

/// The listening socket's attachment.
pub(crate) struct Acceptor {
    listener: TcpListener,
    placement: Placement,
    backoff: BackoffConfig,
}

impl Acceptor {
    /// Adopt `listener` on the current event loop.
    pub(crate) fn open(
        listener: StdTcpListener,
        placement: Placement,
        backoff: BackoffConfig,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener: TcpListener::from_std(listener)?,
            placement,
            backoff: backoff.normalized(),
        })
    }

    pub(crate) async fn serve(mut self, stop: CancellationToken) {
        let local_addr = self.listener.local_addr().ok();
        info!(
            "accepting connections: local_addr={local_addr:?}, event_loops={}",
            self.placement.loops.len()
        );
        let mut delay = self.backoff.initial_delay;
        let mut consecutive_errors = 0;
        loop {
            let first = select! {
                biased;

                () = stop.cancelled() => break,
                res = self.listener.accept() => res,
            };
            let listener = &self.listener;
            let placement = &mut self.placement;
            let drained = drain_pending(
                first,
                || listener.accept().now_or_never(),
                |conn| placement.place(conn),
                &mut consecutive_errors,
            );
            if drained.accepted > 0 {
                delay = self.backoff.initial_delay;
            }
            if drained.back_off {
                if !pause(&stop, delay).await {
                    break;
                }
                delay = self.backoff.next(delay);
                consecutive_errors = 0;
            }
        }
        info!("acceptor closed: local_addr={local_addr:?}");
    }
}

/// Sleep for `delay` unless `stop` fires first. Returns `false` on stop.
async fn pause(stop: &CancellationToken, delay: Duration) -> bool {
    warn!("accept backing off: delay_ms={}", delay.as_millis());
    select! {
        biased;

        () = stop.cancelled() => false,
        () = sleep(delay) => true,
    }
}
