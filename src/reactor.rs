//! Single-threaded event loops driving all socket I/O.
//!
//! Each [`EventLoop`] owns one OS thread running a current-thread tokio
//! runtime inside a `LocalSet`. Sockets are registered as [`Attachment`]s:
//! the registration closure runs on the loop thread, so everything an
//! attachment owns is created and mutated there and nowhere else. A panic in
//! a registration closure or an attachment is caught, logged, and costs only
//! that attachment.

mod acceptor;
mod backoff;
mod heartbeat;

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    thread::{self, JoinHandle},
};

pub(crate) use acceptor::{Acceptor, Placement, SocketOptions};
pub use backoff::BackoffConfig;
pub(crate) use heartbeat::Heartbeat;
use log::{debug, warn};
use tokio::{
    runtime::{Builder, Runtime},
    select,
    sync::mpsc,
    task::{JoinError, JoinSet, LocalSet},
};
use tokio_util::sync::CancellationToken;

use crate::{connection::ConnectionSession, panic::report_panic};

/// Unit of work registered with an event loop.
pub(crate) enum Attachment {
    Acceptor(Acceptor),
    Session(Box<ConnectionSession>),
    Heartbeat(Heartbeat),
}

impl Attachment {
    /// Serve readiness events until the attachment finishes or `stop`
    /// fires; the attachment closes itself on the way out.
    async fn serve(self, stop: CancellationToken) {
        match self {
            Self::Acceptor(acceptor) => acceptor.serve(stop).await,
            Self::Session(session) => session.serve(stop).await,
            Self::Heartbeat(heartbeat) => heartbeat.serve(stop).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Acceptor(_) => "acceptor",
            Self::Session(_) => "session",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Closure executed on the loop thread to create an attachment.
type Registration = Box<dyn FnOnce() -> io::Result<Attachment> + Send>;

/// Cross-thread handle to an [`EventLoop`].
#[derive(Clone, Debug)]
pub(crate) struct EventLoopHandle {
    id: usize,
    tx: mpsc::UnboundedSender<Registration>,
    stop: CancellationToken,
}

impl EventLoopHandle {
    /// Queue `register` for execution on the loop thread.
    ///
    /// Fails once the loop was asked to stop; the closure, and any socket it
    /// owns, is dropped in that case.
    pub(crate) fn register<F>(&self, register: F) -> io::Result<()>
    where
        F: FnOnce() -> io::Result<Attachment> + Send + 'static,
    {
        let stopped = || io::Error::other(format!("event loop {} has stopped", self.id));
        if self.is_stopped() {
            return Err(stopped());
        }
        self.tx.send(Box::new(register)).map_err(|_| stopped())
    }

    /// Ask the loop to close every attachment and exit. Idempotent.
    pub(crate) fn stop(&self) { self.stop.cancel(); }

    pub(crate) fn is_stopped(&self) -> bool { self.stop.is_cancelled() }

    pub(crate) fn id(&self) -> usize { self.id }
}

/// A reactor bound to one thread.
pub(crate) struct EventLoop {
    id: usize,
    runtime: Runtime,
    registrations: mpsc::UnboundedReceiver<Registration>,
    stop: CancellationToken,
}

impl EventLoop {
    /// Build the loop's runtime and the handle used to feed it.
    pub(crate) fn new(id: usize) -> io::Result<(Self, EventLoopHandle)> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (tx, registrations) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let handle = EventLoopHandle {
            id,
            tx,
            stop: stop.clone(),
        };
        Ok((
            Self {
                id,
                runtime,
                registrations,
                stop,
            },
            handle,
        ))
    }

    /// Run the loop on a dedicated thread named `forward-event-loop-{id}`.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("forward-event-loop-{}", self.id))
            .spawn(move || self.run())
    }

    /// Block the calling thread until the loop is stopped and every
    /// attachment has closed.
    pub(crate) fn run(self) {
        let Self {
            id,
            runtime,
            registrations,
            stop,
        } = self;
        let local = LocalSet::new();
        local.block_on(&runtime, drive(id, registrations, stop));
        debug!("event loop exited: event_loop={id}");
    }
}

async fn drive(
    id: usize,
    mut registrations: mpsc::UnboundedReceiver<Registration>,
    stop: CancellationToken,
) {
    debug!("event loop running: event_loop={id}");
    let mut attachments = JoinSet::new();
    loop {
        select! {
            biased;

            () = stop.cancelled() => break,
            Some(register) = registrations.recv() => admit(id, register, &mut attachments, &stop),
            Some(finished) = attachments.join_next() => report(id, finished),
        }
    }

    // Pending registrations own sockets that were never adopted; dropping
    // them closes those sockets.
    registrations.close();
    while registrations.try_recv().is_ok() {}
    while let Some(finished) = attachments.join_next().await {
        report(id, finished);
    }
}

fn admit(
    id: usize,
    register: Registration,
    attachments: &mut JoinSet<()>,
    stop: &CancellationToken,
) {
    match catch_unwind(AssertUnwindSafe(register)) {
        Ok(Ok(attachment)) => {
            debug!(
                "attachment registered: event_loop={id}, kind={}",
                attachment.kind()
            );
            attachments.spawn_local(attachment.serve(stop.clone()));
        }
        Ok(Err(e)) => warn!("registration failed: event_loop={id}, error={e}"),
        Err(panic) => report_panic("registration", &format_args!("event-loop-{id}"), panic),
    }
}

fn report(id: usize, finished: Result<(), JoinError>) {
    match finished {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            report_panic("attachment", &format_args!("event-loop-{id}"), e.into_panic());
        }
        Err(e) => warn!("attachment aborted: event_loop={id}, error={e}"),
    }
}

#[cfg(test)]
mod tests;
