//! The per-connection readiness loop.

use std::{
    io,
    net::{SocketAddr, TcpStream as StdTcpStream},
    sync::Arc,
};

use bytes::BytesMut;
use log::{debug, info, warn};
use rustls::ServerConnection;
use tokio::{
    io::{Interest, Ready},
    net::TcpStream,
    select,
    sync::mpsc,
};
use tokio_util::{codec::Decoder, sync::CancellationToken};

use super::{Channel, CloseReason, ConnectionId, ReadStatus, SessionError};
use crate::{
    ack::{AckCompletion, AckHandle, AckQueue, AckTokenFn},
    codec::{CodecError, ForwardCodec, encode_ack_response},
    dispatch::{DispatchLane, Dispatcher, Job},
    event::EventBatch,
    tls::TlsSession,
};

/// Reads attempted per readiness event before yielding to other sessions.
const MAX_READS_PER_WAKE: usize = 16;

/// Settings and collaborators shared by every session of a server.
pub(crate) struct SessionContext {
    pub(crate) chunk_size_limit: usize,
    pub(crate) read_buffer_capacity: usize,
    pub(crate) tls: Option<Arc<rustls::ServerConfig>>,
    pub(crate) ack_token: AckTokenFn,
    pub(crate) dispatcher: Arc<Dispatcher>,
}

enum Step {
    Stop,
    Completion(AckCompletion),
    Ready(io::Result<Ready>),
}

/// State of one accepted connection.
pub(crate) struct ConnectionSession {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    channel: Channel,
    codec: ForwardCodec,
    read_buf: BytesMut,
    read_capacity: usize,
    outbound: BytesMut,
    acks: AckQueue,
    ack_token: AckTokenFn,
    completion_tx: mpsc::UnboundedSender<AckCompletion>,
    completions: mpsc::UnboundedReceiver<AckCompletion>,
    lane: DispatchLane,
    read_closed: bool,
    closed: bool,
}

impl ConnectionSession {
    /// Adopt an accepted socket on the current event loop.
    pub(crate) fn open(
        id: ConnectionId,
        peer: SocketAddr,
        stream: StdTcpStream,
        context: &SessionContext,
    ) -> io::Result<Self> {
        let stream = TcpStream::from_std(stream)?;
        let channel = match &context.tls {
            Some(config) => {
                let conn = ServerConnection::new(Arc::clone(config)).map_err(io::Error::other)?;
                Channel::Tls(Box::new(TlsSession::new(conn)))
            }
            None => Channel::Plain,
        };
        let lane = context.dispatcher.lane(id).map_err(io::Error::other)?;
        let (completion_tx, completions) = mpsc::unbounded_channel();
        info!("connection opened: id={id}, peer={peer}, tls={}", channel.is_tls());
        Ok(Self {
            id,
            peer,
            stream,
            channel,
            codec: ForwardCodec::new(context.chunk_size_limit),
            read_buf: BytesMut::with_capacity(context.read_buffer_capacity),
            read_capacity: context.read_buffer_capacity,
            outbound: BytesMut::new(),
            acks: AckQueue::default(),
            ack_token: Arc::clone(&context.ack_token),
            completion_tx,
            completions,
            lane,
            read_closed: false,
            closed: false,
        })
    }

    /// Drive the session until the peer leaves, an error occurs or `stop`
    /// fires, then close it.
    pub(crate) async fn serve(mut self, stop: CancellationToken) {
        let reason = self.drive(&stop).await;
        self.close(&reason);
    }

    async fn drive(&mut self, stop: &CancellationToken) -> CloseReason {
        loop {
            if self.read_closed && self.acks.is_empty() && !self.has_output() {
                return CloseReason::PeerClosed;
            }
            if self.read_closed && !self.channel.can_send() && !self.channel.wants_write() {
                if self.has_output() || !self.acks.is_empty() {
                    debug!(
                        "dropping unsendable acks: id={}, peer={}, pending_acks={}",
                        self.id,
                        self.peer,
                        self.acks.len()
                    );
                }
                return CloseReason::PeerClosed;
            }
            let interest = self.interest();
            let step = select! {
                biased;

                () = stop.cancelled() => Step::Stop,
                Some(completion) = self.completions.recv() => Step::Completion(completion),
                ready = self.stream.ready(interest.unwrap_or(Interest::READABLE)),
                    if interest.is_some() => Step::Ready(ready),
            };
            let result = match step {
                Step::Stop => return CloseReason::Shutdown,
                Step::Completion(completion) => self.on_completion(completion),
                Step::Ready(Ok(ready)) => self.on_ready(ready),
                Step::Ready(Err(e)) => Err(e.into()),
            };
            if let Err(e) = result {
                return CloseReason::Failed(e);
            }
        }
    }

    fn has_output(&self) -> bool { !self.outbound.is_empty() || self.channel.wants_write() }

    fn interest(&self) -> Option<Interest> {
        let write = self.channel.wants_write()
            || (!self.outbound.is_empty() && self.channel.can_send());
        match (!self.read_closed, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn on_ready(&mut self, ready: Ready) -> Result<(), SessionError> {
        if ready.is_readable() || ready.is_read_closed() {
            self.on_readable()?;
        }
        self.flush()
    }

    fn on_readable(&mut self) -> Result<(), SessionError> {
        for _ in 0..MAX_READS_PER_WAKE {
            if self.read_closed {
                return Ok(());
            }
            self.read_buf.reserve(self.read_capacity);
            match self.channel.read(&self.stream, &mut self.read_buf)? {
                ReadStatus::Data(_) => self.decode_frames()?,
                ReadStatus::Progress => self.flush()?,
                ReadStatus::WouldBlock => return Ok(()),
                ReadStatus::Eof => {
                    self.read_closed = true;
                    return self.finish_input();
                }
            }
        }
        Ok(())
    }

    fn decode_frames(&mut self) -> Result<(), SessionError> {
        while let Some(batch) = self.codec.decode(&mut self.read_buf)? {
            self.dispatch(batch)?;
        }
        Ok(())
    }

    /// Handle end of input: dispatch what is complete, discard a truncated
    /// tail.
    fn finish_input(&mut self) -> Result<(), SessionError> {
        loop {
            match self.codec.decode_eof(&mut self.read_buf) {
                Ok(Some(batch)) => self.dispatch(batch)?,
                Ok(None) => break,
                Err(CodecError::Eof(e)) => {
                    warn!(
                        "discarding truncated frame: id={}, peer={}, error={e}",
                        self.id, self.peer
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(
            "peer finished sending: id={}, peer={}, pending_acks={}",
            self.id,
            self.peer,
            self.acks.len()
        );
        Ok(())
    }

    fn dispatch(&mut self, batch: EventBatch) -> Result<(), SessionError> {
        debug!(
            "batch decoded: id={}, tag={}, events={}, chunk={:?}",
            self.id,
            batch.tag(),
            batch.len(),
            batch.chunk_id().map(ToString::to_string)
        );
        let ack = match batch.chunk_id() {
            Some(chunk) => {
                let seq = self.acks.reserve((self.ack_token)(chunk));
                AckHandle::new(self.completion_tx.clone(), seq)
            }
            None => AckHandle::none(),
        };
        self.lane.submit(Job {
            connection: self.id,
            batch,
            ack,
        })?;
        Ok(())
    }

    fn on_completion(&mut self, first: AckCompletion) -> Result<(), SessionError> {
        let mut next = Some(first);
        while let Some(completion) = next {
            for token in self.acks.complete(completion) {
                encode_ack_response(&token, &mut self.outbound)?;
            }
            next = self.completions.try_recv().ok();
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<(), SessionError> {
        if self.has_output() {
            self.channel.write(&self.stream, &mut self.outbound)?;
        }
        Ok(())
    }

    /// Release the session. Idempotent.
    pub(crate) fn close(&mut self, reason: &CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close(&self.stream);
        let pending_acks = self.acks.len();
        if let CloseReason::Failed(e) = reason {
            warn!(
                "connection closed: id={}, peer={}, reason={reason}, violation={}, \
                 pending_acks={pending_acks}",
                self.id,
                self.peer,
                e.is_violation()
            );
        } else {
            info!(
                "connection closed: id={}, peer={}, reason={reason}, pending_acks={pending_acks}",
                self.id, self.peer
            );
        }
    }
}
