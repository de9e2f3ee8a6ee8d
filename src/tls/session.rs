//! Non-blocking TLS session adapter.
//!
//! The adapter never blocks: every call reads or writes what the socket
//! accepts right now and reports the rest as pending. While the handshake is
//! in progress, reads feed handshake messages to `rustls` and writes flush
//! its responses; neither delivers application data.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use log::debug;
use rustls::ServerConnection;
use thiserror::Error;

/// Handshake sub-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Waiting for more encrypted input from the peer.
    NeedsUnwrap,
    /// Encrypted handshake output is ready to be flushed.
    NeedsWrap,
}

/// Lifecycle of a TLS session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsState {
    /// Negotiating keys; no application data flows yet.
    Handshaking(HandshakeStatus),
    /// Application data may be exchanged.
    Established,
    /// The peer finished sending; application data may still be sent.
    Closing,
    /// The session failed or finished closing.
    Closed,
}

/// Security and transport failures of a TLS session.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The peer failed to complete the handshake.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] rustls::Error),

    /// The peer violated the record protocol after the handshake.
    #[error("TLS protocol violation: {0}")]
    Protocol(#[source] rustls::Error),

    /// The underlying socket failed.
    #[error("TLS transport error: {0}")]
    Io(#[from] io::Error),
}

/// Result of one read attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TlsRead {
    /// Decrypted bytes were appended to the destination.
    Data(usize),
    /// Records were consumed without yielding application data, e.g.
    /// handshake messages.
    Progress,
    /// The socket has nothing to read.
    WouldBlock,
    /// The peer closed the session or the transport.
    Eof,
}

/// Server side of one TLS connection.
#[derive(Debug)]
pub(crate) struct TlsSession {
    conn: ServerConnection,
    state: TlsState,
}

impl TlsSession {
    pub(crate) fn new(conn: ServerConnection) -> Self {
        Self {
            conn,
            state: TlsState::Handshaking(HandshakeStatus::NeedsUnwrap),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> TlsState { self.state }

    /// Whether application data can be encrypted and sent.
    pub(crate) fn can_send(&self) -> bool {
        matches!(self.state, TlsState::Established | TlsState::Closing)
    }

    /// Whether encrypted output is waiting for the socket.
    pub(crate) fn wants_write(&self) -> bool { self.conn.wants_write() }

    /// Pull encrypted bytes from `io`, process them and append any decrypted
    /// application data to `dst`.
    pub(crate) fn read<T: Read + Write>(
        &mut self,
        io: &mut T,
        dst: &mut BytesMut,
    ) -> Result<TlsRead, TlsError> {
        if self.state == TlsState::Closed {
            return Ok(TlsRead::Eof);
        }
        match self.conn.read_tls(io) {
            Ok(0) => {
                self.state = if self.can_send() {
                    TlsState::Closing
                } else {
                    TlsState::Closed
                };
                return Ok(TlsRead::Eof);
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(TlsRead::WouldBlock),
            Err(e) => {
                self.state = TlsState::Closed;
                return Err(e.into());
            }
        }

        let io_state = match self.conn.process_new_packets() {
            Ok(io_state) => io_state,
            Err(e) => {
                let handshaking = matches!(self.state, TlsState::Handshaking(_));
                self.state = TlsState::Closed;
                // Best effort: deliver the alert rustls queued for the peer.
                let _ = self.conn.write_tls(io);
                return Err(if handshaking {
                    TlsError::Handshake(e)
                } else {
                    TlsError::Protocol(e)
                });
            }
        };
        self.refresh_state();

        let available = io_state.plaintext_bytes_to_read();
        if available > 0 {
            let start = dst.len();
            dst.resize(start + available, 0);
            self.conn.reader().read_exact(&mut dst[start..])?;
        }
        if io_state.peer_has_closed() {
            if self.state == TlsState::Established {
                self.state = TlsState::Closing;
            }
            if available == 0 {
                return Ok(TlsRead::Eof);
            }
        }
        Ok(if available > 0 {
            TlsRead::Data(available)
        } else {
            TlsRead::Progress
        })
    }

    /// Encrypt as much of `src` as possible and flush it to `io`.
    ///
    /// During the handshake only handshake output is flushed and `src` is
    /// left untouched. Writing continues after the peer closed its side.
    /// Returns `true` once `src` and all encrypted output have been handed
    /// to the socket.
    pub(crate) fn write<T: Write>(
        &mut self,
        io: &mut T,
        src: &mut BytesMut,
    ) -> Result<bool, TlsError> {
        if self.can_send() && !src.is_empty() {
            let accepted = self.conn.writer().write(src)?;
            src.advance(accepted);
        }
        let flushed = self.flush(io)?;
        self.refresh_state();
        Ok(flushed && src.is_empty() && self.can_send())
    }

    /// Flush pending encrypted output; `true` when nothing remains.
    pub(crate) fn flush<T: Write>(&mut self, io: &mut T) -> Result<bool, TlsError> {
        while self.conn.wants_write() {
            match self.conn.write_tls(io) {
                Ok(0) => return Ok(false),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => {
                    self.state = TlsState::Closed;
                    return Err(e.into());
                }
            }
        }
        Ok(true)
    }

    /// Send `close_notify` and flush what the socket accepts.
    pub(crate) fn close<T: Write>(&mut self, io: &mut T) {
        if self.state == TlsState::Closed {
            return;
        }
        self.conn.send_close_notify();
        self.state = TlsState::Closing;
        if let Err(e) = self.flush(io) {
            debug!("failed to flush close_notify: error={e}");
        }
        self.state = TlsState::Closed;
    }

    fn refresh_state(&mut self) {
        self.state = match self.state {
            TlsState::Handshaking(_) if self.conn.is_handshaking() => {
                TlsState::Handshaking(if self.conn.wants_write() {
                    HandshakeStatus::NeedsWrap
                } else {
                    HandshakeStatus::NeedsUnwrap
                })
            }
            TlsState::Handshaking(_) => {
                debug!(
                    "tls handshake complete: version={:?}, suite={:?}",
                    self.conn.protocol_version(),
                    self.conn.negotiated_cipher_suite().map(|s| s.suite()),
                );
                TlsState::Established
            }
            other => other,
        };
    }
}
