//! Plain and TLS byte channels over a non-blocking socket.
//!
//! Both variants share one contract: calls never wait for the socket, report
//! partial progress, and leave unwritten bytes in the caller's buffer.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;

use super::SessionError;
use crate::tls::{TlsRead, TlsSession};

/// Outcome of one read attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Application bytes were appended to the buffer.
    Data(usize),
    /// Input was consumed without application bytes (TLS handshake records).
    Progress,
    /// Nothing to read right now.
    WouldBlock,
    /// The peer closed its sending side.
    Eof,
}

impl From<TlsRead> for ReadStatus {
    fn from(value: TlsRead) -> Self {
        match value {
            TlsRead::Data(n) => Self::Data(n),
            TlsRead::Progress => Self::Progress,
            TlsRead::WouldBlock => Self::WouldBlock,
            TlsRead::Eof => Self::Eof,
        }
    }
}

/// `Read`/`Write` over a tokio stream's non-blocking `try_*` calls.
struct StreamIo<'a>(&'a TcpStream);

impl Read for StreamIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.0.try_read(buf) }
}

impl Write for StreamIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.0.try_write(buf) }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/// Byte channel of a session.
#[derive(Debug)]
pub(crate) enum Channel {
    Plain,
    Tls(Box<TlsSession>),
}

impl Channel {
    /// Read what is available into `dst`.
    ///
    /// Plain reads fill the spare capacity of `dst`; callers reserve space
    /// beforehand.
    pub(crate) fn read(
        &mut self,
        stream: &TcpStream,
        dst: &mut BytesMut,
    ) -> Result<ReadStatus, SessionError> {
        match self {
            Self::Plain => match stream.try_read_buf(dst) {
                Ok(0) => Ok(ReadStatus::Eof),
                Ok(n) => Ok(ReadStatus::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadStatus::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadStatus::Progress),
                Err(e) => Err(e.into()),
            },
            Self::Tls(tls) => Ok(tls.read(&mut StreamIo(stream), dst)?.into()),
        }
    }

    /// Hand as much of `src` as possible to the socket.
    ///
    /// Returns `true` once `src` is empty and no encrypted output is pending.
    pub(crate) fn write(
        &mut self,
        stream: &TcpStream,
        src: &mut BytesMut,
    ) -> Result<bool, SessionError> {
        match self {
            Self::Plain => {
                while !src.is_empty() {
                    match stream.try_write(src) {
                        Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                        Ok(n) => src.advance(n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(true)
            }
            Self::Tls(tls) => Ok(tls.write(&mut StreamIo(stream), src)?),
        }
    }

    /// Whether protocol output (TLS handshake or alerts) awaits the socket.
    pub(crate) fn wants_write(&self) -> bool {
        match self {
            Self::Plain => false,
            Self::Tls(tls) => tls.wants_write(),
        }
    }

    /// Whether application data can be sent.
    pub(crate) fn can_send(&self) -> bool {
        match self {
            Self::Plain => true,
            Self::Tls(tls) => tls.can_send(),
        }
    }

    pub(crate) fn is_tls(&self) -> bool { matches!(self, Self::Tls(_)) }

    /// Send `close_notify` for TLS channels.
    pub(crate) fn close(&mut self, stream: &TcpStream) {
        if let Self::Tls(tls) = self {
            tls.close(&mut StreamIo(stream));
        }
    }
}
