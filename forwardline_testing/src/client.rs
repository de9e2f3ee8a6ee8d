//! Blocking Forward protocol client for driving a server in tests.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use forwardline::{
    AckToken,
    EventBatch,
    ForwardMode,
    protocol::encode_batch,
};
use rmpv::Value;
use rustls::{ClientConfig, ClientConnection, StreamOwned, pki_types::ServerName};

/// Read timeout applied to every client socket.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Transport {
    fn socket(&self) -> &TcpStream {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(stream) => stream.get_ref(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// A connection to a Forward server.
pub struct ForwardClient {
    transport: Transport,
}

impl ForwardClient {
    /// Connect over plain TCP.
    ///
    /// # Errors
    ///
    /// Returns any connection error.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            transport: Transport::Plain(stream),
        })
    }

    /// Connect over TLS, verifying the server as `localhost`.
    ///
    /// The handshake runs lazily on the first read or write.
    ///
    /// # Errors
    ///
    /// Returns any connection error.
    pub fn connect_tls(addr: SocketAddr, config: Arc<ClientConfig>) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
        let name = ServerName::try_from("localhost").map_err(io::Error::other)?;
        let conn = ClientConnection::new(config, name).map_err(io::Error::other)?;
        Ok(Self {
            transport: Transport::Tls(Box::new(StreamOwned::new(conn, stream))),
        })
    }

    /// Write raw bytes.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.transport.write_all(bytes)?;
        self.transport.flush()
    }

    /// Encode `batch` in `mode` and send it.
    ///
    /// # Errors
    ///
    /// Returns encoding or write errors.
    pub fn send(&mut self, batch: &EventBatch, mode: ForwardMode) -> io::Result<()> {
        let frame = encode(batch, mode)?;
        self.send_raw(&frame)
    }

    /// Read one `{"ack": token}` response.
    ///
    /// # Errors
    ///
    /// Returns a timeout error when no response arrives within
    /// [`CLIENT_TIMEOUT`] and `InvalidData` when the response is malformed.
    pub fn read_ack(&mut self) -> io::Result<AckToken> {
        let value = rmpv::decode::read_value(&mut self.transport).map_err(|e| match e {
            rmpv::decode::Error::InvalidMarkerRead(e) | rmpv::decode::Error::InvalidDataRead(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })?;
        ack_token(&value).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("not an ack response: {value}"),
            )
        })
    }

    /// Wait up to `timeout` for the server to close the connection. Data
    /// arriving meanwhile is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket timeout cannot be changed.
    pub fn wait_closed(&mut self, timeout: Duration) -> io::Result<bool> {
        self.transport.socket().set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 512];
        let closed = loop {
            match self.transport.read(&mut buf) {
                Ok(0) => break true,
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    break false;
                }
                Err(_) => break true,
            }
        };
        self.transport.socket().set_read_timeout(Some(CLIENT_TIMEOUT))?;
        Ok(closed)
    }

    /// Close the sending side, keeping the receiving side open for acks.
    ///
    /// # Errors
    ///
    /// Returns any socket error.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Transport::Tls(stream) = &mut self.transport {
            stream.conn.send_close_notify();
            stream.flush()?;
        }
        self.transport.socket().shutdown(Shutdown::Write)
    }
}

/// Encode `batch` as one frame in `mode`.
///
/// # Errors
///
/// Returns `InvalidInput` when the batch cannot be expressed in `mode`.
pub fn encode(batch: &EventBatch, mode: ForwardMode) -> io::Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    encode_batch(batch, mode, &mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    Ok(buf.to_vec())
}

fn ack_token(value: &Value) -> Option<AckToken> {
    let Value::Map(entries) = value else {
        return None;
    };
    entries.iter().find_map(|(key, token)| {
        if key.as_str() != Some("ack") {
            return None;
        }
        match token {
            Value::String(s) => Some(AckToken::new(s.as_bytes().to_vec())),
            Value::Binary(b) => Some(AckToken::new(b.clone())),
            _ => None,
        }
    })
}
