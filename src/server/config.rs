//! Server configuration and its single validation point.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    sync::Arc,
    thread,
};

use super::{BackoffConfig, ConfigError};
use crate::{
    ack::{AckTokenFn, default_ack_token},
    codec::{DEFAULT_CHUNK_SIZE_LIMIT, MAX_FRAME_LENGTH, MIN_FRAME_LENGTH},
    reactor::SocketOptions,
    tls::TlsConfig,
};

/// Port Fluentd forwarders connect to by default.
pub const DEFAULT_PORT: u16 = 24224;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Transport spoken on the listening socket.
#[derive(Clone, Debug, Default)]
pub enum Protocol {
    /// Plain TCP.
    #[default]
    Plain,
    /// TLS over TCP. Plaintext clients are rejected.
    Tls(TlsConfig),
}

/// Configuration snapshot for a [`ForwardServer`](super::ForwardServer).
///
/// Build one with struct update syntax over [`Default`]:
///
/// ```
/// use forwardline::server::ServerConfig;
///
/// let config = ServerConfig {
///     local_address: "127.0.0.1:0".parse().expect("valid address"),
///     workers: 2,
///     ..ServerConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct ServerConfig {
    /// Address the TCP listener, and the heartbeat socket, bind to.
    pub local_address: SocketAddr,
    /// Plain or TLS transport.
    pub protocol: Protocol,
    /// Largest accepted frame and largest inflated compressed stream, in
    /// bytes.
    pub chunk_size_limit: usize,
    /// Bytes reserved in a session's read buffer before each read.
    pub read_buffer_capacity: usize,
    /// Listen backlog passed to `listen(2)`.
    pub backlog: i32,
    /// `SO_SNDBUF` for accepted sockets; the OS default when `None`.
    pub send_buffer_size: Option<usize>,
    /// `SO_RCVBUF` for accepted sockets; the OS default when `None`.
    pub receive_buffer_size: Option<usize>,
    /// `SO_KEEPALIVE` for accepted sockets.
    pub keepalive: bool,
    /// `TCP_NODELAY` for accepted sockets.
    pub tcp_nodelay: bool,
    /// Number of event loop threads.
    pub event_loops: usize,
    /// Number of callback worker threads.
    pub workers: usize,
    /// Batches a connection may have waiting for a worker; a connection
    /// exceeding it is closed.
    pub queue_capacity: usize,
    /// Answer UDP heartbeats on the listening port.
    pub heartbeat: bool,
    /// Pause applied when `accept()` keeps failing.
    pub accept_backoff: BackoffConfig,
    /// Derives the ack token for a chunk id.
    pub ack_token: AckTokenFn,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            local_address: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), DEFAULT_PORT),
            protocol: Protocol::Plain,
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
            read_buffer_capacity: 8 * 1024,
            backlog: DEFAULT_BACKLOG,
            send_buffer_size: None,
            receive_buffer_size: None,
            keepalive: true,
            tcp_nodelay: true,
            event_loops: 1,
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            queue_capacity: 1024,
            heartbeat: true,
            accept_backoff: BackoffConfig::default(),
            ack_token: default_ack_token(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("local_address", &self.local_address)
            .field("protocol", &self.protocol)
            .field("chunk_size_limit", &self.chunk_size_limit)
            .field("read_buffer_capacity", &self.read_buffer_capacity)
            .field("backlog", &self.backlog)
            .field("send_buffer_size", &self.send_buffer_size)
            .field("receive_buffer_size", &self.receive_buffer_size)
            .field("keepalive", &self.keepalive)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("event_loops", &self.event_loops)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("heartbeat", &self.heartbeat)
            .field("accept_backoff", &self.accept_backoff)
            .field("ack_token", &"<fn>")
            .finish()
    }
}

impl ServerConfig {
    /// Check every setting and compile TLS material.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range sizes or counts
    /// and [`ConfigError::Tls`] when the TLS settings cannot be compiled.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if !(MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&self.chunk_size_limit) {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size_limit",
                reason: format!(
                    "{} is outside {MIN_FRAME_LENGTH}..={MAX_FRAME_LENGTH}",
                    self.chunk_size_limit
                ),
            });
        }
        non_zero("read_buffer_capacity", self.read_buffer_capacity)?;
        non_zero("event_loops", self.event_loops)?;
        non_zero("workers", self.workers)?;
        non_zero("queue_capacity", self.queue_capacity)?;
        if self.backlog <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "backlog",
                reason: format!("{} is not positive", self.backlog),
            });
        }
        if self.send_buffer_size == Some(0) || self.receive_buffer_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "socket buffer size",
                reason: "must not be zero".to_owned(),
            });
        }
        let tls = match &self.protocol {
            Protocol::Plain => None,
            Protocol::Tls(tls) => Some(tls.compile()?),
        };
        Ok(ValidatedConfig {
            config: self.clone(),
            tls,
        })
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

/// A configuration that passed [`ServerConfig::validate`].
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    config: ServerConfig,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl ValidatedConfig {
    /// The validated settings.
    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    /// Whether connections are wrapped in TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool { self.tls.is_some() }

    pub(crate) fn tls(&self) -> Option<Arc<rustls::ServerConfig>> { self.tls.clone() }

    pub(crate) fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            nodelay: self.config.tcp_nodelay,
            keepalive: self.config.keepalive,
            send_buffer_size: self.config.send_buffer_size,
            recv_buffer_size: self.config.receive_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::tls::{TlsConfigError, TlsIdentity};

    #[test]
    fn defaults_follow_fluentd() {
        let config = ServerConfig::default();
        assert_eq!(config.local_address.port(), 24224);
        assert!(config.local_address.ip().is_unspecified());
        assert_eq!(config.chunk_size_limit, 8 * 1024 * 1024);
        assert!(config.keepalive);
        assert!(config.tcp_nodelay);
        assert!(config.heartbeat);
        assert!(config.workers >= 1);
        assert!(matches!(config.protocol, Protocol::Plain));
    }

    #[test]
    fn default_config_is_valid() {
        let validated = ServerConfig::default().validate().expect("defaults validate");
        assert!(!validated.is_tls());
        assert_eq!(
            validated.socket_options(),
            SocketOptions {
                nodelay: true,
                keepalive: true,
                send_buffer_size: None,
                recv_buffer_size: None,
            }
        );
    }

    #[rstest]
    #[case::tiny_chunk(ServerConfig { chunk_size_limit: 10, ..ServerConfig::default() }, "chunk_size_limit")]
    #[case::huge_chunk(ServerConfig { chunk_size_limit: MAX_FRAME_LENGTH + 1, ..ServerConfig::default() }, "chunk_size_limit")]
    #[case::no_loops(ServerConfig { event_loops: 0, ..ServerConfig::default() }, "event_loops")]
    #[case::no_workers(ServerConfig { workers: 0, ..ServerConfig::default() }, "workers")]
    #[case::no_queue(ServerConfig { queue_capacity: 0, ..ServerConfig::default() }, "queue_capacity")]
    #[case::no_read_buffer(ServerConfig { read_buffer_capacity: 0, ..ServerConfig::default() }, "read_buffer_capacity")]
    #[case::backlog(ServerConfig { backlog: 0, ..ServerConfig::default() }, "backlog")]
    #[case::send_buffer(ServerConfig { send_buffer_size: Some(0), ..ServerConfig::default() }, "socket buffer size")]
    fn rejects_invalid_values(#[case] config: ServerConfig, #[case] expected: &str) {
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected invalid {expected}, got {other:?}"),
        }
    }

    #[test]
    fn tls_without_material_is_rejected() {
        let config = ServerConfig {
            protocol: Protocol::Tls(TlsConfig::new(TlsIdentity::Der {
                chain: Vec::new(),
                key: rustls::pki_types::PrivateKeyDer::Pkcs8(Vec::new().into()),
            })),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Tls(TlsConfigError::EmptyChain))
        ));
    }

    #[test]
    fn debug_hides_the_token_function() {
        let rendered = format!("{:?}", ServerConfig::default());
        assert!(rendered.contains("ack_token: \"<fn>\""));
    }
}
