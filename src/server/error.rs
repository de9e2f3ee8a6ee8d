//! Errors raised by [`ForwardServer`](super::ForwardServer) operations.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::tls::TlsConfigError;

/// A configuration that cannot produce a running server. Raised before any
/// connection is accepted.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The listening or heartbeat socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// TLS material or constraints are unusable.
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] TlsConfigError),
}

/// Misuse of the lifecycle surface, or failure to launch threads.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `start()` was called on a server that is not in the built state.
    #[error("server already started")]
    AlreadyStarted,

    /// `start()` was called after `shutdown()`.
    #[error("server has been shut down")]
    ShutDown,

    /// An event loop or worker thread could not be launched.
    #[error("failed to spawn server threads: {0}")]
    Spawn(#[source] io::Error),
}

/// Errors produced by [`ForwardServer`](super::ForwardServer).
#[derive(Debug, Error)]
pub enum ServerError {
    /// Construction failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A lifecycle transition failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_address() {
        let err = ConfigError::Bind {
            addr: "127.0.0.1:24224".parse().expect("addr"),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:24224"));
    }

    #[test]
    fn server_error_is_transparent() {
        let err = ServerError::from(LifecycleError::AlreadyStarted);
        assert_eq!(err.to_string(), "server already started");
    }
}
