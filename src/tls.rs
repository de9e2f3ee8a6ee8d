//! TLS support for Forward connections.
//!
//! [`TlsConfig`] describes the server identity and negotiation constraints and
//! is compiled into a `rustls` server configuration when the
//! [`ServerConfig`](crate::server::ServerConfig) is validated. Each accepted
//! connection then wraps its socket in a [`TlsSession`], a non-blocking
//! handshake and record-layer state machine driven by the connection's
//! readiness loop.

mod config;
mod session;

pub use config::{ClientAuth, TlsConfig, TlsConfigError, TlsIdentity, TlsVersion};
pub use session::{HandshakeStatus, TlsError, TlsState};
pub(crate) use session::{TlsRead, TlsSession};
