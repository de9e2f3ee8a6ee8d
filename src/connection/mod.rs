//! Per-connection protocol sessions.
//!
//! A [`ConnectionSession`] owns an accepted socket for its whole life. It
//! runs on exactly one event loop thread, reads through the plain or TLS
//! channel into its buffer, decodes complete frames, hands batches to its
//! dispatch lane, and writes ack responses as their callbacks complete. No
//! other thread touches its buffers.

mod channel;
mod error;
mod session;

use std::fmt;

pub(crate) use channel::{Channel, ReadStatus};
pub use error::SessionError;
pub(crate) use session::{ConnectionSession, SessionContext};

/// Identifier assigned to a connection when it is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "conn-{}", self.0) }
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its side and every pending ack was resolved.
    PeerClosed,
    /// The server is shutting down.
    Shutdown,
    /// The session failed.
    Failed(SessionError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}
