//! Errors that end a connection session.

use std::io;

use thiserror::Error;

use crate::{codec::CodecError, dispatch::DispatchError, tls::TlsError};

/// Failure of a single connection. Never affects other connections.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that are not a valid Forward frame.
    #[error(transparent)]
    Codec(CodecError),

    /// TLS negotiation or record processing failed.
    #[error(transparent)]
    Tls(TlsError),

    /// A decoded batch could not be handed to the worker pool.
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl SessionError {
    /// Whether the peer caused the failure by violating the protocol or the
    /// TLS negotiation.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        match self {
            Self::Codec(e) => e.is_violation(),
            Self::Tls(_) => true,
            Self::Io(_) | Self::Dispatch(_) => false,
        }
    }
}

impl From<CodecError> for SessionError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::Io(e) => Self::Io(e),
            other => Self::Codec(other),
        }
    }
}

impl From<TlsError> for SessionError {
    fn from(value: TlsError) -> Self {
        match value {
            TlsError::Io(e) => Self::Io(e),
            other => Self::Tls(other),
        }
    }
}
