//! Error types for the codec layer.
//!
//! Failures are split by the layer that detects them:
//!
//! - [`FramingError`]: the byte stream cannot be cut into a MessagePack frame (oversized
//!   declarations, a non-array frame, reserved markers, excessive nesting).
//! - [`ProtocolError`]: a complete frame was extracted but does not match any Forward payload
//!   shape.
//! - [`EofError`]: the peer closed the stream in the middle of a frame.
//! - [`CodecError`]: top-level enum wrapping all categories plus I/O errors.
//!
//! Every variant is fatal for the connection that produced it: the session is
//! closed and no part of the offending frame is delivered.

use std::io;

use thiserror::Error;

/// Framing-level errors raised while locating frame boundaries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A length or element count declares more bytes than a frame may hold.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Bytes the frame would need according to its declarations.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Forward frames are MessagePack arrays; anything else is rejected on
    /// the first byte.
    #[error("frame does not start with an array marker: {marker:#04x}")]
    NotAnArray {
        /// First byte of the rejected frame.
        marker: u8,
    },

    /// The never-used MessagePack marker `0xc1` was found.
    #[error("reserved marker 0xc1 at offset {offset}")]
    ReservedMarker {
        /// Offset of the marker within the frame.
        offset: usize,
    },

    /// Containers are nested deeper than the scanner tracks.
    #[error("frame nesting exceeds {max} levels")]
    NestingTooDeep {
        /// Deepest supported nesting level.
        max: usize,
    },
}

/// Protocol-level errors raised while interpreting a complete frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The record codec could not decode the frame bytes.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The frame array is empty.
    #[error("frame has no tag")]
    MissingTag,

    /// The first element is not a UTF-8 string.
    #[error("tag is not a UTF-8 string")]
    InvalidTag,

    /// The frame ends after the tag.
    #[error("frame has no payload after the tag")]
    MissingPayload,

    /// The element after the tag matches no payload shape.
    #[error("unsupported payload shape: {found}")]
    UnsupportedPayload {
        /// Kind of value found in the payload position.
        found: &'static str,
    },

    /// Message mode frame lacks its record.
    #[error("message mode frame has no record")]
    MissingRecord,

    /// An entry is not a `[time, record]` pair.
    #[error("entry is not a [time, record] pair")]
    InvalidEntry,

    /// A timestamp is neither a 32-bit integer nor an `EventTime` extension.
    #[error("invalid event time")]
    InvalidTime,

    /// A record is not a map.
    #[error("record is not a map")]
    InvalidRecord,

    /// A record key is not a UTF-8 string.
    #[error("record key is not a UTF-8 string")]
    InvalidRecordKey,

    /// The option element is neither a map nor nil, or carries a mistyped
    /// known key.
    #[error("invalid option: {0}")]
    InvalidOption(&'static str),

    /// The `compressed` option names an unknown algorithm.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// The compressed packed stream could not be inflated.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The inflated packed stream is larger than a frame may be.
    #[error("decompressed payload exceeds {max} bytes")]
    DecompressedTooLarge {
        /// Maximum inflated size.
        max: usize,
    },

    /// Elements follow the option map.
    #[error("{count} unexpected trailing elements")]
    TrailingElements {
        /// Number of surplus elements.
        count: usize,
    },
}

/// End-of-stream conditions that lose data.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// The peer closed the connection while a frame was only partly received.
    #[error("premature EOF: {bytes_received} bytes of an incomplete frame received")]
    MidFrame {
        /// Bytes buffered when the stream ended.
        bytes_received: usize,
    },
}

/// Top-level codec error taxonomy.
///
/// # Examples
///
/// ```
/// use forwardline::codec::{CodecError, FramingError};
///
/// let err = CodecError::Framing(FramingError::OversizedFrame {
///     size: 2000,
///     max: 1024,
/// });
/// assert!(err.is_violation());
/// assert!(!CodecError::Io(std::io::Error::other("reset")).is_violation());
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    /// Framing layer error.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Protocol layer error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport layer I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End-of-stream handling.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Whether the error was caused by bytes the peer sent.
    #[must_use]
    pub fn is_violation(&self) -> bool { matches!(self, Self::Framing(_) | Self::Protocol(_)) }
}
