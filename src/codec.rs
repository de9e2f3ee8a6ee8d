//! Frame assembly and ack encoding for the Forward protocol.
//!
//! [`ForwardCodec`] implements `tokio_util`'s [`Decoder`] over the
//! connection's read buffer. Bytes accumulate across any number of
//! non-blocking reads; the embedded scanner remembers how far it got, so a
//! frame split at arbitrary boundaries decodes exactly like one delivered
//! whole. Bytes beyond a complete frame stay in the buffer for the next call.
//!
//! # Error Handling
//!
//! Every [`CodecError`] returned by the decoder is fatal for the connection.
//! See the [`error`] module for the taxonomy.

use std::io;

use bytes::{BufMut, BytesMut};
use rmpv::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::{ack::AckToken, event::EventBatch, protocol::decode_frame};

pub mod error;
mod scanner;

pub use error::{CodecError, EofError, FramingError, ProtocolError};
pub use scanner::MAX_NESTING_DEPTH;
use scanner::FrameScanner;

/// Smallest accepted frame size limit in bytes.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Largest accepted frame size limit in bytes (256 MiB).
pub const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

/// Default frame size limit (8 MiB), matching Fluentd's default chunk limit.
pub const DEFAULT_CHUNK_SIZE_LIMIT: usize = 8 * 1024 * 1024;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// Decoder for Forward frames and encoder for ack responses.
#[derive(Debug)]
pub struct ForwardCodec {
    max_frame_length: usize,
    scanner: FrameScanner,
}

impl ForwardCodec {
    /// Construct a codec accepting frames up to `max_frame_length` bytes.
    ///
    /// The limit is clamped to [`MIN_FRAME_LENGTH`]..=[`MAX_FRAME_LENGTH`]. It
    /// also bounds the inflated size of compressed packed streams.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
            scanner: FrameScanner::default(),
        }
    }

    /// Return the maximum frame length accepted by this codec.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for ForwardCodec {
    fn default() -> Self { Self::new(DEFAULT_CHUNK_SIZE_LIMIT) }
}

impl Decoder for ForwardCodec {
    type Item = EventBatch;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let scanned = self.scanner.scan(src, self.max_frame_length);
        let Some(len) = scanned.inspect_err(|_| self.scanner.reset())? else {
            return Ok(None);
        };
        let frame = src.split_to(len).freeze();
        let batch = decode_frame(&frame, self.max_frame_length)?;
        Ok(Some(batch))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(batch) = self.decode(src)? {
            return Ok(Some(batch));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let bytes_received = src.len();
        src.clear();
        self.scanner.reset();
        Err(EofError::MidFrame { bytes_received }.into())
    }
}

/// Ack response frame: `{"ack": token}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckResponse(pub AckToken);

impl Encoder<AckResponse> for ForwardCodec {
    type Error = CodecError;

    fn encode(&mut self, item: AckResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_ack_response(&item.0, dst)
    }
}

/// Append the MessagePack encoding of `{"ack": token}` to `dst`.
///
/// The token is written as a string when it is valid UTF-8 (the form Fluentd
/// clients compare against their `chunk` option) and as binary otherwise.
///
/// # Errors
///
/// Returns [`CodecError::Io`] if the record codec fails to write.
pub fn encode_ack_response(token: &AckToken, dst: &mut BytesMut) -> Result<(), CodecError> {
    let token = match std::str::from_utf8(token.as_bytes()) {
        Ok(s) => Value::from(s),
        Err(_) => Value::Binary(token.as_bytes().to_vec()),
    };
    let frame = Value::Map(vec![(Value::from("ack"), token)]);
    rmpv::encode::write_value(&mut dst.writer(), &frame)
        .map_err(|e| CodecError::Io(io::Error::other(e.to_string())))
}
