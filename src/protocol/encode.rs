//! Encoding event batches as Forward frames.
//!
//! The server itself only writes ack responses; this encoder serves clients,
//! relays and tests that need to produce frames in any payload mode.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use flate2::{Compression as GzLevel, write::GzEncoder};
use rmpv::{Value, encode::write_value};
use thiserror::Error;

use super::{
    ForwardMode,
    decode::EVENT_TIME_EXT,
    option::{Compression, ForwardOption},
};
use crate::event::{Event, EventBatch, EventTime};

/// Errors raised while encoding a batch.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Message mode carries exactly one event.
    #[error("message mode requires exactly one event, batch has {count}")]
    MessageArity {
        /// Events in the rejected batch.
        count: usize,
    },

    /// The record codec or the compressor failed.
    #[error("failed to write frame: {0}")]
    Write(#[from] io::Error),
}

impl From<rmpv::encode::Error> for EncodeError {
    fn from(value: rmpv::encode::Error) -> Self { Self::Write(io::Error::other(value.to_string())) }
}

/// Append `batch` to `dst` as one frame in `mode`.
///
/// The batch's chunk id, if any, is sent as the `chunk` option. Timestamps
/// are always written as the `EventTime` extension.
///
/// # Errors
///
/// Returns [`EncodeError::MessageArity`] when `mode` is
/// [`ForwardMode::Message`] and the batch does not hold exactly one event.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use forwardline::{
///     event::{Event, EventBatch, EventTime},
///     protocol::{ForwardMode, decode_frame, encode_batch},
/// };
///
/// let tag: std::sync::Arc<str> = "app".into();
/// let event = Event::new(
///     tag.clone(),
///     EventTime::from_seconds(1),
///     [("k", "v")].into_iter().collect(),
/// );
/// let batch = EventBatch::new(tag, vec![event], None);
/// let mut buf = BytesMut::new();
/// encode_batch(&batch, ForwardMode::PackedForward, &mut buf).expect("encode");
/// assert_eq!(decode_frame(&buf, 1024).expect("decode"), batch);
/// ```
pub fn encode_batch(
    batch: &EventBatch,
    mode: ForwardMode,
    dst: &mut BytesMut,
) -> Result<(), EncodeError> {
    let tag = Value::from(batch.tag());
    let mut option = ForwardOption {
        chunk: batch.chunk_id().cloned(),
        ..ForwardOption::default()
    };

    let mut items = match mode {
        ForwardMode::Message => {
            let [event] = batch.events() else {
                return Err(EncodeError::MessageArity { count: batch.len() });
            };
            vec![tag, time_value(event.time()), record_value(event)]
        }
        ForwardMode::Forward => {
            let entries = batch.events().iter().map(entry_value).collect();
            vec![tag, Value::Array(entries)]
        }
        ForwardMode::PackedForward => vec![tag, Value::Binary(pack(batch.events())?)],
        ForwardMode::CompressedPackedForward => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder.write_all(&pack(batch.events())?)?;
            option.compressed = Some(Compression::Gzip);
            vec![tag, Value::Binary(encoder.finish()?)]
        }
    };
    items.extend(option.to_value());

    write_value(&mut dst.writer(), &Value::Array(items))?;
    Ok(())
}

fn pack(events: &[Event]) -> Result<Vec<u8>, EncodeError> {
    let mut packed = Vec::new();
    for event in events {
        write_value(&mut packed, &entry_value(event))?;
    }
    Ok(packed)
}

fn entry_value(event: &Event) -> Value {
    Value::Array(vec![time_value(event.time()), record_value(event)])
}

fn time_value(time: EventTime) -> Value {
    let mut raw = Vec::with_capacity(8);
    raw.extend_from_slice(&time.seconds().to_be_bytes());
    raw.extend_from_slice(&time.nanoseconds().to_be_bytes());
    Value::Ext(EVENT_TIME_EXT, raw)
}

fn record_value(event: &Event) -> Value {
    Value::Map(
        event
            .record()
            .iter()
            .map(|(k, v)| (Value::from(k), v.clone()))
            .collect(),
    )
}
