//! Interpretation of complete frames into event batches.

use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;
use rmpv::{Value, decode::read_value};

use super::option::{Compression, ForwardOption};
use crate::{
    codec::ProtocolError,
    event::{Event, EventBatch, EventTime, Record, Tag},
};

/// MessagePack extension type of `EventTime`.
pub(super) const EVENT_TIME_EXT: i8 = 0;

/// Decode one complete frame into an [`EventBatch`].
///
/// `limit` bounds the inflated size of a compressed packed stream. Nothing is
/// returned unless the whole frame is valid.
///
/// # Errors
///
/// Returns a [`ProtocolError`] when the frame matches no payload mode or any
/// entry, time, record or option within it is malformed.
///
/// # Examples
///
/// ```
/// use forwardline::protocol::decode_frame;
///
/// // ["app", 1, {"k": "v"}]
/// let frame = [0x93, 0xa3, b'a', b'p', b'p', 0x01, 0x81, 0xa1, b'k', 0xa1, b'v'];
/// let batch = decode_frame(&frame, 1024).expect("valid message frame");
/// assert_eq!(batch.tag(), "app");
/// assert_eq!(batch.len(), 1);
/// ```
pub fn decode_frame(frame: &[u8], limit: usize) -> Result<EventBatch, ProtocolError> {
    let mut reader = frame;
    let value = read_value(&mut reader).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(ProtocolError::Malformed(format!(
            "{} bytes after the frame",
            reader.len()
        )));
    }
    let Value::Array(items) = value else {
        return Err(ProtocolError::UnsupportedPayload {
            found: value_kind(&value),
        });
    };

    let mut items = items.into_iter();
    let tag = match items.next() {
        Some(Value::String(s)) => Tag::from(s.into_str().ok_or(ProtocolError::InvalidTag)?),
        Some(_) => return Err(ProtocolError::InvalidTag),
        None => return Err(ProtocolError::MissingTag),
    };

    let (events, option) = match items.next().ok_or(ProtocolError::MissingPayload)? {
        Value::Array(entries) => {
            let option = ForwardOption::from_value(items.next())?;
            let events = entries
                .into_iter()
                .map(|entry| decode_entry(&tag, entry))
                .collect::<Result<Vec<_>, _>>()?;
            (events, option)
        }
        Value::Binary(packed) => {
            let option = ForwardOption::from_value(items.next())?;
            (decode_packed(&tag, &packed, &option, limit)?, option)
        }
        Value::String(packed) => {
            let option = ForwardOption::from_value(items.next())?;
            (decode_packed(&tag, packed.as_bytes(), &option, limit)?, option)
        }
        time @ (Value::Integer(_) | Value::Ext(..)) => {
            let time = decode_time(&time)?;
            let record = decode_record(items.next().ok_or(ProtocolError::MissingRecord)?)?;
            let option = ForwardOption::from_value(items.next())?;
            (vec![Event::new(tag.clone(), time, record)], option)
        }
        other => {
            return Err(ProtocolError::UnsupportedPayload {
                found: value_kind(&other),
            });
        }
    };

    let count = items.count();
    if count > 0 {
        return Err(ProtocolError::TrailingElements { count });
    }
    Ok(EventBatch::new(tag, events, option.chunk))
}

fn decode_packed(
    tag: &Tag,
    packed: &[u8],
    option: &ForwardOption,
    limit: usize,
) -> Result<Vec<Event>, ProtocolError> {
    match option.compressed {
        Some(Compression::Gzip) => {
            let bound = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
            let mut reader = BufReader::new(MultiGzDecoder::new(packed).take(bound));
            let events = read_entries(tag, &mut reader);
            // A truncated stream surfaces as a decode error; the limit wins.
            if reader.get_ref().limit() == 0 {
                return Err(ProtocolError::DecompressedTooLarge { max: limit });
            }
            events
        }
        Some(Compression::Text) | None => {
            let mut reader = packed;
            read_entries(tag, &mut reader)
        }
    }
}

/// Decode `[time, record]` entries one at a time until the stream ends.
fn read_entries<R: BufRead>(tag: &Tag, reader: &mut R) -> Result<Vec<Event>, ProtocolError> {
    let mut events = Vec::new();
    while !reader
        .fill_buf()
        .map_err(|e| ProtocolError::Decompression(e.to_string()))?
        .is_empty()
    {
        let entry = read_value(reader).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        events.push(decode_entry(tag, entry)?);
    }
    Ok(events)
}

fn decode_entry(tag: &Tag, entry: Value) -> Result<Event, ProtocolError> {
    let Value::Array(pair) = entry else {
        return Err(ProtocolError::InvalidEntry);
    };
    let Ok([time, record]) = <[Value; 2]>::try_from(pair) else {
        return Err(ProtocolError::InvalidEntry);
    };
    Ok(Event::new(
        tag.clone(),
        decode_time(&time)?,
        decode_record(record)?,
    ))
}

fn decode_time(value: &Value) -> Result<EventTime, ProtocolError> {
    match value {
        Value::Integer(n) => n
            .as_u64()
            .and_then(|secs| u32::try_from(secs).ok())
            .map(EventTime::from_seconds)
            .ok_or(ProtocolError::InvalidTime),
        Value::Ext(EVENT_TIME_EXT, data) => {
            let Ok(raw) = <[u8; 8]>::try_from(data.as_slice()) else {
                return Err(ProtocolError::InvalidTime);
            };
            let [s0, s1, s2, s3, n0, n1, n2, n3] = raw;
            EventTime::new(
                u32::from_be_bytes([s0, s1, s2, s3]),
                u32::from_be_bytes([n0, n1, n2, n3]),
            )
            .ok_or(ProtocolError::InvalidTime)
        }
        _ => Err(ProtocolError::InvalidTime),
    }
}

fn decode_record(value: Value) -> Result<Record, ProtocolError> {
    let Value::Map(entries) = value else {
        return Err(ProtocolError::InvalidRecord);
    };
    entries
        .into_iter()
        .map(|(key, value)| match key {
            Value::String(s) => s
                .into_str()
                .map(|k| (k, value))
                .ok_or(ProtocolError::InvalidRecordKey),
            _ => Err(ProtocolError::InvalidRecordKey),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Record::new)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "extension",
    }
}
