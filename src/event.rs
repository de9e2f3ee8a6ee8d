//! Event data model produced by the Forward protocol decoder.
//!
//! Events are immutable once decoded. A batch owns its events and travels
//! from the connection session to the dispatcher and on to the user callback
//! without being copied or mutated.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use rmpv::Value;

/// Tag shared by every event of a batch.
pub type Tag = Arc<str>;

/// Timestamp attached to an event.
///
/// Integer timestamps decode with `nanoseconds == 0`; the `EventTime`
/// extension carries sub-second precision. Both encodings share the unsigned
/// 32-bit seconds range of the wire format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTime {
    seconds: u32,
    nanoseconds: u32,
}

impl EventTime {
    /// Nanoseconds per second; larger nanosecond values are rejected.
    pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

    /// Create a timestamp from seconds and nanoseconds since the Unix epoch.
    ///
    /// Returns `None` when `nanoseconds` is not below one second.
    ///
    /// ```
    /// use forwardline::event::EventTime;
    ///
    /// let time = EventTime::new(1_700_000_000, 5).expect("valid time");
    /// assert_eq!(time.seconds(), 1_700_000_000);
    /// assert!(EventTime::new(0, 1_000_000_000).is_none());
    /// ```
    #[must_use]
    pub const fn new(seconds: u32, nanoseconds: u32) -> Option<Self> {
        if nanoseconds >= Self::NANOS_PER_SECOND {
            return None;
        }
        Some(Self {
            seconds,
            nanoseconds,
        })
    }

    /// Create a timestamp with whole-second precision.
    #[must_use]
    pub const fn from_seconds(seconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds: 0,
        }
    }

    /// Seconds since the Unix epoch.
    #[must_use]
    pub const fn seconds(&self) -> u32 { self.seconds }

    /// Sub-second part in nanoseconds.
    #[must_use]
    pub const fn nanoseconds(&self) -> u32 { self.nanoseconds }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// Ordered mapping of field names to MessagePack values.
///
/// Field order matches the order in which the fields appeared on the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record(Vec<(String, Value)>);

impl Record {
    /// Create a record from ordered fields.
    #[must_use]
    pub fn new(fields: Vec<(String, Value)>) -> Self { Self(fields) }

    /// Look up the first field named `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate over fields in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Borrow the fields as a slice.
    #[must_use]
    pub fn fields(&self) -> &[(String, Value)] { &self.0 }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single decoded log event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    tag: Tag,
    time: EventTime,
    record: Record,
}

impl Event {
    /// Create an event.
    #[must_use]
    pub fn new(tag: Tag, time: EventTime, record: Record) -> Self { Self { tag, time, record } }

    /// Routing tag.
    #[must_use]
    pub fn tag(&self) -> &str { &self.tag }

    /// Event timestamp.
    #[must_use]
    pub fn time(&self) -> EventTime { self.time }

    /// Event fields.
    #[must_use]
    pub fn record(&self) -> &Record { &self.record }
}

/// Opaque chunk identifier sent by a client requesting acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId(Bytes);

impl ChunkId {
    /// Wrap raw chunk bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Raw bytes of the identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    /// Clone the identifier into a shared byte buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes { self.0.clone() }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self { Self(Bytes::copy_from_slice(value.as_bytes())) }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:02x?}", &self.0[..]),
        }
    }
}

/// Events decoded from one Forward frame.
///
/// Events keep wire order. When the frame carried a `chunk` option the batch
/// remembers it so the sender can be acknowledged once the batch is
/// consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct EventBatch {
    tag: Tag,
    events: Vec<Event>,
    chunk_id: Option<ChunkId>,
}

impl EventBatch {
    /// Create a batch. Every event is expected to carry `tag`.
    #[must_use]
    pub fn new(tag: Tag, events: Vec<Event>, chunk_id: Option<ChunkId>) -> Self {
        Self {
            tag,
            events,
            chunk_id,
        }
    }

    /// Tag shared by the batch.
    #[must_use]
    pub fn tag(&self) -> &str { &self.tag }

    /// Events in wire order.
    #[must_use]
    pub fn events(&self) -> &[Event] { &self.events }

    /// Consume the batch, yielding its events.
    #[must_use]
    pub fn into_events(self) -> Vec<Event> { self.events }

    /// Chunk identifier requesting acknowledgement, if any.
    #[must_use]
    pub fn chunk_id(&self) -> Option<&ChunkId> { self.chunk_id.as_ref() }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize { self.events.len() }

    /// Whether the batch has no events.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.events.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_time_rejects_out_of_range_nanos() {
        assert!(EventTime::new(1, EventTime::NANOS_PER_SECOND).is_none());
        assert_eq!(
            EventTime::new(1, 999_999_999).map(|t| t.nanoseconds()),
            Some(999_999_999)
        );
    }

    #[test]
    fn event_time_displays_fraction() {
        let time = EventTime::new(12, 34).expect("valid time");
        assert_eq!(time.to_string(), "12.000000034");
    }

    #[test]
    fn record_preserves_field_order() {
        let record: Record = [("b", 1), ("a", 2)].into_iter().collect();
        let keys: Vec<_> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(record.get("a"), Some(&Value::from(2)));
    }

    #[test]
    fn chunk_id_display_falls_back_to_hex() {
        assert_eq!(ChunkId::from("c1").to_string(), "c1");
        assert_eq!(ChunkId::new(vec![0xff_u8, 0x00]).to_string(), "[ff, 00]");
    }
}
