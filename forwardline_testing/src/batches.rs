//! Sample batches.

use forwardline::{ChunkId, Event, EventBatch, EventTime, Record, event::Tag};
use rmpv::Value;

/// Base timestamp of sample events.
pub const BASE_TIME: u32 = 1_700_000_000;

/// Event `seq` of a sample stream: `{"seq": seq, "message": "event {seq}"}`.
#[must_use]
pub fn sample_event(tag: &Tag, seq: u64) -> Event {
    let time = EventTime::new(BASE_TIME + u32::try_from(seq % 1000).unwrap_or(0), 500)
        .unwrap_or_else(|| EventTime::from_seconds(BASE_TIME));
    let record = Record::new(vec![
        ("seq".to_owned(), Value::from(seq)),
        ("message".to_owned(), Value::from(format!("event {seq}"))),
    ]);
    Event::new(tag.clone(), time, record)
}

/// A batch of events `first..first + count` for `tag`.
#[must_use]
pub fn sample_batch(tag: &str, first: u64, count: u64, chunk: Option<&str>) -> EventBatch {
    let tag = Tag::from(tag);
    let events = (first..first + count).map(|seq| sample_event(&tag, seq)).collect();
    EventBatch::new(tag, events, chunk.map(ChunkId::from))
}

/// Sequence numbers carried by `batches`, in order.
#[must_use]
pub fn sequence_numbers(batches: &[EventBatch]) -> Vec<u64> {
    batches
        .iter()
        .flat_map(EventBatch::events)
        .filter_map(|event| event.record().get("seq").and_then(Value::as_u64))
        .collect()
}
