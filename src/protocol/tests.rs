//! Decoding tests for every Forward payload mode.

use std::io::Write;

use bytes::BytesMut;
use flate2::{Compression as GzLevel, write::GzEncoder};
use rmpv::{Value, encode::write_value};
use rstest::rstest;

use super::*;
use crate::{
    codec::ProtocolError,
    event::{ChunkId, Event, EventBatch, EventTime},
};

const LIMIT: usize = 1024 * 1024;

fn to_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, value).expect("encode test value");
    buf
}

fn record(pairs: &[(&str, i64)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(k, v)| (Value::from(*k), Value::from(*v)))
            .collect(),
    )
}

fn event_time(seconds: u32, nanos: u32) -> Value {
    let mut raw = seconds.to_be_bytes().to_vec();
    raw.extend_from_slice(&nanos.to_be_bytes());
    Value::Ext(0, raw)
}

fn option(pairs: Vec<(&str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).expect("compress");
    encoder.finish().expect("finish gzip")
}

fn packed_entries(count: u32) -> Vec<u8> {
    (0..count)
        .flat_map(|i| {
            to_bytes(&Value::Array(vec![
                Value::from(i),
                record(&[("n", i64::from(i))]),
            ]))
        })
        .collect()
}

fn seconds(batch: &EventBatch) -> Vec<u32> {
    batch.events().iter().map(|e| e.time().seconds()).collect()
}

#[test]
fn message_mode_yields_one_event() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app.log"),
        Value::from(1_700_000_000_u32),
        record(&[("k", 1)]),
    ]));
    let batch = decode_frame(&frame, LIMIT).expect("decode message");
    assert_eq!(batch.tag(), "app.log");
    assert_eq!(batch.len(), 1);
    let event = &batch.events()[0];
    assert_eq!(event.tag(), "app.log");
    assert_eq!(event.time(), EventTime::from_seconds(1_700_000_000));
    assert_eq!(event.record().get("k"), Some(&Value::from(1)));
    assert!(batch.chunk_id().is_none());
}

#[test]
fn message_mode_accepts_event_time_extension() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("t"),
        event_time(5, 123),
        record(&[]),
    ]));
    let batch = decode_frame(&frame, LIMIT).expect("decode message");
    assert_eq!(batch.events()[0].time(), EventTime::new(5, 123).expect("time"));
}

#[test]
fn forward_mode_preserves_entry_order() {
    let entries = (1..=3)
        .map(|i| Value::Array(vec![Value::from(i), record(&[("i", i64::from(i))])]))
        .collect();
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app"),
        Value::Array(entries),
        option(vec![("chunk", Value::from("c1"))]),
    ]));
    let batch = decode_frame(&frame, LIMIT).expect("decode forward");
    assert_eq!(seconds(&batch), [1, 2, 3]);
    assert_eq!(batch.chunk_id(), Some(&ChunkId::from("c1")));
}

#[test]
fn forward_mode_accepts_empty_entry_list() {
    let frame = to_bytes(&Value::Array(vec![Value::from("app"), Value::Array(vec![])]));
    let batch = decode_frame(&frame, LIMIT).expect("decode forward");
    assert!(batch.is_empty());
}

#[rstest]
#[case::binary(Value::Binary(packed_entries(4)))]
#[case::string(Value::String(
    String::from_utf8(packed_entries(4)).expect("small entries are ascii").into()
))]
fn packed_forward_mode_decodes_concatenated_entries(#[case] payload: Value) {
    let frame = to_bytes(&Value::Array(vec![Value::from("app"), payload]));
    let batch = decode_frame(&frame, LIMIT).expect("decode packed");
    assert_eq!(seconds(&batch), [0, 1, 2, 3]);
}

#[test]
fn packed_forward_mode_accepts_text_compression() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app"),
        Value::Binary(packed_entries(2)),
        option(vec![("compressed", Value::from("text"))]),
    ]));
    assert_eq!(decode_frame(&frame, LIMIT).expect("decode").len(), 2);
}

#[test]
fn compressed_mode_inflates_before_decoding() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app"),
        Value::Binary(gzip(&packed_entries(3))),
        option(vec![
            ("compressed", Value::from("gzip")),
            ("chunk", Value::from("z1")),
        ]),
    ]));
    let batch = decode_frame(&frame, LIMIT).expect("decode compressed");
    assert_eq!(seconds(&batch), [0, 1, 2]);
    assert_eq!(batch.chunk_id(), Some(&ChunkId::from("z1")));
}

#[test]
fn compressed_mode_reads_concatenated_gzip_members() {
    let all = packed_entries(4);
    let (front, back) = all.split_at(to_bytes(&Value::Array(vec![
        Value::from(0),
        record(&[("n", 0)]),
    ]))
    .len());
    let mut payload = gzip(front);
    payload.extend(gzip(back));
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app"),
        Value::Binary(payload),
        option(vec![("compressed", Value::from("gzip"))]),
    ]));
    assert_eq!(seconds(&decode_frame(&frame, LIMIT).expect("decode")), [0, 1, 2, 3]);
}

#[test]
fn compressed_mode_enforces_inflated_limit() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app"),
        Value::Binary(gzip(&packed_entries(200))),
        option(vec![("compressed", Value::from("gzip"))]),
    ]));
    assert_eq!(
        decode_frame(&frame, 128),
        Err(ProtocolError::DecompressedTooLarge { max: 128 })
    );
}

#[test]
fn compressed_mode_rejects_corrupt_stream() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("app"),
        Value::Binary(vec![0x1f, 0x8b, 0x00, 0x01, 0x02]),
        option(vec![("compressed", Value::from("gzip"))]),
    ]));
    assert!(decode_frame(&frame, LIMIT).is_err());
}

#[rstest]
#[case::empty(Value::Array(vec![]), ProtocolError::MissingTag)]
#[case::numeric_tag(Value::Array(vec![Value::from(1), Value::Array(vec![])]), ProtocolError::InvalidTag)]
#[case::tag_only(Value::Array(vec![Value::from("t")]), ProtocolError::MissingPayload)]
#[case::missing_record(
    Value::Array(vec![Value::from("t"), Value::from(1)]),
    ProtocolError::MissingRecord
)]
#[case::map_payload(
    Value::Array(vec![Value::from("t"), record(&[])]),
    ProtocolError::UnsupportedPayload { found: "map" }
)]
#[case::negative_time(
    Value::Array(vec![Value::from("t"), Value::from(-1), record(&[])]),
    ProtocolError::InvalidTime
)]
#[case::time_beyond_u32(
    Value::Array(vec![Value::from("t"), Value::from(u64::from(u32::MAX) + 1), record(&[])]),
    ProtocolError::InvalidTime
)]
#[case::short_extension(
    Value::Array(vec![Value::from("t"), Value::Ext(0, vec![0; 4]), record(&[])]),
    ProtocolError::InvalidTime
)]
#[case::wrong_extension_type(
    Value::Array(vec![Value::from("t"), Value::Ext(1, vec![0; 8]), record(&[])]),
    ProtocolError::InvalidTime
)]
#[case::nanos_overflow(
    Value::Array(vec![Value::from("t"), event_time(1, 1_000_000_000), record(&[])]),
    ProtocolError::InvalidTime
)]
#[case::record_not_map(
    Value::Array(vec![Value::from("t"), Value::from(1), Value::from("x")]),
    ProtocolError::InvalidRecord
)]
#[case::record_key_not_string(
    Value::Array(vec![
        Value::from("t"),
        Value::from(1),
        Value::Map(vec![(Value::from(1), Value::from(2))]),
    ]),
    ProtocolError::InvalidRecordKey
)]
#[case::entry_not_pair(
    Value::Array(vec![Value::from("t"), Value::Array(vec![Value::Array(vec![Value::from(1)])])]),
    ProtocolError::InvalidEntry
)]
#[case::trailing(
    Value::Array(vec![Value::from("t"), Value::from(1), record(&[]), Value::Nil, Value::from(9)]),
    ProtocolError::TrailingElements { count: 1 }
)]
#[case::unknown_compression(
    Value::Array(vec![
        Value::from("t"),
        Value::Binary(vec![]),
        option(vec![("compressed", Value::from("lz4"))]),
    ]),
    ProtocolError::UnsupportedCompression("lz4".into())
)]
fn rejects_malformed_frames(#[case] frame: Value, #[case] expected: ProtocolError) {
    assert_eq!(decode_frame(&to_bytes(&frame), LIMIT), Err(expected));
}

#[test]
fn one_bad_entry_rejects_the_whole_frame() {
    let entries = vec![
        Value::Array(vec![Value::from(1), record(&[])]),
        Value::Array(vec![Value::from("bad"), record(&[])]),
    ];
    let frame = to_bytes(&Value::Array(vec![Value::from("t"), Value::Array(entries)]));
    assert_eq!(decode_frame(&frame, LIMIT), Err(ProtocolError::InvalidTime));
}

#[test]
fn nil_option_is_treated_as_absent() {
    let frame = to_bytes(&Value::Array(vec![
        Value::from("t"),
        Value::from(1),
        record(&[]),
        Value::Nil,
    ]));
    assert!(decode_frame(&frame, LIMIT).expect("decode").chunk_id().is_none());
}

fn sample_batch(count: u32, chunk: Option<&str>) -> EventBatch {
    let tag: crate::event::Tag = "svc.access".into();
    let events = (0..count)
        .map(|i| {
            Event::new(
                tag.clone(),
                EventTime::new(1_700_000_000 + i, i * 1000).expect("time"),
                [("seq", Value::from(i)), ("msg", Value::from("hello"))]
                    .into_iter()
                    .collect(),
            )
        })
        .collect();
    EventBatch::new(tag, events, chunk.map(ChunkId::from))
}

#[rstest]
#[case::forward(ForwardMode::Forward)]
#[case::packed(ForwardMode::PackedForward)]
#[case::compressed(ForwardMode::CompressedPackedForward)]
fn encoded_batches_decode_to_the_same_events(#[case] mode: ForwardMode) {
    let batch = sample_batch(5, Some("chunk-7"));
    let mut buf = BytesMut::new();
    encode_batch(&batch, mode, &mut buf).expect("encode");
    assert_eq!(decode_frame(&buf, LIMIT).expect("decode"), batch);
}

#[test]
fn message_mode_encoding_requires_a_single_event() {
    let mut buf = BytesMut::new();
    let err = encode_batch(&sample_batch(2, None), ForwardMode::Message, &mut buf)
        .expect_err("two events cannot form a message");
    assert!(matches!(err, EncodeError::MessageArity { count: 2 }));

    encode_batch(&sample_batch(1, None), ForwardMode::Message, &mut buf).expect("encode");
    assert_eq!(decode_frame(&buf, LIMIT).expect("decode").len(), 1);
}
