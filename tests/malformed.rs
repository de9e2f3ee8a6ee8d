//! Protocol violations close only the offending connection.

use std::time::Duration;

use forwardline::{AckToken, ForwardMode, ServerConfig};
use forwardline_testing::{
    Collector,
    ForwardClient,
    LoggerHandle,
    WAIT,
    encode,
    logger,
    loopback_config,
    sample_batch,
    start_server,
    stop_server,
};
use log::Level;
use rmpv::Value;
use rstest::rstest;
use serial_test::serial;

fn to_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).expect("encode value");
    buf
}

fn entry(time: Value, record: Value) -> Value { Value::Array(vec![time, record]) }

fn record() -> Value { Value::Map(vec![(Value::from("k"), Value::from("v"))]) }

fn option(pairs: Vec<(&str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
}

#[rstest]
#[case::top_level_map(vec![0x81, 0xa1, b'a', 0x01])]
#[case::reserved_marker(vec![0x92, 0xa1, b't', 0xc1])]
#[case::tag_not_string(to_bytes(&Value::Array(vec![Value::from(7), Value::Array(vec![])])))]
#[case::missing_payload(to_bytes(&Value::Array(vec![Value::from("t")])))]
#[case::time_is_string(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::from("yesterday"),
    record(),
])))]
#[case::record_not_map(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::Array(vec![entry(Value::from(1), Value::from("not a map"))]),
])))]
#[case::record_key_not_string(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::Array(vec![entry(
        Value::from(1),
        Value::Map(vec![(Value::from(1), Value::from("v"))]),
    )]),
])))]
#[case::unknown_compression(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::Binary(vec![0x92, 0x01, 0x80]),
    option(vec![("compressed", Value::from("zstd"))]),
])))]
#[case::corrupt_gzip(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::Binary(vec![0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad]),
    option(vec![("compressed", Value::from("gzip"))]),
])))]
#[case::option_not_map(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::Array(vec![entry(Value::from(1), record())]),
    Value::from("chunk"),
])))]
#[case::extra_elements(to_bytes(&Value::Array(vec![
    Value::from("t"),
    Value::from(1),
    record(),
    Value::Nil,
    Value::from("surplus"),
])))]
fn violation_closes_the_connection(loopback_config: ServerConfig, #[case] frame: Vec<u8>) {
    let collector = Collector::new();
    let server = start_server(loopback_config, collector.callback());
    let mut client = ForwardClient::connect(server.local_addr()).expect("connect");

    client.send_raw(&frame).expect("send malformed frame");

    assert!(client.wait_closed(WAIT).expect("wait closed"));
    assert_eq!(collector.event_count(), 0);
    stop_server(&server);
}

#[rstest]
fn violation_does_not_affect_other_connections(loopback_config: ServerConfig) {
    let collector = Collector::new();
    let server = start_server(loopback_config, collector.callback());
    let mut healthy = ForwardClient::connect(server.local_addr()).expect("connect healthy");
    let mut broken = ForwardClient::connect(server.local_addr()).expect("connect broken");

    healthy
        .send(&sample_batch("healthy", 0, 1, Some("h1")), ForwardMode::Message)
        .expect("send h1");
    assert_eq!(healthy.read_ack().expect("ack h1"), AckToken::from("h1"));

    broken.send_raw(&[0x81, 0xa1, b'x', 0x00]).expect("send garbage");
    assert!(broken.wait_closed(WAIT).expect("wait closed"));

    healthy
        .send(&sample_batch("healthy", 1, 1, Some("h2")), ForwardMode::Message)
        .expect("send h2");
    assert_eq!(healthy.read_ack().expect("ack h2"), AckToken::from("h2"));

    let mut late = ForwardClient::connect(server.local_addr()).expect("connect late");
    late.send(&sample_batch("late", 0, 1, Some("l1")), ForwardMode::Forward)
        .expect("send l1");
    assert_eq!(late.read_ack().expect("ack l1"), AckToken::from("l1"));
    stop_server(&server);
}

#[rstest]
fn no_partial_batch_is_delivered(loopback_config: ServerConfig) {
    let collector = Collector::new();
    let server = start_server(loopback_config, collector.callback());
    let mut client = ForwardClient::connect(server.local_addr()).expect("connect");

    let frame = to_bytes(&Value::Array(vec![
        Value::from("partial"),
        Value::Array(vec![
            entry(Value::from(1), record()),
            entry(Value::from(2), record()),
            entry(Value::from("three"), record()),
        ]),
        option(vec![("chunk", Value::from("p1"))]),
    ]));
    client.send_raw(&frame).expect("send");

    assert!(client.wait_closed(WAIT).expect("wait closed"));
    assert_eq!(collector.event_count(), 0);
    stop_server(&server);
}

#[rstest]
fn oversized_frame_is_rejected(loopback_config: ServerConfig) {
    let config = ServerConfig {
        chunk_size_limit: 1024,
        ..loopback_config
    };
    let collector = Collector::new();
    let server = start_server(config, collector.callback());
    let mut client = ForwardClient::connect(server.local_addr()).expect("connect");

    let frame = encode(
        &sample_batch("big", 0, 200, Some("big")),
        ForwardMode::Forward,
    )
    .expect("encode");
    assert!(frame.len() > 1024);
    // The server may close while the frame is still being written.
    let _ = client.send_raw(&frame);

    assert!(client.wait_closed(WAIT).expect("wait closed"));
    assert_eq!(collector.event_count(), 0);
    stop_server(&server);
}

#[rstest]
fn oversized_inflated_stream_is_rejected(loopback_config: ServerConfig) {
    let config = ServerConfig {
        chunk_size_limit: 4096,
        ..loopback_config
    };
    let collector = Collector::new();
    let server = start_server(config, collector.callback());
    let mut client = ForwardClient::connect(server.local_addr()).expect("connect");

    // Identical events compress well: the frame fits, its inflated form does
    // not.
    let tag = forwardline::event::Tag::from("bomb");
    let event = forwardline_testing::sample_event(&tag, 1);
    let batch = forwardline::EventBatch::new(tag, vec![event; 500], Some("bomb".into()));
    let frame = encode(&batch, ForwardMode::CompressedPackedForward).expect("encode");
    assert!(frame.len() < 4096);
    client.send_raw(&frame).expect("send");

    assert!(client.wait_closed(WAIT).expect("wait closed"));
    assert_eq!(collector.event_count(), 0);
    stop_server(&server);
}

#[rstest]
#[serial]
fn violations_are_logged(loopback_config: ServerConfig, mut logger: LoggerHandle) {
    logger.clear();
    let collector = Collector::new();
    let server = start_server(loopback_config, collector.callback());
    let mut client = ForwardClient::connect(server.local_addr()).expect("connect");

    client.send_raw(&[0x81, 0xa1, b'x', 0x00]).expect("send garbage");
    assert!(client.wait_closed(WAIT).expect("wait closed"));
    stop_server(&server);

    assert!(logger.drain_contains(Level::Warn, &["connection closed", "violation=true"]));
}

#[rstest]
#[serial]
fn truncated_frame_at_eof_is_discarded(loopback_config: ServerConfig, mut logger: LoggerHandle) {
    logger.clear();
    let collector = Collector::new();
    let server = start_server(loopback_config, collector.callback());
    let mut client = ForwardClient::connect(server.local_addr()).expect("connect");

    let frame = encode(&sample_batch("cut", 0, 3, Some("cut")), ForwardMode::Forward)
        .expect("encode");
    client.send_raw(&frame[..frame.len() / 2]).expect("send half");
    client.finish().expect("half close");

    assert!(client.wait_closed(WAIT).expect("wait closed"));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(collector.event_count(), 0);
    stop_server(&server);

    assert!(logger.drain_contains(Level::Warn, &["discarding truncated frame"]));
}
