//! Per-connection ordering under concurrent load.

use std::thread;

use forwardline::{AckToken, ForwardMode, ServerConfig};
use forwardline_testing::{
    Collector,
    ForwardClient,
    WAIT,
    loopback_config,
    sample_batch,
    sequence_numbers,
    start_server,
    stop_server,
};
use rstest::rstest;

const CONNECTIONS: u64 = 10;
const EVENTS_PER_CONNECTION: u64 = 100;
const EVENTS_PER_FRAME: u64 = 5;

#[rstest]
#[case::single_loop(1)]
#[case::several_loops(3)]
fn events_keep_connection_order(loopback_config: ServerConfig, #[case] event_loops: usize) {
    let config = ServerConfig {
        workers: 4,
        event_loops,
        ..loopback_config
    };
    let collector = Collector::new();
    let server = start_server(config, collector.callback());
    let addr = server.local_addr();

    let senders: Vec<_> = (0..CONNECTIONS)
        .map(|conn| {
            thread::spawn(move || {
                let tag = format!("conn.{conn}");
                let mut client = ForwardClient::connect(addr).expect("connect");
                let frames = EVENTS_PER_CONNECTION / EVENTS_PER_FRAME;
                for frame in 0..frames {
                    let first = frame * EVENTS_PER_FRAME;
                    let last = frame + 1 == frames;
                    let chunk = last.then(|| format!("{tag}-done"));
                    let batch = sample_batch(&tag, first, EVENTS_PER_FRAME, chunk.as_deref());
                    let mode = match frame % 3 {
                        0 => ForwardMode::Forward,
                        1 => ForwardMode::PackedForward,
                        _ => ForwardMode::CompressedPackedForward,
                    };
                    client.send(&batch, mode).expect("send");
                }
                let ack = client.read_ack().expect("final ack");
                assert_eq!(ack, AckToken::from(format!("{tag}-done").as_str()));
            })
        })
        .collect();
    for sender in senders {
        sender.join().expect("sender thread");
    }

    let total = usize::try_from(CONNECTIONS * EVENTS_PER_CONNECTION).expect("total");
    let batches = collector.wait_for_events(total, WAIT);
    assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), total);
    let expected: Vec<u64> = (0..EVENTS_PER_CONNECTION).collect();
    for conn in 0..CONNECTIONS {
        let tag = format!("conn.{conn}");
        assert_eq!(
            sequence_numbers(&collector.batches_for(&tag)),
            expected,
            "order broken for {tag}"
        );
    }
    stop_server(&server);
}
