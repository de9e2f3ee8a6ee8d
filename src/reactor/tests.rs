//! Tests for the event loop.

use std::{
    io,
    net::{Ipv4Addr, UdpSocket as StdUdpSocket},
    time::Duration,
};

use rstest::{fixture, rstest};

use super::*;

struct Running {
    handle: EventLoopHandle,
    thread: JoinHandle<()>,
}

impl Running {
    fn shutdown(self) {
        self.handle.stop();
        self.thread.join().expect("event loop thread panicked");
    }
}

#[fixture]
fn event_loop() -> Running {
    let (event_loop, handle) = EventLoop::new(7).expect("build event loop");
    let thread = event_loop.spawn().expect("spawn event loop");
    Running { handle, thread }
}

fn register_heartbeat(handle: &EventLoopHandle) -> std::net::SocketAddr {
    let socket = StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind heartbeat");
    let addr = socket.local_addr().expect("heartbeat addr");
    handle
        .register(move || Heartbeat::open(socket).map(Attachment::Heartbeat))
        .expect("register heartbeat");
    addr
}

fn probe(addr: std::net::SocketAddr) -> io::Result<Vec<u8>> {
    let client = StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
    client.set_read_timeout(Some(Duration::from_millis(200)))?;
    let mut buf = [0u8; 8];
    for _ in 0..25 {
        client.send_to(b"ping", addr)?;
        match client.recv_from(&mut buf) {
            Ok((n, _)) => return Ok(buf[..n].to_vec()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::from(io::ErrorKind::TimedOut))
}

#[rstest]
fn runs_registered_attachments(event_loop: Running) {
    let addr = register_heartbeat(&event_loop.handle);
    assert_eq!(probe(addr).expect("heartbeat reply"), vec![0x00]);
    event_loop.shutdown();
}

#[rstest]
fn panicking_registration_does_not_stop_the_loop(event_loop: Running) {
    event_loop
        .handle
        .register(|| -> io::Result<Attachment> { panic!("registration boom") })
        .expect("queue panicking registration");
    let addr = register_heartbeat(&event_loop.handle);
    assert_eq!(probe(addr).expect("heartbeat reply"), vec![0x00]);
    event_loop.shutdown();
}

#[rstest]
fn failed_registration_is_skipped(event_loop: Running) {
    event_loop
        .handle
        .register(|| Err(io::Error::other("socket vanished")))
        .expect("queue failing registration");
    let addr = register_heartbeat(&event_loop.handle);
    assert_eq!(probe(addr).expect("heartbeat reply"), vec![0x00]);
    event_loop.shutdown();
}

#[rstest]
fn stop_closes_attachments(event_loop: Running) {
    let addr = register_heartbeat(&event_loop.handle);
    assert!(probe(addr).is_ok());
    event_loop.shutdown();
    // The socket is released once the loop exits.
    StdUdpSocket::bind(addr).expect("heartbeat port should be free again");
}

#[rstest]
fn register_fails_after_exit(event_loop: Running) {
    let handle = event_loop.handle.clone();
    event_loop.shutdown();
    assert!(handle.is_stopped());
    let err = handle
        .register(|| Err(io::Error::other("unused")))
        .expect_err("stopped loop accepted a registration");
    assert!(err.to_string().contains("event loop 7 has stopped"));
}

#[test]
fn register_fails_once_stop_is_requested() {
    let (event_loop, handle) = EventLoop::new(3).expect("build event loop");
    handle.stop();
    let err = handle
        .register(|| Err(io::Error::other("unused")))
        .expect_err("stopping loop accepted a registration");
    assert!(err.to_string().contains("event loop 3 has stopped"));
    event_loop.run();
}

#[test]
fn stop_is_idempotent() {
    let (event_loop, handle) = EventLoop::new(0).expect("build event loop");
    handle.stop();
    handle.stop();
    // Stopped before running: `run` returns immediately.
    event_loop.run();
    assert!(handle.is_stopped());
    assert_eq!(handle.id(), 0);
}
