//! Utilities for exercising a `forwardline` server over real sockets in
//! tests.
//!
//! ```rust,no_run
//! use forwardline::ForwardMode;
//! use forwardline_testing::{
//!     Collector,
//!     ForwardClient,
//!     WAIT,
//!     loopback_config,
//!     sample_batch,
//!     start_server,
//!     stop_server,
//! };
//!
//! let collector = Collector::new();
//! let server = start_server(loopback_config(), collector.callback());
//! let mut client = ForwardClient::connect(server.local_addr()).unwrap();
//! client
//!     .send(&sample_batch("app.log", 0, 3, Some("c1")), ForwardMode::Forward)
//!     .unwrap();
//! assert_eq!(client.read_ack().unwrap().as_bytes(), b"c1");
//! assert_eq!(collector.wait_for_events(3, WAIT).len(), 1);
//! stop_server(&server);
//! ```

mod batches;
mod client;
mod collector;
mod logging;
mod server;
mod tls;

pub use batches::{BASE_TIME, sample_batch, sample_event, sequence_numbers};
pub use client::{CLIENT_TIMEOUT, ForwardClient, encode};
pub use collector::Collector;
pub use logging::{LoggerHandle, logger};
pub use server::{WAIT, loopback_config, start_server, stop_server};
pub use tls::{PemFiles, TestIdentity};
