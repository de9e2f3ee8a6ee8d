#![doc(html_root_url = "https://docs.rs/forwardline/latest")]
//! Public API for the `forwardline` library.
//!
//! This crate receives Fluentd Forward protocol traffic over plain TCP or
//! TLS. Sockets are driven by single-threaded event loops; decoded batches
//! are handed to a pool of worker threads running a user callback, and ack
//! responses are written back once the callback has accepted a chunk.
//!
//! ```no_run
//! use forwardline::{ForwardCallback, ForwardServer, ServerConfig};
//!
//! # async fn run() -> Result<(), forwardline::ServerError> {
//! let server = ForwardServer::new(
//!     ServerConfig::default(),
//!     ForwardCallback::sync_consumer(|batch| {
//!         for event in batch.events() {
//!             println!("{} {}", event.tag(), event.time());
//!         }
//!         Ok(())
//!     }),
//! )?;
//! server.start()?;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod event;
pub mod panic;
pub mod protocol;
mod reactor;
pub mod server;
pub mod tls;

pub use ack::{AckHandle, AckToken, AckTokenFn};
pub use connection::{CloseReason, ConnectionId, SessionError};
pub use dispatch::{BoxError, DispatchError, ForwardCallback};
pub use event::{ChunkId, Event, EventBatch, EventTime, Record};
pub use protocol::{ForwardMode, ForwardOption};
pub use server::{ForwardServer, ServerConfig, ServerError, ServerState, ShutdownHandle};
pub use tls::{TlsConfig, TlsIdentity};
