//! Hand-off of decoded batches from event loops to user callbacks.
//!
//! Callbacks run on a fixed pool of worker threads, never on an event loop.
//! Every connection submits into its own bounded queue (a *lane*). Workers
//! run one batch per lane at a time, so the callback observes a connection's
//! batches in arrival order while different connections run concurrently and
//! a slow batch holds up only its own connection.

mod callback;
mod pool;

pub use callback::{BoxError, ForwardCallback};
pub(crate) use pool::{DispatchLane, Dispatcher, Job};
use thiserror::Error;

use crate::connection::ConnectionId;

/// Reasons a batch could not be handed to the worker pool.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The connection already has `capacity` batches waiting.
    #[error("dispatch queue of connection {connection} is saturated: capacity={capacity}")]
    Saturated {
        /// Connection whose queue is full.
        connection: ConnectionId,
        /// Batches the queue holds.
        capacity: usize,
    },

    /// The worker pool has shut down.
    #[error("dispatcher is closed")]
    Closed,
}
