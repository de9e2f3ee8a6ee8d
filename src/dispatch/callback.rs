//! The caller-facing callback contract.

use std::{error::Error, fmt, sync::Arc};

use crate::{ack::AckHandle, event::EventBatch};

/// Error type returned by synchronous consumers.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

type SyncConsumer = dyn Fn(EventBatch) -> Result<(), BoxError> + Send + Sync;
type AckAwareConsumer = dyn Fn(EventBatch, AckHandle) + Send + Sync;

/// Logic invoked with each decoded [`EventBatch`] on the worker pool.
///
/// Two flavours exist. A *sync consumer* finishes with the batch before it
/// returns; returning `Ok` acknowledges the chunk, if one was requested. An
/// *ack-aware* consumer receives an [`AckHandle`] it may move elsewhere, for
/// example into a buffer that is flushed later, and acknowledges by calling
/// [`AckHandle::ack`].
///
/// Callbacks must not assume they run on any particular thread.
///
/// # Examples
///
/// ```
/// use forwardline::dispatch::ForwardCallback;
///
/// let callback = ForwardCallback::sync_consumer(|batch| {
///     for event in batch.events() {
///         println!("{} {}", event.tag(), event.time());
///     }
///     Ok(())
/// });
/// # drop(callback);
/// ```
#[derive(Clone)]
pub enum ForwardCallback {
    /// Acknowledged when the function returns `Ok`.
    Sync(Arc<SyncConsumer>),
    /// Acknowledged through the supplied handle.
    AckAware(Arc<AckAwareConsumer>),
}

impl ForwardCallback {
    /// Wrap a consumer that acknowledges by returning `Ok`.
    pub fn sync_consumer<F>(f: F) -> Self
    where
        F: Fn(EventBatch) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a consumer that acknowledges through an [`AckHandle`].
    pub fn ack_aware<F>(f: F) -> Self
    where
        F: Fn(EventBatch, AckHandle) + Send + Sync + 'static,
    {
        Self::AckAware(Arc::new(f))
    }

    /// Run the callback. An error drops `ack`, abandoning the chunk.
    pub(crate) fn invoke(&self, batch: EventBatch, ack: AckHandle) -> Result<(), BoxError> {
        match self {
            Self::Sync(f) => {
                f(batch)?;
                ack.ack();
                Ok(())
            }
            Self::AckAware(f) => {
                f(batch, ack);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ForwardCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("ForwardCallback::Sync(..)"),
            Self::AckAware(_) => f.write_str("ForwardCallback::AckAware(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::ack::AckCompletion;

    fn batch() -> EventBatch { EventBatch::new("t".into(), Vec::new(), None) }

    #[test]
    fn sync_success_acknowledges() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback = ForwardCallback::sync_consumer(|_| Ok(()));
        callback
            .invoke(batch(), AckHandle::new(tx, 3))
            .expect("callback succeeds");
        assert_eq!(rx.try_recv(), Ok(AckCompletion::Acked(3)));
    }

    #[test]
    fn sync_failure_abandons() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback = ForwardCallback::sync_consumer(|_| Err("disk full".into()));
        let err = callback
            .invoke(batch(), AckHandle::new(tx, 4))
            .expect_err("callback fails");
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(rx.try_recv(), Ok(AckCompletion::Abandoned(4)));
    }

    #[test]
    fn ack_aware_consumer_controls_the_ack() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (keep_tx, keep_rx) = std::sync::mpsc::channel();
        let callback = ForwardCallback::ack_aware(move |_, ack| {
            keep_tx.send(ack).expect("park handle");
        });
        callback
            .invoke(batch(), AckHandle::new(tx, 5))
            .expect("callback succeeds");
        assert!(rx.try_recv().is_err());
        keep_rx.recv().expect("parked handle").ack();
        assert_eq!(rx.try_recv(), Ok(AckCompletion::Acked(5)));
    }
}
