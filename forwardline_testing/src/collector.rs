//! Callbacks that record delivered batches.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use forwardline::{EventBatch, ForwardCallback};

#[derive(Default)]
struct Shared {
    batches: Mutex<Vec<EventBatch>>,
    changed: Condvar,
}

/// Collects every batch handed to its callback.
#[derive(Clone, Default)]
pub struct Collector {
    shared: Arc<Shared>,
}

impl Collector {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A sync consumer that records the batch and acknowledges it.
    #[must_use]
    pub fn callback(&self) -> ForwardCallback {
        let collector = self.clone();
        ForwardCallback::sync_consumer(move |batch| {
            collector.push(batch);
            Ok(())
        })
    }

    /// Record `batch` and wake waiters.
    pub fn push(&self, batch: EventBatch) {
        self.lock().push(batch);
        self.shared.changed.notify_all();
    }

    /// Every batch recorded so far, in delivery order.
    #[must_use]
    pub fn batches(&self) -> Vec<EventBatch> { self.lock().clone() }

    /// Total events recorded so far.
    #[must_use]
    pub fn event_count(&self) -> usize { self.lock().iter().map(EventBatch::len).sum() }

    /// Block until at least `events` events were recorded or `timeout`
    /// elapses, then return the recorded batches.
    #[must_use]
    pub fn wait_for_events(&self, events: usize, timeout: Duration) -> Vec<EventBatch> {
        let deadline = Instant::now() + timeout;
        let mut batches = self.lock();
        loop {
            if batches.iter().map(EventBatch::len).sum::<usize>() >= events {
                break;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            batches = self
                .shared
                .changed
                .wait_timeout(batches, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        batches.clone()
    }

    /// Batches recorded for `tag`.
    #[must_use]
    pub fn batches_for(&self, tag: &str) -> Vec<EventBatch> {
        self.lock()
            .iter()
            .filter(|b| b.tag() == tag)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EventBatch>> {
        self.shared
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
