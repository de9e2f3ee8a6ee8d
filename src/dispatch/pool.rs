//! Worker threads and the per-connection queues they serve.
//!
//! Each connection owns a bounded FIFO (its *lane*). A lane with queued work
//! is scheduled onto a shared ready queue; any idle worker takes it, runs its
//! oldest batch and schedules it again if more work is waiting. A lane is
//! never scheduled twice, so at most one batch per connection is in flight.

use std::{
    collections::VecDeque,
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use super::{DispatchError, ForwardCallback};
use crate::{ack::AckHandle, connection::ConnectionId, event::EventBatch, panic::report_panic};

/// One unit of callback work.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) connection: ConnectionId,
    pub(crate) batch: EventBatch,
    pub(crate) ack: AckHandle,
}

#[derive(Debug, Default)]
struct LaneState {
    jobs: VecDeque<Job>,
    /// Sitting in the ready queue or held by a worker.
    scheduled: bool,
}

#[derive(Debug)]
struct LaneInner {
    connection: ConnectionId,
    capacity: usize,
    state: Mutex<LaneState>,
}

/// Ready queue shared by lanes and workers. `None` once shut down.
type Ready = Arc<Mutex<Option<Sender<Arc<LaneInner>>>>>;

/// Submission side of one connection's queue, held by its session.
#[derive(Debug)]
pub(crate) struct DispatchLane {
    inner: Arc<LaneInner>,
    ready: Ready,
}

impl DispatchLane {
    /// Queue a job without blocking.
    pub(crate) fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let mut state = lock(&self.inner.state);
        if state.jobs.len() >= self.inner.capacity {
            return Err(DispatchError::Saturated {
                connection: self.inner.connection,
                capacity: self.inner.capacity,
            });
        }
        if state.scheduled {
            state.jobs.push_back(job);
            return Ok(());
        }
        let ready = lock(&self.ready);
        let Some(tx) = ready.as_ref() else {
            return Err(DispatchError::Closed);
        };
        state.jobs.push_back(job);
        state.scheduled = true;
        if tx.send(Arc::clone(&self.inner)).is_err() {
            state.jobs.pop_back();
            state.scheduled = false;
            return Err(DispatchError::Closed);
        }
        Ok(())
    }
}

/// Fixed pool of callback worker threads.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    ready: Ready,
    capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `workers` threads; every lane buffers up to `capacity` jobs.
    pub(crate) fn start(
        workers: usize,
        capacity: usize,
        callback: &ForwardCallback,
    ) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatcher = Self {
            ready: Arc::new(Mutex::new(Some(tx))),
            capacity,
            workers: Mutex::new(Vec::with_capacity(workers)),
        };
        for index in 0..workers {
            let worker = Worker {
                index,
                rx: rx.clone(),
                ready: Arc::clone(&dispatcher.ready),
                callback: callback.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("forward-worker-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => lock(&dispatcher.workers).push(handle),
                Err(e) => {
                    dispatcher.shutdown();
                    return Err(e);
                }
            }
        }
        debug!("dispatcher started: workers={workers}, capacity={capacity}");
        Ok(dispatcher)
    }

    /// Open the queue serving `connection`.
    pub(crate) fn lane(&self, connection: ConnectionId) -> Result<DispatchLane, DispatchError> {
        if lock(&self.ready).is_none() {
            return Err(DispatchError::Closed);
        }
        Ok(DispatchLane {
            inner: Arc::new(LaneInner {
                connection,
                capacity: self.capacity,
                state: Mutex::new(LaneState::default()),
            }),
            ready: Arc::clone(&self.ready),
        })
    }

    /// Refuse new work, run every queued job and wait for the workers.
    pub(crate) fn shutdown(&self) {
        lock(&self.ready).take();
        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            let name = worker.thread().name().unwrap_or("forward-worker").to_owned();
            if worker.join().is_err() {
                warn!("dispatch worker exited abnormally: worker={name}");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    index: usize,
    rx: Receiver<Arc<LaneInner>>,
    ready: Ready,
    callback: ForwardCallback,
}

impl Worker {
    /// Serve scheduled lanes until the dispatcher shuts down and the ready
    /// queue is empty.
    fn run(self) {
        while let Ok(lane) = self.rx.recv() {
            self.serve(&lane);
        }
        debug!("dispatch worker stopped: worker={}", self.index);
    }

    /// Run the lane's oldest job, then hand the lane back to the pool if it
    /// has more. After shutdown the remaining jobs run here.
    fn serve(&self, lane: &Arc<LaneInner>) {
        loop {
            let next = lock(&lane.state).jobs.pop_front();
            let Some(job) = next else {
                lock(&lane.state).scheduled = false;
                return;
            };
            execute(&self.callback, job);

            let mut state = lock(&lane.state);
            if state.jobs.is_empty() {
                state.scheduled = false;
                return;
            }
            let ready = lock(&self.ready);
            if let Some(tx) = ready.as_ref()
                && tx.send(Arc::clone(lane)).is_ok()
            {
                return;
            }
        }
    }
}

fn execute(callback: &ForwardCallback, job: Job) {
    let Job {
        connection,
        batch,
        ack,
    } = job;
    let events = batch.len();
    match catch_unwind(AssertUnwindSafe(|| callback.invoke(batch, ack))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("callback failed: connection={connection}, events={events}, error={e}");
        }
        Err(panic) => report_panic("callback", &connection, panic),
    }
}
