//! Bounded FIFO of dispatched jobs awaiting an executor slot.
//!
//! Enqueue on a full queue fails fast with [`DispatchRejected`] instead of
//! growing unbounded; the coordinator treats that as backpressure and defers
//! the session to its next natural tick.

use thiserror::Error;

use super::job::Job;

/// Backpressure signal from a full (or shut down) queue.
#[derive(Debug, Error)]
pub enum DispatchRejected {
    #[error("job queue full (capacity {capacity})")]
    Full { capacity: usize, job: Job },
    #[error("job queue disconnected")]
    Disconnected { job: Job },
}

impl DispatchRejected {
    /// The job that was not accepted, for re-dispatch bookkeeping.
    pub fn job(&self) -> &Job {
        match self {
            Self::Full { job, .. } | Self::Disconnected { job } => job,
        }
    }
}

/// Bounded MPMC job queue; executors share clones of the receiver.
pub struct JobQueue {
    tx: flume::Sender<Job>,
    rx: flume::Receiver<Job>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue without waiting; a full queue rejects immediately.
    pub fn dispatch(&self, job: Job) -> Result<(), DispatchRejected> {
        self.tx.try_send(job).map_err(|err| match err {
            flume::TrySendError::Full(job) => DispatchRejected::Full {
                capacity: self.capacity,
                job,
            },
            flume::TrySendError::Disconnected(job) => DispatchRejected::Disconnected { job },
        })
    }

    /// Receiver handle for one executor; each job goes to exactly one
    /// receiver.
    pub fn receiver(&self) -> flume::Receiver<Job> {
        self.rx.clone()
    }

    /// Jobs currently waiting for an executor.
    pub fn depth(&self) -> usize {
        self.tx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
