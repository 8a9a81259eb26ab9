use async_channel::{Receiver, Sender, TrySendError};

use crate::scheduler::job::{Job, JobRecord};

/// Default number of due jobs that may wait for a worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Why [`DispatchQueue::try_enqueue`] refused a job. Either way the job is
/// handed back.
#[derive(Debug)]
pub enum EnqueueError {
    Full(Job),
    Closed(Job),
}

impl EnqueueError {
    pub fn into_job(self) -> Job {
        match self {
            EnqueueError::Full(job) | EnqueueError::Closed(job) => job,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, EnqueueError::Closed(_))
    }
}

/// Bounded FIFO of due jobs awaiting a worker.
///
/// Producers never block: [`try_enqueue`](Self::try_enqueue) hands the job
/// back when the queue is full. Any number of worker sessions may wait on
/// [`dequeue`](Self::dequeue); each job is delivered to exactly one of them.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Enqueue without waiting. Hands the job back if the queue is full or
    /// has been closed.
    pub fn try_enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => EnqueueError::Full(job),
            TrySendError::Closed(job) => EnqueueError::Closed(job),
        })
    }

    /// Offer a record's job to the queue and, on success, record the
    /// dispatch on the record itself. Returns whether the job was enqueued.
    pub fn offer(&self, record: &mut JobRecord) -> bool {
        if self.try_enqueue(record.job.clone()).is_err() {
            return false;
        }
        record.mark_dispatched();
        true
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    ///
    /// Cancel-safe: dropping the future before it completes never loses a job.
    pub async fn dequeue(&self) -> Option<Job> {
        self.rx.recv().await.ok()
    }

    /// Take the next job if one is waiting.
    pub fn try_dequeue(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting jobs and wake every waiting consumer.
    pub fn close(&self) {
        self.tx.close();
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    /// Remove and return everything currently queued, in FIFO order.
    pub fn drain(&self) -> Vec<Job> {
        std::iter::from_fn(|| self.try_dequeue()).collect()
    }
}
