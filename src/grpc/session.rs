//! Per-connection loop that feeds a worker's job stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::grpc::convert::job_to_proto;
use crate::proto;
use crate::scheduler::{DispatchQueue, EnqueueError, Job, JobStatus, JobTable};

/// Output recorded on a job that could neither be delivered nor requeued.
pub const DROPPED_OUTPUT: &str = "dispatch failed: worker disconnected and the dispatch queue was full";

/// Outbound half of a worker connection.
#[tonic::async_trait]
pub trait JobSink: Send + Sync {
    /// Deliver `job` to the worker. On failure the job is handed back.
    async fn push(&mut self, job: Job) -> Result<(), Job>;

    /// Resolves once the worker has gone away.
    async fn closed(&self);
}

/// [`JobSink`] over the channel that backs a tonic server stream.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<proto::Job, Status>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<proto::Job, Status>>) -> Self {
        Self { tx }
    }
}

#[tonic::async_trait]
impl JobSink for ChannelSink {
    async fn push(&mut self, job: Job) -> Result<(), Job> {
        match self.tx.send(Ok(job_to_proto(&job))).await {
            Ok(()) => Ok(()),
            Err(_) => Err(job),
        }
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Why a worker session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The worker went away. `requeued` counts delivered jobs that were
    /// still `RUNNING` and went back on the dispatch queue.
    Disconnected { requeued: usize },
    /// The coordinator is shutting down.
    Shutdown,
    /// The dispatch queue was closed.
    QueueClosed,
    /// Delivering `job_id` failed. `requeued` tells whether it went back on
    /// the dispatch queue.
    SendFailed { job_id: String, requeued: bool },
}

pub struct WorkerSession<S> {
    worker_id: String,
    capacity: u32,
    queue: DispatchQueue,
    table: Arc<JobTable>,
    sink: S,
    /// Jobs pushed to the worker with no completion seen yet.
    in_flight: Vec<Job>,
}

impl<S: JobSink> WorkerSession<S> {
    pub fn new(
        worker_id: impl Into<String>,
        capacity: u32,
        queue: DispatchQueue,
        table: Arc<JobTable>,
        sink: S,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            capacity,
            queue,
            table,
            sink,
            in_flight: Vec::new(),
        }
    }

    /// Pop jobs and push them to the worker until it disconnects, a push
    /// fails, or `shutdown` fires.
    ///
    /// A successful push frees the session for the next job immediately;
    /// execution results arrive separately through `CompleteJob`. A push
    /// only means the job reached the transport, so when the worker goes
    /// away every pushed job still `RUNNING` is put back on the queue.
    pub async fn run(mut self, shutdown: CancellationToken) -> SessionEnd {
        tracing::info!(worker_id = %self.worker_id, capacity = self.capacity, "Worker connected");

        let mut end = loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                _ = self.sink.closed() => break SessionEnd::Disconnected { requeued: 0 },
                job = self.queue.dequeue() => match job {
                    Some(job) => job,
                    None => break SessionEnd::QueueClosed,
                },
            };

            self.prune_in_flight().await;

            let job_id = job.id.clone();
            match self.sink.push(job.clone()).await {
                Ok(()) => {
                    tracing::info!(worker_id = %self.worker_id, job_id = %job_id, "Job sent to worker");
                    self.in_flight.push(job);
                }
                Err(job) => {
                    self.requeue_in_flight().await;
                    let requeued = self.requeue(job).await;
                    break SessionEnd::SendFailed { job_id, requeued };
                }
            }
        };

        if let SessionEnd::Disconnected { requeued } = &mut end {
            *requeued = self.requeue_in_flight().await;
        }

        tracing::info!(worker_id = %self.worker_id, reason = ?end, "Worker session ended");
        end
    }

    async fn still_running(&self, job_id: &str) -> bool {
        matches!(self.table.get(job_id).await, Some(record) if record.status == JobStatus::Running)
    }

    /// Forget delivered jobs whose outcome has been reported.
    async fn prune_in_flight(&mut self) {
        let mut kept = Vec::with_capacity(self.in_flight.len());
        for job in std::mem::take(&mut self.in_flight) {
            if self.still_running(&job.id).await {
                kept.push(job);
            }
        }
        self.in_flight = kept;
    }

    async fn requeue_in_flight(&mut self) -> usize {
        let mut requeued = 0;
        for job in std::mem::take(&mut self.in_flight) {
            if self.still_running(&job.id).await && self.requeue(job).await {
                requeued += 1;
            }
        }
        requeued
    }

    async fn requeue(&self, job: Job) -> bool {
        let job_id = job.id.clone();
        match self.queue.try_enqueue(job) {
            Ok(()) => {
                tracing::warn!(worker_id = %self.worker_id, job_id = %job_id, "Worker lost job, requeued");
                true
            }
            Err(EnqueueError::Closed(_)) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job_id,
                    "Worker lost job during shutdown, left RUNNING for recovery"
                );
                false
            }
            Err(EnqueueError::Full(_)) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job_id,
                    "Worker lost job and dispatch queue is full, job dropped"
                );
                self.table
                    .update_status(&job_id, JobStatus::Failed, Some(DROPPED_OUTPUT.to_string()))
                    .await;
                false
            }
        }
    }
}
