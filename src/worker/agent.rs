use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::grpc::{self, convert::job_from_proto};
use crate::proto::scheduler_client::SchedulerClient;
use crate::proto::{JobResult, WorkerHello};
use crate::worker::executor::{DockerExecutor, Executor};

/// Long-lived worker: holds a `ConnectWorker` stream open, runs each job it
/// receives and reports the outcome with `CompleteJob`.
pub struct WorkerAgent {
    config: WorkerConfig,
    executor: Arc<dyn Executor>,
}

impl WorkerAgent {
    pub fn new(config: WorkerConfig) -> Self {
        let executor = Arc::new(DockerExecutor::new(config.sandbox.clone()));
        Self { config, executor }
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Connect to the configured coordinator and work until the stream ends
    /// or `shutdown` fires. Returns the number of jobs executed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<usize> {
        let channel =
            grpc::connect_with_config(&self.config.coordinator_addr, &self.config.tls, None).await?;
        tracing::info!(coordinator = %self.config.coordinator_addr, "Connected to coordinator");
        self.run_on(channel, shutdown).await
    }

    /// Same as [`run`](Self::run) over an existing channel.
    pub async fn run_on(&self, channel: Channel, shutdown: CancellationToken) -> Result<usize> {
        let mut client = SchedulerClient::new(channel);
        let mut stream = client
            .connect_worker(WorkerHello {
                worker_id: self.config.worker_id.clone(),
                capacity: self.config.capacity,
            })
            .await?
            .into_inner();

        tracing::info!(worker_id = %self.config.worker_id, capacity = self.config.capacity, "Waiting for jobs");

        let mut executed = 0;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Worker shutting down");
                    break;
                }
                next = stream.message() => next,
            };

            let job = match next {
                Ok(Some(job)) => job_from_proto(job),
                Ok(None) => {
                    tracing::info!("Coordinator closed the job stream");
                    break;
                }
                Err(status) => {
                    tracing::warn!(error = %status, "Job stream failed");
                    break;
                }
            };

            tracing::info!(job_id = %job.id, "Received job");
            let result = self.executor.execute(&job).await;
            executed += 1;

            match client
                .complete_job(JobResult {
                    job_id: job.id.clone(),
                    success: result.success,
                    output: result.output,
                })
                .await
            {
                Ok(_) => tracing::info!(job_id = %job.id, success = result.success, "Reported job result"),
                Err(status) => {
                    tracing::warn!(job_id = %job.id, error = %status, "Failed to report job result")
                }
            }
        }

        Ok(executed)
    }
}
