use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use crate::error::EpochError;
use crate::grpc::convert::{
    job_from_submit, record_to_info, record_to_status_response, status_from_proto,
};
use crate::grpc::session::{ChannelSink, WorkerSession};
use crate::proto::scheduler_server::Scheduler;
use crate::proto::{
    CompleteJobResponse, GetJobStatusRequest, GetJobStatusResponse, Job as ProtoJob, JobResult,
    ListJobsRequest, ListJobsResponse, SubmitJobRequest, SubmitJobResponse, WorkerHello,
};
use crate::scheduler::{DispatchQueue, JobTable};

/// Jobs buffered per worker stream. One slot keeps a job from sitting in a
/// dead connection's buffer for long.
const WORKER_STREAM_BUFFER: usize = 1;

/// gRPC service for the coordinator API
pub struct CoordinatorService {
    table: Arc<JobTable>,
    queue: DispatchQueue,
    dispatch_on_submit: bool,
    shutdown: CancellationToken,
}

impl CoordinatorService {
    pub fn new(table: Arc<JobTable>, queue: DispatchQueue, shutdown: CancellationToken) -> Self {
        Self {
            table,
            queue,
            dispatch_on_submit: false,
            shutdown,
        }
    }

    /// Offer one-off jobs to the dispatch queue at submit time.
    pub fn with_dispatch_on_submit(mut self, enabled: bool) -> Self {
        self.dispatch_on_submit = enabled;
        self
    }
}

type JobStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<ProtoJob, Status>> + Send>>;

#[tonic::async_trait]
impl Scheduler for CoordinatorService {
    type ConnectWorkerStream = JobStream;

    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let job = job_from_submit(request.into_inner())?;

        let message = if job.schedule.is_valid() {
            "Job accepted".to_string()
        } else {
            tracing::warn!(job_id = %job.id, schedule = %job.schedule, "Accepted job with malformed schedule");
            format!("Job accepted, but schedule '{}' is not valid and it will not run", job.schedule)
        };

        let (id, dispatched) = if self.dispatch_on_submit {
            self.table.submit_and_dispatch(job, &self.queue).await
        } else {
            (self.table.submit(job).await, false)
        };

        tracing::info!(job_id = %id, dispatched, "Job submitted");
        Ok(Response::new(SubmitJobResponse {
            accepted: true,
            message,
            id,
        }))
    }

    async fn get_job_status(
        &self,
        request: Request<GetJobStatusRequest>,
    ) -> Result<Response<GetJobStatusResponse>, Status> {
        let req = request.into_inner();

        let record = self
            .table
            .get(&req.job_id)
            .await
            .ok_or(EpochError::JobNotFound(req.job_id))?;

        Ok(Response::new(record_to_status_response(&record)))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let filter = status_from_proto(request.into_inner().status_filter);

        let jobs = self
            .table
            .list()
            .await
            .iter()
            .filter(|record| filter.map_or(true, |status| record.status == status))
            .map(record_to_info)
            .collect();

        Ok(Response::new(ListJobsResponse { jobs }))
    }

    async fn connect_worker(
        &self,
        request: Request<WorkerHello>,
    ) -> Result<Response<Self::ConnectWorkerStream>, Status> {
        let hello = request.into_inner();
        let worker_id = if hello.worker_id.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            hello.worker_id
        };

        let (tx, rx) = mpsc::channel(WORKER_STREAM_BUFFER);
        let session = WorkerSession::new(
            worker_id,
            hello.capacity,
            self.queue.clone(),
            self.table.clone(),
            ChannelSink::new(tx),
        );
        tokio::spawn(session.run(self.shutdown.child_token()));

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::ConnectWorkerStream))
    }

    async fn complete_job(
        &self,
        request: Request<JobResult>,
    ) -> Result<Response<CompleteJobResponse>, Status> {
        let result = request.into_inner();

        match self
            .table
            .complete(&result.job_id, result.success, &result.output)
            .await
        {
            Some(record) => {
                tracing::info!(job_id = %result.job_id, status = %record.status, "Job completed");
                Ok(Response::new(CompleteJobResponse {}))
            }
            None => {
                tracing::warn!(job_id = %result.job_id, "Completion reported for unknown job");
                Err(EpochError::JobNotFound(result.job_id).into())
            }
        }
    }
}
