//! Integration tests for the coordinator API over real gRPC.
//!
//! Covers:
//! - SubmitJob / GetJobStatus / ListJobs round trips
//! - Worker streams receiving dispatched jobs
//! - Redelivery after a worker disconnects, idle or with jobs in flight
//! - End-to-end runs through a `WorkerAgent` with a scripted executor

mod test_harness;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::Code;

use epoch::config::WorkerConfig;
use epoch::proto::{JobResult, JobStatus as ProtoJobStatus, ListJobsRequest, WorkerHello};
use epoch::scheduler::Job;
use epoch::worker::{ExecutionResult, Executor, WorkerAgent};
use test_harness::{
    assert_eventually, job_status, submit_request, test_config, TestCoordinator,
};

/// Executor that echoes the command back instead of starting a container.
struct ScriptedExecutor {
    succeed: bool,
    runs: AtomicUsize,
}

impl ScriptedExecutor {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            runs: AtomicUsize::new(0),
        })
    }
}

#[tonic::async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, job: &Job) -> ExecutionResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            ExecutionResult {
                success: true,
                output: format!("ran {}", job.command),
            }
        } else {
            ExecutionResult::failed("exit status 1")
        }
    }
}

fn hello(worker_id: &str) -> WorkerHello {
    WorkerHello {
        worker_id: worker_id.to_string(),
        capacity: 1,
    }
}

#[tokio::test]
async fn test_submit_and_get_status() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let response = client
        .submit_job(submit_request("job-1", "echo hello", "once"))
        .await
        .unwrap()
        .into_inner();
    assert!(response.accepted);
    assert_eq!(response.id, "job-1");

    let status = job_status(&mut client, "job-1").await.unwrap();
    assert_eq!(status.job_id, "job-1");
    assert_eq!(status.status, ProtoJobStatus::Queued as i32);
    assert!(status.output.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let err = job_status(&mut client, "missing").await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_submit_rejects_empty_command() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let err = client
        .submit_job(submit_request("bad", "", "once"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(coordinator.table.is_empty().await);
}

#[tokio::test]
async fn test_submit_generates_id_when_empty() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let response = client
        .submit_job(submit_request("", "echo hi", "once"))
        .await
        .unwrap()
        .into_inner();
    assert!(!response.id.is_empty());
    assert!(uuid::Uuid::parse_str(&response.id).is_ok());

    let status = job_status(&mut client, &response.id).await.unwrap();
    assert_eq!(status.status, ProtoJobStatus::Queued as i32);
}

#[tokio::test]
async fn test_malformed_schedule_accepted_with_warning() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let response = client
        .submit_job(submit_request("weird", "date", "every tuesday"))
        .await
        .unwrap()
        .into_inner();
    assert!(response.accepted);
    assert!(response.message.contains("not valid"));

    let report = coordinator.scheduler().tick_at(1_700_000_000).await;
    assert_eq!(report.malformed, 1);
    assert!(coordinator.queue.is_empty());
}

#[tokio::test]
async fn test_resubmission_overwrites_job() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    client
        .submit_job(submit_request("same", "echo one", "10"))
        .await
        .unwrap();
    client
        .submit_job(submit_request("same", "echo two", "once"))
        .await
        .unwrap();

    let status = job_status(&mut client, "same").await.unwrap();
    assert_eq!(status.schedule, "once");
    assert_eq!(coordinator.table.len().await, 1);
    assert_eq!(
        coordinator.table.get("same").await.unwrap().job.command,
        "echo two"
    );
}

#[tokio::test]
async fn test_list_jobs_filters_by_status() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    client
        .submit_job(submit_request("a", "echo a", "once"))
        .await
        .unwrap();
    client
        .submit_job(submit_request("b", "echo b", "3600"))
        .await
        .unwrap();

    // 1_700_000_001 is not a multiple of 3600, so only the one-off job is due.
    coordinator.scheduler().tick_at(1_700_000_001).await;

    let all = client
        .list_jobs(ListJobsRequest { status_filter: 0 })
        .await
        .unwrap()
        .into_inner();
    let ids: Vec<_> = all.jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let running = client
        .list_jobs(ListJobsRequest {
            status_filter: ProtoJobStatus::Running as i32,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(running.jobs.len(), 1);
    assert_eq!(running.jobs[0].job_id, "a");
}

#[tokio::test]
async fn test_worker_receives_dispatched_job() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    client
        .submit_job(submit_request("job-1", "echo hello", "once"))
        .await
        .unwrap();

    let mut stream = client
        .connect_worker(hello("w1"))
        .await
        .unwrap()
        .into_inner();

    coordinator.scheduler().tick_at(1_700_000_000).await;

    let job = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("timed out waiting for job")
        .unwrap()
        .unwrap();
    assert_eq!(job.id, "job-1");
    assert_eq!(job.command, "echo hello");
    assert_eq!(job.image, "alpine:latest");

    let status = job_status(&mut client, "job-1").await.unwrap();
    assert_eq!(status.status, ProtoJobStatus::Running as i32);
}

#[tokio::test]
async fn test_job_redelivered_after_worker_disconnects() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let first = client
        .connect_worker(hello("gone"))
        .await
        .unwrap()
        .into_inner();
    drop(first);
    tokio::time::sleep(Duration::from_millis(300)).await;

    client
        .submit_job(submit_request("job-1", "echo hello", "once"))
        .await
        .unwrap();
    coordinator.scheduler().tick_at(1_700_000_000).await;

    let mut second = client
        .connect_worker(hello("alive"))
        .await
        .unwrap()
        .into_inner();
    let job = tokio::time::timeout(Duration::from_secs(5), second.message())
        .await
        .expect("job was never redelivered")
        .unwrap()
        .unwrap();
    assert_eq!(job.id, "job-1");
}

#[tokio::test]
async fn test_jobs_in_flight_requeued_when_worker_drops_stream() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    // Never read from this stream: jobs are pushed but never reported.
    let stalled = client
        .connect_worker(hello("stalled"))
        .await
        .unwrap()
        .into_inner();

    for id in ["j0", "j1", "j2"] {
        client
            .submit_job(submit_request(id, "echo hello", "once"))
            .await
            .unwrap();
    }
    coordinator.scheduler().tick_at(1_700_000_000).await;

    let queue = coordinator.queue.clone();
    assert_eventually(
        || {
            let queue = queue.clone();
            async move { queue.is_empty() }
        },
        Duration::from_secs(5),
        "session never took the dispatched jobs",
    )
    .await;

    drop(stalled);

    assert_eventually(
        || {
            let queue = queue.clone();
            async move { queue.len() == 3 }
        },
        Duration::from_secs(5),
        "jobs were not requeued after the worker went away",
    )
    .await;
    for id in ["j0", "j1", "j2"] {
        let status = job_status(&mut client, id).await.unwrap();
        assert_eq!(status.status, ProtoJobStatus::Running as i32);
    }

    let mut second = client
        .connect_worker(hello("alive"))
        .await
        .unwrap()
        .into_inner();
    let mut received = Vec::new();
    for _ in 0..3 {
        let job = tokio::time::timeout(Duration::from_secs(5), second.message())
            .await
            .expect("job was never redelivered")
            .unwrap()
            .unwrap();
        received.push(job.id);
    }
    received.sort();
    assert_eq!(received, vec!["j0", "j1", "j2"]);
}

#[tokio::test]
async fn test_complete_job_records_outcome() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    client
        .submit_job(submit_request("job-1", "echo hello", "once"))
        .await
        .unwrap();
    coordinator.scheduler().tick_at(1_700_000_000).await;

    client
        .complete_job(JobResult {
            job_id: "job-1".to_string(),
            success: true,
            output: "hello".to_string(),
        })
        .await
        .unwrap();

    let status = job_status(&mut client, "job-1").await.unwrap();
    assert_eq!(status.status, ProtoJobStatus::Completed as i32);
    assert_eq!(status.output, "hello\n");
}

#[tokio::test]
async fn test_complete_unknown_job_is_not_found() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let err = client
        .complete_job(JobResult {
            job_id: "ghost".to_string(),
            success: true,
            output: String::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(coordinator.table.is_empty().await);
}

async fn start_ticking_coordinator() -> TestCoordinator {
    let config = epoch::config::CoordinatorConfig {
        tick_interval_ms: 50,
        ..test_config()
    };
    TestCoordinator::start_with(config, epoch::store::JobStore::in_memory()).await
}

#[tokio::test]
async fn test_end_to_end_job_completes_through_worker() {
    let coordinator = start_ticking_coordinator().await;
    let mut client = coordinator.client().await;

    let executor = ScriptedExecutor::new(true);
    let worker = WorkerAgent::new(WorkerConfig::new("w1", coordinator.addr.to_string()))
        .with_executor(executor.clone());
    let worker_shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(worker_shutdown.clone()));

    client
        .submit_job(submit_request("e2e", "echo hi", "once"))
        .await
        .unwrap();

    let table = coordinator.table.clone();
    assert_eventually(
        || {
            let table = table.clone();
            async move {
                matches!(
                    table.get("e2e").await,
                    Some(r) if r.status == epoch::scheduler::JobStatus::Completed
                )
            }
        },
        Duration::from_secs(10),
        "job never completed",
    )
    .await;

    let status = job_status(&mut client, "e2e").await.unwrap();
    assert_eq!(status.output, "ran echo hi\n");
    assert_eq!(executor.runs.load(Ordering::SeqCst), 1);

    worker_shutdown.cancel();
    let executed = tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(executed, 1);
}

#[tokio::test]
async fn test_end_to_end_failed_execution_marks_job_failed() {
    let coordinator = start_ticking_coordinator().await;
    let mut client = coordinator.client().await;

    let worker = WorkerAgent::new(WorkerConfig::new("w1", coordinator.addr.to_string()))
        .with_executor(ScriptedExecutor::new(false));
    let worker_shutdown = CancellationToken::new();
    let _worker_handle = tokio::spawn(worker.run(worker_shutdown.clone()));

    client
        .submit_job(submit_request("boom", "exit 1", "once"))
        .await
        .unwrap();

    let table = coordinator.table.clone();
    assert_eventually(
        || {
            let table = table.clone();
            async move {
                matches!(
                    table.get("boom").await,
                    Some(r) if r.status == epoch::scheduler::JobStatus::Failed
                )
            }
        },
        Duration::from_secs(10),
        "job never failed",
    )
    .await;

    let status = job_status(&mut client, "boom").await.unwrap();
    assert_eq!(status.output, "exit status 1");
    worker_shutdown.cancel();
}

#[tokio::test]
async fn test_worker_stream_ends_on_coordinator_shutdown() {
    let coordinator = TestCoordinator::start().await;
    let mut client = coordinator.client().await;

    let mut stream = client
        .connect_worker(hello("w1"))
        .await
        .unwrap()
        .into_inner();

    coordinator.stop().await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("stream did not end");
    assert!(!matches!(next, Ok(Some(_))));
}
