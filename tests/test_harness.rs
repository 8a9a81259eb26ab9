//! Test harness for coordinator integration tests.
//!
//! Starts an in-process coordinator on an ephemeral localhost port and
//! exposes its job table and dispatch queue so tests can drive ticks and
//! inspect state directly.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use epoch::config::CoordinatorConfig;
use epoch::coordinator::Coordinator;
use epoch::proto::scheduler_client::SchedulerClient;
use epoch::proto::{GetJobStatusRequest, GetJobStatusResponse, SubmitJobRequest};
use epoch::scheduler::{DispatchQueue, JobTable, SchedulerLoop};
use epoch::store::JobStore;

/// Tick interval long enough that no tick fires during a test. Tests drive
/// ticks themselves with `tick_at`.
pub const MANUAL_TICKS_MS: u64 = 3_600_000;

/// Coordinator config on an ephemeral port with manual ticking.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        tick_interval_ms: MANUAL_TICKS_MS,
        ..CoordinatorConfig::default()
    }
}

/// Handle to a running in-process coordinator
pub struct TestCoordinator {
    pub addr: SocketAddr,
    pub table: Arc<JobTable>,
    pub queue: DispatchQueue,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<epoch::error::Result<()>>>,
}

impl TestCoordinator {
    /// Coordinator over a fresh in-memory store.
    pub async fn start() -> Self {
        Self::start_with(test_config(), JobStore::in_memory()).await
    }

    pub async fn start_with(config: CoordinatorConfig, store: JobStore) -> Self {
        let coordinator = Coordinator::with_store(config, store);
        let table = coordinator.table();
        let queue = coordinator.queue();

        let shutdown = CancellationToken::new();
        let (addr_tx, addr_rx) = oneshot::channel();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            coordinator
                .run_with(token, move |addr| {
                    let _ = addr_tx.send(addr);
                })
                .await
        });

        let addr = match addr_rx.await {
            Ok(addr) => addr,
            Err(_) => {
                let result = handle.await.expect("coordinator task panicked");
                panic!("coordinator failed to start: {:?}", result.err());
            }
        };

        Self {
            addr,
            table,
            queue,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn client(&self) -> SchedulerClient<Channel> {
        SchedulerClient::connect(self.endpoint())
            .await
            .expect("failed to connect to coordinator")
    }

    /// Scheduler bound to this coordinator's table and queue, for manual ticks.
    pub fn scheduler(&self) -> SchedulerLoop {
        SchedulerLoop::new(self.table.clone(), self.queue.clone())
    }

    /// Stop serving and wait for the coordinator to wind down.
    pub async fn stop(mut self) -> epoch::error::Result<()> {
        self.shutdown.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.expect("coordinator task panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub fn submit_request(id: &str, command: &str, schedule: &str) -> SubmitJobRequest {
    SubmitJobRequest {
        id: id.to_string(),
        command: command.to_string(),
        image: "alpine:latest".to_string(),
        schedule: schedule.to_string(),
        registry: None,
    }
}

pub async fn job_status(
    client: &mut SchedulerClient<Channel>,
    job_id: &str,
) -> Result<GetJobStatusResponse, tonic::Status> {
    client
        .get_job_status(GetJobStatusRequest {
            job_id: job_id.to_string(),
        })
        .await
        .map(|r| r.into_inner())
}

/// Current unix time rounded down to a multiple of `n`, shifted by `offset`.
pub fn aligned_time(n: i64, offset: i64) -> i64 {
    let now = chrono::Utc::now().timestamp();
    now - now.rem_euclid(n) + offset
}

pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
