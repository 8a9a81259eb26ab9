use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::grpc::{CoordinatorService, GrpcServer};
use crate::recovery::{recover, RecoveryReport};
use crate::scheduler::{DispatchQueue, JobTable, SchedulerLoop};
use crate::store::{JobStore, RedbStore};
use crate::tls;

/// Coordinator process: job table, dispatch queue, scheduler loop and the
/// gRPC API, wired over one durable store.
pub struct Coordinator {
    config: CoordinatorConfig,
    store: JobStore,
    table: Arc<JobTable>,
    queue: DispatchQueue,
}

impl Coordinator {
    /// Open the redb database named in `config`. Failing to open it is fatal.
    pub fn open(config: CoordinatorConfig) -> Result<Self> {
        let store = JobStore::new(Arc::new(RedbStore::open(&config.db_path)?));
        Ok(Self::with_store(config, store))
    }

    /// Build a coordinator over an already opened store.
    pub fn with_store(config: CoordinatorConfig, store: JobStore) -> Self {
        let table = Arc::new(JobTable::new(store.clone()));
        let queue = DispatchQueue::with_capacity(config.queue_capacity);
        Self {
            config,
            store,
            table,
            queue,
        }
    }

    pub fn table(&self) -> Arc<JobTable> {
        self.table.clone()
    }

    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Bring the coordinator up and serve until `shutdown` is cancelled.
    ///
    /// Startup order:
    /// 1. Recovery pass over the store (fails interrupted `RUNNING` jobs)
    /// 2. Bind the listener
    /// 3. Spawn the scheduler loop
    /// 4. Serve the coordinator API
    ///
    /// `on_bound` receives the bound address before the first tick.
    pub async fn run_with<F>(self, shutdown: CancellationToken, on_bound: F) -> Result<()>
    where
        F: FnOnce(SocketAddr),
    {
        let report: RecoveryReport = recover(&self.store, &self.table).await?;
        if !report.reclassified.is_empty() {
            tracing::warn!(jobs = ?report.reclassified, "Jobs interrupted by restart marked failed");
        }

        let tls_identity = tls::resolve_identity(&self.config.tls).await?;

        let service =
            CoordinatorService::new(self.table.clone(), self.queue.clone(), shutdown.clone())
                .with_dispatch_on_submit(self.config.dispatch_on_submit);
        let server = GrpcServer::bind(self.config.listen_addr, service, tls_identity).await?;
        let addr = server.local_addr()?;
        on_bound(addr);

        let scheduler = SchedulerLoop::new(self.table.clone(), self.queue.clone())
            .with_interval(self.config.tick_interval());
        let scheduler_shutdown = shutdown.clone();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        });

        let jobs = self.table.len().await;
        tracing::info!(
            addr = %addr,
            jobs,
            queue_capacity = self.queue.capacity(),
            dispatch_on_submit = self.config.dispatch_on_submit,
            "Coordinator ready"
        );

        let result = server.run(shutdown.clone()).await;

        // The server can also stop on its own error; make sure the rest follows.
        shutdown.cancel();
        if let Err(e) = scheduler_handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
        self.queue.close();

        result
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.run_with(shutdown, |_| {}).await
    }
}
