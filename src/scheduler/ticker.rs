use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scheduler::job::Schedule;
use crate::scheduler::queue::DispatchQueue;
use crate::scheduler::table::JobTable;

/// Default period between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What a single tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs handed to the dispatch queue.
    pub dispatched: usize,
    /// Due jobs left behind because the queue was full.
    pub skipped_full: usize,
    /// Jobs whose schedule could not be interpreted.
    pub malformed: usize,
}

/// Periodic driver that moves due jobs from the job table onto the
/// dispatch queue.
pub struct SchedulerLoop {
    table: Arc<JobTable>,
    queue: DispatchQueue,
    interval: Duration,
    /// Jobs already warned about for a malformed schedule.
    malformed_seen: Mutex<HashSet<String>>,
}

impl SchedulerLoop {
    pub fn new(table: Arc<JobTable>, queue: DispatchQueue) -> Self {
        Self {
            table,
            queue,
            interval: DEFAULT_TICK_INTERVAL,
            malformed_seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Tick until `shutdown` is cancelled. The first tick comes one full
    /// interval after the call.
    pub async fn run(self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Scheduler loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_at(chrono::Utc::now().timestamp()).await;
                }
            }
        }
    }

    /// Run one scheduling pass as if the wall clock read `now` (unix seconds).
    ///
    /// The whole pass runs under the job table lock. Enqueue attempts never
    /// block; a due job that does not fit stays eligible for the next tick.
    pub async fn tick_at(&self, now: i64) -> TickReport {
        let mut report = TickReport::default();
        let queue = &self.queue;
        let mut malformed_seen = self.malformed_seen.lock().await;

        self.table
            .for_each(|record| {
                if let Schedule::Invalid(raw) = &record.job.schedule {
                    if malformed_seen.insert(record.id().to_string()) {
                        tracing::warn!(job_id = %record.id(), schedule = %raw, "Job has a malformed schedule and will not be dispatched");
                    } else {
                        tracing::debug!(job_id = %record.id(), schedule = %raw, "Skipping job with malformed schedule");
                    }
                    report.malformed += 1;
                    return false;
                }
                // A resubmission may have replaced the bad schedule.
                if !malformed_seen.is_empty() {
                    malformed_seen.remove(record.id());
                }

                let due = match &record.job.schedule {
                    Schedule::Once => true,
                    schedule @ Schedule::Recurring(_) => schedule.fires_at(now),
                    Schedule::AlreadyDispatched | Schedule::Invalid(_) => false,
                };
                if !due {
                    return false;
                }

                if queue.offer(record) {
                    tracing::debug!(job_id = %record.id(), now, "Dispatched job");
                    report.dispatched += 1;
                    true
                } else {
                    tracing::warn!(job_id = %record.id(), "Dispatch queue full, job deferred to next tick");
                    report.skipped_full += 1;
                    false
                }
            })
            .await;

        if report.dispatched > 0 || report.skipped_full > 0 {
            tracing::debug!(
                now,
                dispatched = report.dispatched,
                skipped_full = report.skipped_full,
                queued = queue.len(),
                "Scheduler tick"
            );
        }
        report
    }
}
