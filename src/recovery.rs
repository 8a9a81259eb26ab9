//! Startup reconciliation of persisted job records.
//!
//! Runs once, before the scheduler ticks and before the API accepts calls.
//! A record persisted as `RUNNING` belongs to an execution whose outcome can
//! no longer be reported, so it is rewritten as `FAILED` with its output
//! left as it was. Nothing is re-dispatched.

use crate::scheduler::{JobStatus, JobTable};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records loaded into the job table.
    pub loaded: usize,
    /// Ids of records moved from `RUNNING` to `FAILED`.
    pub reclassified: Vec<String>,
    /// Records that could not be decoded and were left out.
    pub skipped: usize,
}

/// Load every persisted record into `table`, failing interrupted runs.
///
/// Only a failure to scan the store is returned as an error. Undecodable
/// records and failed write-backs are logged and do not stop the pass.
pub async fn recover(store: &JobStore, table: &JobTable) -> Result<RecoveryReport, StoreError> {
    let mut report = RecoveryReport::default();

    for entry in store.load_all()? {
        let mut record = match entry {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable job record");
                report.skipped += 1;
                continue;
            }
        };

        if !record.job.schedule.is_valid() {
            tracing::warn!(
                job_id = %record.id(),
                schedule = %record.job.schedule,
                "Recovered job has a malformed schedule and will not be dispatched"
            );
        }

        if record.status == JobStatus::Running {
            record.status = JobStatus::Failed;
            if let Err(e) = store.save(&record) {
                tracing::warn!(job_id = %record.id(), error = %e, "Failed to persist recovered job");
            }
            tracing::info!(job_id = %record.id(), "Marked interrupted job as failed");
            report.reclassified.push(record.id().to_string());
        }

        table.restore(record).await;
        report.loaded += 1;
    }

    tracing::info!(
        loaded = report.loaded,
        reclassified = report.reclassified.len(),
        skipped = report.skipped,
        "Recovery pass complete"
    );
    Ok(report)
}
