use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::scheduler::job::{Job, JobRecord, JobStatus, Schedule};
use crate::scheduler::queue::DispatchQueue;
use crate::store::JobStore;

/// Authoritative in-memory map of job records.
///
/// Every operation runs under one table-wide lock. Mutations are mirrored to
/// the durable store while the lock is held; a store failure is logged and
/// the in-memory change stands.
pub struct JobTable {
    jobs: Mutex<HashMap<String, JobRecord>>,
    store: JobStore,
}

impl JobTable {
    pub fn new(store: JobStore) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Insert a fresh `QUEUED` record for `job`. An existing record with the
    /// same id is replaced outright, output and status included.
    pub async fn submit(&self, job: Job) -> String {
        let id = job.id.clone();
        let record = JobRecord::new(job);

        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&id) {
            tracing::info!(job_id = %id, "Replacing existing job record");
        }
        self.persist(&record);
        jobs.insert(id.clone(), record);
        id
    }

    /// Submit `job` and immediately offer it to `queue` if it is a one-off.
    /// Returns the id and whether the job was enqueued.
    pub async fn submit_and_dispatch(&self, job: Job, queue: &DispatchQueue) -> (String, bool) {
        let id = job.id.clone();
        let mut record = JobRecord::new(job);

        // Enqueue under the lock so a fast completion report finds the record.
        let mut jobs = self.jobs.lock().await;
        let dispatched = record.job.schedule == Schedule::Once && queue.offer(&mut record);
        self.persist(&record);
        jobs.insert(id.clone(), record);
        (id, dispatched)
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.lock().await.get(id).cloned()
    }

    /// Set the status of a job, replacing its output when one is given.
    pub async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        output: Option<String>,
    ) -> Option<JobRecord> {
        self.modify(id, |record| {
            record.status = status;
            if let Some(output) = output {
                record.output = output;
            }
        })
        .await
    }

    /// Apply a worker's completion report.
    pub async fn complete(&self, id: &str, success: bool, output: &str) -> Option<JobRecord> {
        self.modify(id, |record| record.apply_outcome(success, output))
            .await
    }

    /// Visit every record while holding the table lock. The visitor returns
    /// `true` for records it changed; those are written to the store before
    /// the lock is released. The visitor must not block.
    ///
    /// Returns the number of records the visitor changed.
    pub async fn for_each<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&mut JobRecord) -> bool,
    {
        let mut jobs = self.jobs.lock().await;
        let mut changed = 0;
        for record in jobs.values_mut() {
            if visitor(record) {
                changed += 1;
                self.persist(record);
            }
        }
        changed
    }

    /// Snapshot of every record, ordered by id.
    pub async fn list(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.lock().await;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| a.job.id.cmp(&b.job.id));
        records
    }

    /// Insert a record loaded from the store without writing it back.
    pub async fn restore(&self, record: JobRecord) {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(record.job.id.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    async fn modify<F>(&self, id: &str, f: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.lock().await;
        let record = jobs.get_mut(id)?;
        f(record);
        self.persist(record);
        Some(record.clone())
    }

    fn persist(&self, record: &JobRecord) {
        if let Err(e) = self.store.save(record) {
            tracing::warn!(job_id = %record.id(), error = %e, "Failed to persist job record");
        }
    }
}
