//! Job model and the coordinator-side scheduling machinery.
//!
//! - [`JobTable`]: authoritative map of job records, mirrored to the store
//! - [`DispatchQueue`]: bounded FIFO of jobs waiting for a worker
//! - [`SchedulerLoop`]: periodic tick that moves due jobs onto the queue

pub mod job;
pub mod queue;
pub mod table;
pub mod ticker;

pub use job::{Job, JobRecord, JobStatus, RegistryCredentials, Schedule};
pub use queue::{DispatchQueue, EnqueueError, DEFAULT_QUEUE_CAPACITY};
pub use table::JobTable;
pub use ticker::{SchedulerLoop, TickReport, DEFAULT_TICK_INTERVAL};
