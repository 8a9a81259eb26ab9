use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Wire value for a one-off job that has not been dispatched yet.
pub const ONCE_SENTINEL: &str = "-1";
/// Wire value for a one-off job that has already been dispatched.
pub const DISPATCHED_SENTINEL: &str = "-2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Timing policy of a job.
///
/// `Invalid` keeps whatever the client sent so it can be reported back by
/// status queries; the scheduler never dispatches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Run exactly once, eligible on the next tick.
    Once,
    /// Run whenever the unix time in seconds is a multiple of the interval.
    Recurring(NonZeroU64),
    /// A one-off job that has been handed to the dispatch queue.
    AlreadyDispatched,
    Invalid(String),
}

impl Schedule {
    /// Parse the wire representation of a schedule. Never fails: anything
    /// that is not a sentinel or a positive integer becomes `Invalid`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            ONCE_SENTINEL | "once" => return Schedule::Once,
            DISPATCHED_SENTINEL | "dispatched" => return Schedule::AlreadyDispatched,
            _ => {}
        }

        match trimmed.parse::<u64>().ok().and_then(NonZeroU64::new) {
            Some(interval) => Schedule::Recurring(interval),
            None => Schedule::Invalid(raw.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Schedule::Invalid(_))
    }

    /// Whether a recurring schedule fires at `unix_secs`.
    pub fn fires_at(&self, unix_secs: i64) -> bool {
        match self {
            Schedule::Recurring(interval) => u64::try_from(unix_secs)
                .map(|secs| secs % interval.get() == 0)
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Once => write!(f, "once"),
            Schedule::Recurring(interval) => write!(f, "{}", interval),
            Schedule::AlreadyDispatched => write!(f, "dispatched"),
            Schedule::Invalid(raw) => write!(f, "{}", raw),
        }
    }
}

/// Private registry login forwarded to the execution backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub image: String,
    pub schedule: Schedule,
    pub registry: Option<RegistryCredentials>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        image: impl Into<String>,
        schedule: Schedule,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            image: image.into(),
            schedule,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: RegistryCredentials) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// A job plus its runtime state, as held by the job table and persisted
/// under `job:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub output: String,
    pub job: Job,
}

impl JobRecord {
    pub fn new(job: Job) -> Self {
        Self {
            status: JobStatus::Queued,
            output: String::new(),
            job,
        }
    }

    pub fn id(&self) -> &str {
        &self.job.id
    }

    /// Record that the job has been handed to the dispatch queue. One-off
    /// jobs are retired so no later tick offers them again.
    pub fn mark_dispatched(&mut self) {
        if self.job.schedule == Schedule::Once {
            self.job.schedule = Schedule::AlreadyDispatched;
        }
        self.status = JobStatus::Running;
    }

    /// Apply a completion report. Successful runs append to the output
    /// accumulated by earlier runs; a failure replaces it.
    pub fn apply_outcome(&mut self, success: bool, output: &str) {
        if success {
            self.status = JobStatus::Completed;
            self.output.push_str(output);
            self.output.push('\n');
        } else {
            self.status = JobStatus::Failed;
            self.output = output.to_string();
        }
    }
}
