//! Conversions between the wire types and the job model.

use crate::error::{EpochError, Result};
use crate::proto;
use crate::proto::JobStatus as ProtoJobStatus;
use crate::scheduler::{Job, JobRecord, JobStatus, RegistryCredentials, Schedule};

pub fn status_to_proto(status: JobStatus) -> ProtoJobStatus {
    match status {
        JobStatus::Queued => ProtoJobStatus::Queued,
        JobStatus::Running => ProtoJobStatus::Running,
        JobStatus::Completed => ProtoJobStatus::Completed,
        JobStatus::Failed => ProtoJobStatus::Failed,
    }
}

/// `None` for `UNSPECIFIED` or an unknown value.
pub fn status_from_proto(value: i32) -> Option<JobStatus> {
    match ProtoJobStatus::try_from(value).ok()? {
        ProtoJobStatus::Unspecified => None,
        ProtoJobStatus::Queued => Some(JobStatus::Queued),
        ProtoJobStatus::Running => Some(JobStatus::Running),
        ProtoJobStatus::Completed => Some(JobStatus::Completed),
        ProtoJobStatus::Failed => Some(JobStatus::Failed),
    }
}

/// Uppercase status name for CLI output.
pub fn status_name(value: i32) -> String {
    status_from_proto(value)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn registry_from_proto(creds: Option<proto::RegistryCredentials>) -> Option<RegistryCredentials> {
    creds
        .filter(|c| !c.username.is_empty() || !c.password.is_empty() || !c.server.is_empty())
        .map(|c| RegistryCredentials {
            username: c.username,
            password: c.password,
            server: c.server,
        })
}

fn registry_to_proto(creds: &RegistryCredentials) -> proto::RegistryCredentials {
    proto::RegistryCredentials {
        username: creds.username.clone(),
        password: creds.password.clone(),
        server: creds.server.clone(),
    }
}

/// Validate a submission and turn it into a job. An empty id is replaced by
/// a fresh UUID; an unparseable schedule is kept as `Schedule::Invalid`.
pub fn job_from_submit(req: proto::SubmitJobRequest) -> Result<Job> {
    if req.command.trim().is_empty() {
        return Err(EpochError::InvalidJob("Command cannot be empty".to_string()));
    }
    if req.image.trim().is_empty() {
        return Err(EpochError::InvalidJob("Image cannot be empty".to_string()));
    }

    let id = if req.id.trim().is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        req.id
    };

    Ok(Job {
        id,
        command: req.command,
        image: req.image,
        schedule: Schedule::parse(&req.schedule),
        registry: registry_from_proto(req.registry),
    })
}

pub fn job_to_proto(job: &Job) -> proto::Job {
    proto::Job {
        id: job.id.clone(),
        command: job.command.clone(),
        image: job.image.clone(),
        schedule: job.schedule.to_string(),
        registry: job.registry.as_ref().map(registry_to_proto),
    }
}

pub fn job_from_proto(job: proto::Job) -> Job {
    Job {
        id: job.id,
        command: job.command,
        image: job.image,
        schedule: Schedule::parse(&job.schedule),
        registry: registry_from_proto(job.registry),
    }
}

pub fn record_to_status_response(record: &JobRecord) -> proto::GetJobStatusResponse {
    proto::GetJobStatusResponse {
        job_id: record.job.id.clone(),
        status: status_to_proto(record.status).into(),
        output: record.output.clone(),
        schedule: record.job.schedule.to_string(),
    }
}

pub fn record_to_info(record: &JobRecord) -> proto::JobInfo {
    proto::JobInfo {
        job_id: record.job.id.clone(),
        status: status_to_proto(record.status).into(),
        command: record.job.command.clone(),
        image: record.job.image.clone(),
        schedule: record.job.schedule.to_string(),
    }
}
