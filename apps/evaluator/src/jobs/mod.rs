//! Job lifecycle state and the collaborators the worker reads and writes:
//! job records, results, source documents and the queue.
//!
//! Status transitions are compare-and-set. `completed` and `failed` are
//! terminal; `processing -> queued` is the job-level retry path.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::errors::EvalError;
use crate::evaluation::models::EvaluationResult;

pub mod documents;
pub mod memory;
pub mod redis_store;

/// The only error text ever attached to a failed job's status.
pub const FAILED_JOB_MESSAGE: &str = "Evaluation job failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::Backend(format!("unknown job status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub id: Uuid,
    pub job_title: String,
    pub cv_reference: String,
    pub project_reference: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl EvaluationJob {
    pub fn new(job_title: String, cv_reference: String, project_reference: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_title,
            cv_reference,
            project_reference,
            status: JobStatus::Queued,
            created_at: Utc::now(),
        }
    }

    pub fn data(&self) -> EvaluationJobData {
        EvaluationJobData {
            job_id: self.id,
            job_title: self.job_title.clone(),
            cv_reference: self.cv_reference.clone(),
            project_reference: self.project_reference.clone(),
        }
    }
}

/// Queue message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJobData {
    #[serde(rename = "jobId")]
    pub job_id: Uuid,
    pub job_title: String,
    #[serde(rename = "cvReference")]
    pub cv_reference: String,
    #[serde(rename = "projectReference")]
    pub project_reference: String,
}

/// One delivery of a job. `attempt` starts at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub data: EvaluationJobData,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Job {0} is completed but has no stored result")]
    MissingResult(Uuid),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Job records keyed by id.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &EvaluationJob) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<EvaluationJob>, StoreError>;

    /// Moves `id` from `from` to `to` only if it is currently `from`.
    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, job_id: Uuid, result: &EvaluationResult) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<EvaluationResult>, StoreError>;

    async fn delete(&self, job_id: Uuid) -> Result<(), StoreError>;
}

/// Resolves an opaque document reference to extracted plain text.
/// `Ok(None)` means the document does not exist.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_text(&self, reference: &str) -> anyhow::Result<Option<String>>;
}

/// At-least-once delivery. A popped job stays claimed until it is acked; a
/// claim that outlives its holder is handed back by `reclaim_stale`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, job: QueuedJob) -> Result<(), StoreError>;

    /// Waits briefly for the next delivery; `None` when the queue stayed empty.
    async fn pop(&self) -> Result<Option<QueuedJob>, StoreError>;

    /// Releases the claim taken by `pop`.
    async fn ack(&self, job: &QueuedJob) -> Result<(), StoreError>;

    /// Removes and returns claims held for at least `older_than`.
    async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<QueuedJob>, StoreError>;
}

/// What callers may see about a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Creates a queued job record, then enqueues its first delivery.
pub async fn submit_job(
    jobs: &dyn JobStore,
    queue: &dyn JobQueue,
    job_title: &str,
    cv_reference: &str,
    project_reference: &str,
) -> Result<Uuid, EvalError> {
    for (field, value) in [
        ("job_title", job_title),
        ("cv_reference", cv_reference),
        ("project_reference", project_reference),
    ] {
        if value.trim().is_empty() {
            return Err(EvalError::Validation(format!("{field} is required")));
        }
    }

    let job = EvaluationJob::new(
        job_title.trim().to_string(),
        cv_reference.trim().to_string(),
        project_reference.trim().to_string(),
    );
    jobs.create(&job).await?;
    queue
        .push(QueuedJob {
            data: job.data(),
            attempt: 1,
        })
        .await?;

    info!(job_id = %job.id, job_title = %job.job_title, "evaluation job queued");
    Ok(job.id)
}

/// Status surface: the result only when completed, a generic message only when failed.
pub async fn job_status(
    jobs: &dyn JobStore,
    results: &dyn ResultStore,
    id: Uuid,
) -> Result<Option<JobStatusView>, StoreError> {
    let Some(job) = jobs.get(id).await? else {
        return Ok(None);
    };

    let (result, error) = match job.status {
        JobStatus::Completed => {
            let result = results.get(id).await?.ok_or(StoreError::MissingResult(id))?;
            (Some(result), None)
        }
        JobStatus::Failed => (None, Some(FAILED_JOB_MESSAGE.to_string())),
        JobStatus::Queued | JobStatus::Processing => (None, None),
    };

    Ok(Some(JobStatusView {
        id,
        status: job.status,
        result,
        error,
    }))
}
