//! Job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job lifecycle: `queued -> running -> {completed | failed | cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered, body not yet started
    Queued,
    /// Body is executing
    Running,
    /// Body returned a result
    Completed,
    /// Body returned an error
    Failed,
    /// Body stopped at a checkpoint after a cancellation request
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition can happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Latest progress reported by a job body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Percentage complete, 0-100
    pub current: u8,
    /// Human-readable stage description
    pub message: String,
}

/// A tracked unit of background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier
    pub job_id: String,
    /// Registered job type
    #[serde(rename = "type")]
    pub job_type: String,
    /// Current status
    pub status: JobStatus,
    /// Latest reported progress
    pub progress: JobProgress,
    /// Who asked for the job
    pub requested_by: String,
    /// Parameters handed to the body
    pub parameters: Value,
    /// Body output, once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure or cancellation detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// When the body started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn queued(job_id: String, request: &JobRequest) -> Self {
        Self {
            job_id,
            job_type: request.job_type.clone(),
            status: JobStatus::Queued,
            progress: JobProgress {
                current: 0,
                message: "Queued".to_string(),
            },
            requested_by: request.requested_by.clone(),
            parameters: request.parameters.clone(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Request to start a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Registered job type
    #[serde(rename = "type")]
    pub job_type: String,
    /// Body-specific parameters
    #[serde(default)]
    pub parameters: Value,
    /// Who asked for the job
    #[serde(default = "default_requester")]
    pub requested_by: String,
}

fn default_requester() -> String {
    "unknown".to_string()
}

impl JobRequest {
    /// Build a request
    pub fn new(job_type: impl Into<String>, parameters: Value, requested_by: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            parameters,
            requested_by: requested_by.into(),
        }
    }
}

/// Outcome of [`crate::JobManager::start_job`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStartResult {
    /// Identifier of the started job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Whether the job was accepted
    pub started: bool,
    /// Why the job was not started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobStartResult {
    pub(crate) fn started(job_id: String) -> Self {
        Self {
            job_id: Some(job_id),
            started: true,
            reason: None,
        }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self {
            job_id: None,
            started: false,
            reason: Some(reason.into()),
        }
    }
}
