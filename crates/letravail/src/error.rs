//! Job error types

use thiserror::Error;

/// Result type for job operations
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors raised by job bodies and the job registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// No runner is registered for the job type
    #[error("Unknown job type: {0}")]
    UnknownType(String),

    /// No job with the identifier exists
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The global concurrency limit is reached
    #[error("Concurrency limit reached ({0} active jobs)")]
    ConcurrencyLimit(usize),

    /// Parameters could not be interpreted by the job body
    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    /// The body observed a cancellation request at a checkpoint
    #[error("Job cancelled")]
    Cancelled,

    /// The body exceeded its time budget
    #[error("Job timed out: {0}")]
    Timeout(String),

    /// The body failed
    #[error("Job failed: {0}")]
    Failed(String),
}

impl JobError {
    /// Error taxonomy name reported across the tool-call boundary
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::UnknownType(_) | JobError::NotFound(_) | JobError::InvalidParameters(_) => {
                "ValidationError"
            }
            JobError::ConcurrencyLimit(_) => "ConcurrencyConflict",
            JobError::Cancelled => "Cancelled",
            JobError::Timeout(_) => "TimeoutError",
            JobError::Failed(_) => "ExecutionError",
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Failed(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::InvalidParameters(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(JobError::UnknownType("x".into()), "ValidationError")]
    #[case(JobError::ConcurrencyLimit(4), "ConcurrencyConflict")]
    #[case(JobError::Cancelled, "Cancelled")]
    #[case(JobError::Timeout("reindex".into()), "TimeoutError")]
    #[case(JobError::Failed("boom".into()), "ExecutionError")]
    fn test_kind(#[case] err: JobError, #[case] kind: &str) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_anyhow_context_is_kept() {
        let err: JobError = anyhow::anyhow!("disk full").context("writing batch").into();
        assert_eq!(err, JobError::Failed("writing batch: disk full".to_string()));
    }
}
