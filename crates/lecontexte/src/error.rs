//! Holistic update error types

use lereprise::RollbackError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Failure category of an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateErrorKind {
    /// Bad request
    #[serde(rename = "ValidationError")]
    Validation,
    /// Another update holds one of the affected domains
    #[serde(rename = "ConcurrencyConflict")]
    ConcurrencyConflict,
    /// Resolution or content generation failed
    #[serde(rename = "ExecutionError")]
    Execution,
    /// Snapshot missing, invalid, or a restore write failed
    #[serde(rename = "RollbackError")]
    Rollback,
    /// The performance budget was exceeded
    #[serde(rename = "TimeoutError")]
    Timeout,
    /// Cancellation was requested at a checkpoint
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl UpdateErrorKind {
    /// Taxonomy name as reported across the tool-call boundary
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateErrorKind::Validation => "ValidationError",
            UpdateErrorKind::ConcurrencyConflict => "ConcurrencyConflict",
            UpdateErrorKind::Execution => "ExecutionError",
            UpdateErrorKind::Rollback => "RollbackError",
            UpdateErrorKind::Timeout => "TimeoutError",
            UpdateErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for UpdateErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured update failure, embedded in [`crate::HolisticUpdateResult`]
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct UpdateError {
    kind: UpdateErrorKind,
    message: String,
}

impl UpdateError {
    /// Build an error of the given kind
    pub fn new(kind: UpdateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Invalid request
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Validation, message)
    }

    /// Overlapping update
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::ConcurrencyConflict, message)
    }

    /// Collaborator or I/O failure during regeneration
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Execution, message)
    }

    /// Budget exceeded
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Timeout, message)
    }

    /// Cancelled at a checkpoint
    pub fn cancelled() -> Self {
        Self::new(UpdateErrorKind::Cancelled, "cancellation requested")
    }

    /// Taxonomy name
    pub fn kind(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Failure category
    pub fn error_kind(&self) -> UpdateErrorKind {
        self.kind
    }

    /// Human-readable detail
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RollbackError> for UpdateError {
    fn from(err: RollbackError) -> Self {
        let kind = if err.kind() == "ValidationError" {
            UpdateErrorKind::Validation
        } else {
            UpdateErrorKind::Rollback
        };
        Self::new(kind, err.to_string())
    }
}
