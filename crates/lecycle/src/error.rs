//! Coordination error types

use lecontexte::UpdateError;
use lereprise::RollbackError;
use thiserror::Error;

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors raised while planning, executing or rolling back coordinated operations
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Bad request, unknown type or missing identifiers
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Referenced plan, operation or approval does not exist
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of record
        what: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Another execution already holds an overlapping resource
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A component failed
    #[error("Component {component} failed: {message}")]
    Execution {
        /// Failing component
        component: String,
        /// Failure detail
        message: String,
    },

    /// A snapshot was missing or a restore failed
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// An approval gate or context regeneration exceeded its budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An approval gate was rejected
    #[error("Approval {approval_id} was rejected")]
    ApprovalRejected {
        /// Rejected approval
        approval_id: String,
    },

    /// An approval gate expired before reaching quorum
    #[error("Approval {approval_id} expired")]
    ApprovalExpired {
        /// Expired approval
        approval_id: String,
    },

    /// Execution stopped at a checkpoint
    #[error("Operation cancelled")]
    Cancelled,

    /// Collaborator failure outside of a component
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl CoordinationError {
    /// Error taxonomy name reported across the tool-call boundary
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationError::Validation(_) | CoordinationError::NotFound { .. } => {
                "ValidationError"
            }
            CoordinationError::ConcurrencyConflict(_) => "ConcurrencyConflict",
            CoordinationError::Execution { .. } | CoordinationError::Collaborator(_) => {
                "ExecutionError"
            }
            CoordinationError::Rollback(_) => "RollbackError",
            CoordinationError::Timeout(_) => "TimeoutError",
            CoordinationError::ApprovalRejected { .. } => "ApprovalRejectedError",
            CoordinationError::ApprovalExpired { .. } => "ApprovalExpiredError",
            CoordinationError::Cancelled => "Cancelled",
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        CoordinationError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub(crate) fn execution(component: impl Into<String>, message: impl Into<String>) -> Self {
        CoordinationError::Execution {
            component: component.into(),
            message: message.into(),
        }
    }
}

impl From<RollbackError> for CoordinationError {
    fn from(err: RollbackError) -> Self {
        if err.kind() == "ValidationError" {
            CoordinationError::Validation(err.to_string())
        } else {
            CoordinationError::Rollback(err.to_string())
        }
    }
}

impl From<UpdateError> for CoordinationError {
    fn from(err: UpdateError) -> Self {
        match err.kind() {
            "ValidationError" => CoordinationError::Validation(err.message().to_string()),
            "ConcurrencyConflict" => CoordinationError::ConcurrencyConflict(err.message().to_string()),
            "RollbackError" => CoordinationError::Rollback(err.message().to_string()),
            "TimeoutError" => CoordinationError::Timeout(err.message().to_string()),
            "Cancelled" => CoordinationError::Cancelled,
            _ => CoordinationError::execution("context-regeneration", err.message()),
        }
    }
}
