//! Rollback error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for rollback operations
pub type Result<T> = std::result::Result<T, RollbackError>;

/// Errors raised while capturing or restoring snapshots
#[derive(Debug, Error)]
pub enum RollbackError {
    /// No snapshot is stored under the identifier
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// A snapshot with the identifier already exists
    #[error("Snapshot already exists: {0}")]
    AlreadyExists(String),

    /// Identifier or domain name cannot be used as a store key
    #[error("Invalid snapshot key: {0}")]
    InvalidKey(String),

    /// Path resolves outside of the workspace root
    #[error("Path escapes the workspace root: {0:?}")]
    OutsideWorkspace(PathBuf),

    /// Snapshot exists but failed validation
    #[error("Snapshot {id} is not restorable: {reason}")]
    Invalid {
        /// Snapshot identifier
        id: String,
        /// Why validation failed
        reason: String,
    },

    /// Reading a file for the pre-image failed
    #[error("Failed to capture {path:?}: {source}")]
    Capture {
        /// File being captured
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing restored content back failed
    #[error("Failed to restore {path:?}: {source}")]
    RestoreWrite {
        /// File being restored
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot store I/O failed
    #[error("Snapshot store error: {context}")]
    Store {
        /// What the store was doing
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be encoded or decoded
    #[error("Snapshot manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl RollbackError {
    /// Error taxonomy name reported across the tool-call boundary
    pub fn kind(&self) -> &'static str {
        match self {
            RollbackError::AlreadyExists(_)
            | RollbackError::InvalidKey(_)
            | RollbackError::OutsideWorkspace(_) => "ValidationError",
            _ => "RollbackError",
        }
    }

    /// Whether workspace files may be left in an intermediate state
    ///
    /// Only a failed restore write leaves files half-restored; such failures are
    /// surfaced for manual intervention and never retried.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, RollbackError::RestoreWrite { .. })
    }

    pub(crate) fn store(context: impl Into<String>, source: std::io::Error) -> Self {
        RollbackError::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid(id: impl Into<String>, reason: impl Into<String>) -> Self {
        RollbackError::Invalid {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
