//! lereprise - Rollback Manager
//!
//! *La Reprise* (The Recovery) - pre-image capture and restore for context updates
//! and coordinated operations.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Rollback error types
pub mod error;

/// Workspace and context directory layout
pub mod layout;

/// Snapshot capture, validation, restore and retention
pub mod manager;

/// Snapshot manifest records
pub mod snapshot;

pub use error::{Result, RollbackError};
pub use layout::{ContextLayout, DEFAULT_CONTEXT_DIR};
pub use manager::{
    MaintenanceReport, RestoreReport, RollbackConfig, RollbackManager, DEFAULT_RETENTION_HOURS,
    DEFAULT_STORE_DIR,
};
pub use snapshot::{RollbackSnapshot, SnapshotEntry, SnapshotScope, SnapshotStatus};
