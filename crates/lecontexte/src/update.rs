//! Update requests and results

use crate::error::UpdateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What triggered an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    /// Explicit user request
    Manual,
    /// Version-control hook
    GitHook,
    /// Periodic schedule
    Scheduled,
    /// Requested by a coordinated lifecycle operation
    Coordinated,
}

/// Input of one holistic update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolisticUpdateRequest {
    /// Changed source files, workspace-relative or absolute
    pub changed_files: Vec<PathBuf>,
    /// Commit the change belongs to
    pub git_commit_hash: Option<String>,
    /// What triggered the update
    pub trigger_type: TriggerType,
    /// Soft budget checked at batch and domain boundaries
    pub performance_timeout: Duration,
}

impl HolisticUpdateRequest {
    /// Request with the given budget
    pub fn new(changed_files: Vec<PathBuf>, trigger_type: TriggerType, performance_timeout: Duration) -> Self {
        Self {
            changed_files,
            git_commit_hash: None,
            trigger_type,
            performance_timeout,
        }
    }

    /// Attach the commit hash
    pub fn with_commit(mut self, hash: impl Into<String>) -> Self {
        self.git_commit_hash = Some(hash.into());
        self
    }
}

/// Per-phase timing of one update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Domain resolution and snapshot capture
    pub discovery_ms: u64,
    /// Source inventory and content generation
    pub analysis_ms: u64,
    /// Replacing old context with the regenerated content
    pub cleanup_ms: u64,
    /// Whole update, including any rollback
    pub total_ms: u64,
    /// Source files inventoried
    pub files_analyzed: usize,
    /// Inventory batches processed
    pub batches_processed: usize,
}

/// Outcome of one holistic update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolisticUpdateResult {
    pub update_id: String,
    pub success: bool,
    /// Milliseconds
    pub execution_time: u64,
    pub affected_domains: Vec<String>,
    pub updated_files: Vec<PathBuf>,
    pub performance_metrics: PerformanceMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UpdateError>,
    /// Whether the pre-update snapshot was restored
    pub rolled_back: bool,
    pub trigger_type: TriggerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}
