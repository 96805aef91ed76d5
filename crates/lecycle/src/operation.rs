//! Coordinated operation records

use crate::plan::{ComponentStatus, CoordinationPlan, DocumentOperation, OperationType, RegistryOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of one execution of a plan
///
/// `pending -> executing -> completed | failed -> rolled-back`. A completed operation
/// may still be rolled back on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Executing => "executing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// The operation's working copy of the plan's components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationComponents {
    pub document_operations: Vec<DocumentOperation>,
    pub registry_operations: Vec<RegistryOperation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub placeholder_ids: Vec<String>,
    pub document_paths: Vec<PathBuf>,
    pub approval_ids: Vec<String>,
    /// Holistic update run after the components completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_update_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
}

/// Why an operation failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    /// Error taxonomy name
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: OperationStatus,
    pub at: DateTime<Utc>,
}

/// Component counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounts {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub skipped: usize,
}

/// A live or historical execution of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatedOperation {
    pub operation_id: String,
    pub plan_id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub components: OperationComponents,
    pub metadata: OperationMetadata,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub status_history: Vec<StatusChange>,
}

impl CoordinatedOperation {
    pub(crate) fn from_plan(operation_id: String, plan: &CoordinationPlan) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            plan_id: plan.plan_id.clone(),
            operation_type: plan.operation_type,
            status: OperationStatus::Pending,
            components: OperationComponents {
                document_operations: plan.document_operations.clone(),
                registry_operations: plan.registry_operations.clone(),
            },
            metadata: OperationMetadata {
                placeholder_ids: plan.placeholder_ids.clone(),
                document_paths: plan.document_paths.clone(),
                ..OperationMetadata::default()
            },
            started_at: now,
            completed_at: None,
            error: None,
            status_history: vec![StatusChange {
                status: OperationStatus::Pending,
                at: now,
            }],
        }
    }

    pub(crate) fn transition(&mut self, status: OperationStatus) {
        let now = Utc::now();
        self.status = status;
        if matches!(
            status,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::RolledBack
        ) {
            self.completed_at = Some(now);
        }
        self.status_history.push(StatusChange { status, at: now });
    }

    /// Status of a component by ID
    pub fn component_status(&self, component_id: &str) -> Option<ComponentStatus> {
        self.components
            .document_operations
            .iter()
            .find(|op| op.operation_id == component_id)
            .map(|op| op.status)
            .or_else(|| {
                self.components
                    .registry_operations
                    .iter()
                    .find(|op| op.operation_id == component_id)
                    .map(|op| op.status)
            })
    }

    pub(crate) fn set_component(
        &mut self,
        component_id: &str,
        status: ComponentStatus,
        error: Option<String>,
    ) {
        if let Some(op) = self
            .components
            .document_operations
            .iter_mut()
            .find(|op| op.operation_id == component_id)
        {
            op.status = status;
            if error.is_some() {
                op.error = error;
            }
            return;
        }
        if let Some(op) = self
            .components
            .registry_operations
            .iter_mut()
            .find(|op| op.operation_id == component_id)
        {
            op.status = status;
            if error.is_some() {
                op.error = error;
            }
        }
    }

    fn statuses(&self) -> impl Iterator<Item = ComponentStatus> + '_ {
        self.components
            .document_operations
            .iter()
            .map(|op| op.status)
            .chain(self.components.registry_operations.iter().map(|op| op.status))
    }

    /// Whether every component completed
    pub fn all_components_completed(&self) -> bool {
        self.statuses().all(|s| s == ComponentStatus::Completed)
    }

    pub fn progress(&self) -> ProgressCounts {
        let mut counts = ProgressCounts::default();
        for status in self.statuses() {
            counts.total += 1;
            match status {
                ComponentStatus::Pending | ComponentStatus::Executing => counts.pending += 1,
                ComponentStatus::Completed => counts.completed += 1,
                ComponentStatus::Failed => counts.failed += 1,
                ComponentStatus::RolledBack => counts.rolled_back += 1,
                ComponentStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Whether `rollback_operation` would reverse anything
    pub fn rollback_available(&self) -> bool {
        matches!(
            self.status,
            OperationStatus::Completed | OperationStatus::Failed
        )
    }
}
