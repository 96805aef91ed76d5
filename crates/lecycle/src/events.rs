//! Coordination events broadcast to subscribers

use crate::plan::OperationType;
use serde::Serialize;

/// Progress notification; receivers that lag simply miss events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CoordinationEvent {
    PlanCreated {
        plan_id: String,
        operation_type: OperationType,
        components: usize,
        approval_gates: usize,
    },
    OperationStarted {
        operation_id: String,
        plan_id: String,
    },
    ApprovalRequested {
        operation_id: String,
        approval_id: String,
        gate_id: String,
    },
    ApprovalResolved {
        operation_id: String,
        approval_id: String,
        approved: bool,
    },
    ComponentCompleted {
        operation_id: String,
        component_id: String,
    },
    ComponentFailed {
        operation_id: String,
        component_id: String,
        error: String,
    },
    OperationCompleted {
        operation_id: String,
    },
    OperationFailed {
        operation_id: String,
        kind: String,
        message: String,
    },
    OperationRolledBack {
        operation_id: String,
        components: usize,
    },
}

impl CoordinationEvent {
    /// Operation the event belongs to, if any
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            CoordinationEvent::PlanCreated { .. } => None,
            CoordinationEvent::OperationStarted { operation_id, .. }
            | CoordinationEvent::ApprovalRequested { operation_id, .. }
            | CoordinationEvent::ApprovalResolved { operation_id, .. }
            | CoordinationEvent::ComponentCompleted { operation_id, .. }
            | CoordinationEvent::ComponentFailed { operation_id, .. }
            | CoordinationEvent::OperationCompleted { operation_id }
            | CoordinationEvent::OperationFailed { operation_id, .. }
            | CoordinationEvent::OperationRolledBack { operation_id, .. } => Some(operation_id),
        }
    }
}
