// Error Mapping
//
// *La Gestion des Erreurs* (The Error Management) - typed engine errors and their
// JSON-RPC representation

use crate::mcp::protocol::{error_codes, JsonRpcError};
use lecontexte::UpdateError;
use lecycle::CoordinationError;
use lereprise::RollbackError;
use letravail::JobError;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Any engine error that can reach the tool-call boundary
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Lifecycle coordinator failure
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Holistic update failure
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// Snapshot store failure
    #[error(transparent)]
    Rollback(#[from] RollbackError),

    /// Job registry failure
    #[error(transparent)]
    Job(#[from] JobError),
}

impl GatewayError {
    /// Error taxonomy name
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Coordination(e) => e.kind(),
            GatewayError::Update(e) => e.kind(),
            GatewayError::Rollback(e) => e.kind(),
            GatewayError::Job(e) => e.kind(),
        }
    }

    /// Whether files may be left half-restored
    pub fn requires_manual_intervention(&self) -> bool {
        match self {
            GatewayError::Rollback(e) => e.requires_manual_intervention(),
            _ => false,
        }
    }

    /// What the caller can do next
    pub fn suggestion(&self) -> &'static str {
        if self.requires_manual_intervention() {
            return "Files may be partially restored; inspect the snapshot store and restore manually";
        }
        match self.kind() {
            "ValidationError" => "Correct the request arguments or identifiers and retry",
            "ConcurrencyConflict" => "Wait for the overlapping operation to finish, then retry",
            "ExecutionError" => "The operation was rolled back; fix the failing component and retry",
            "RollbackError" => "Automatic restore failed; inspect the snapshot store before retrying",
            "TimeoutError" => "Retry with a larger budget or a smaller change set",
            "ApprovalRejectedError" => "Revise the plan and request approval again",
            "ApprovalExpiredError" => "Re-run the operation and respond before the approval deadline",
            "Cancelled" => "Re-run the operation when ready",
            _ => "Check the server log for details",
        }
    }

    /// JSON-RPC error carrying the kind, the relevant IDs and a suggestion
    pub fn to_rpc_error(&self, ids: Value) -> JsonRpcError {
        let kind = self.kind();
        JsonRpcError::with_data(
            error_codes::for_kind(kind),
            self.to_string(),
            json!({
                "kind": kind,
                "ids": ids,
                "suggestion": self.suggestion(),
                "manualIntervention": self.requires_manual_intervention(),
            }),
        )
    }
}

/// Convert any engine error into a JSON-RPC error tagged with `ids`
pub fn rpc_error(err: impl Into<GatewayError>, ids: Value) -> JsonRpcError {
    err.into().to_rpc_error(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CoordinationError::Validation("bad".into()).into(), -32001, "ValidationError")]
    #[case(CoordinationError::ConcurrencyConflict("docs/a.md".into()).into(), -32002, "ConcurrencyConflict")]
    #[case(CoordinationError::Rollback("missing".into()).into(), -32004, "RollbackError")]
    #[case(CoordinationError::ApprovalExpired { approval_id: "a".into() }.into(), -32007, "ApprovalExpiredError")]
    #[case(UpdateError::timeout("budget").into(), -32005, "TimeoutError")]
    #[case(JobError::NotFound("job-1".into()).into(), -32001, "ValidationError")]
    #[case(JobError::Cancelled.into(), -32008, "Cancelled")]
    fn test_rpc_codes(#[case] err: GatewayError, #[case] code: i32, #[case] kind: &str) {
        let rpc = err.to_rpc_error(json!({ "operationId": "op-1" }));
        assert_eq!(rpc.code, code);
        assert_eq!(rpc.kind(), Some(kind));
        let data = rpc.data.unwrap();
        assert_eq!(data["ids"]["operationId"], "op-1");
        assert!(data["suggestion"].as_str().is_some());
    }

    #[test]
    fn test_failed_restore_needs_manual_intervention() {
        let err: GatewayError = RollbackError::RestoreWrite {
            path: "docs/a.md".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
        .into();
        assert!(err.requires_manual_intervention());
        let rpc = err.to_rpc_error(json!({}));
        assert_eq!(rpc.data.unwrap()["manualIntervention"], true);
    }
}
