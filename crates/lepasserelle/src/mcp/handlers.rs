// MCP Tool Handlers
//
// This module implements the handlers for each MCP tool that the server exposes.
// Arguments are decoded into typed requests before anything reaches the engine, and
// every result object carries `success` and a human-readable `summary`.

use super::protocol::{error_codes, JsonRpcError};
use crate::engine::{
    ContextUpdateParams, Engine, OperationParams, ReindexParams, JOB_CONTEXT_UPDATE,
    JOB_COORDINATED_OPERATION, JOB_FULL_REINDEX,
};
use crate::errors::rpc_error;
use lecontexte::TriggerType;
use lecycle::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, CoordinatedOperation, CoordinationError,
    OperationStatus, OperationType, PlanRequest,
};
use letravail::{JobError, JobRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Requester recorded on jobs started through the tool boundary
const REQUESTER: &str = "mcp";

/// Enum of all tool handlers
///
/// Instead of using trait objects (which don't work well with async),
/// we use an enum to dispatch to the appropriate handler.
#[derive(Clone)]
pub enum ToolHandler {
    /// Handler for plan creation
    CreatePlan(CreatePlanHandler),
    /// Handler for coordinated execution
    ExecuteOperation(ExecuteOperationHandler),
    /// Handler for operation status
    CoordinationStatus(CoordinationStatusHandler),
    /// Handler for operation rollback
    RollbackOperation(RollbackOperationHandler),
    /// Handler for holistic context updates
    HolisticUpdate(HolisticUpdateHandler),
    /// Handler for job status
    JobStatus(JobStatusHandler),
    /// Handler for job cancellation
    CancelJob(CancelJobHandler),
    /// Handler for holistic update rollback
    RollbackUpdate(RollbackUpdateHandler),
    /// Handler for full-repository reindex
    Reindex(ReindexHandler),
    /// Handler for approval responses
    SubmitApproval(SubmitApprovalHandler),
    /// Handler for approval status
    ApprovalStatus(ApprovalStatusHandler),
    /// Handler for holistic update history
    RecentUpdates(RecentUpdatesHandler),
    /// Handler for restorable snapshots
    PendingRollbacks(PendingRollbacksHandler),
    /// Handler for retention maintenance
    Maintenance(MaintenanceHandler),
}

impl ToolHandler {
    /// Every tool the server exposes
    pub fn all() -> Vec<ToolHandler> {
        vec![
            ToolHandler::CreatePlan(CreatePlanHandler),
            ToolHandler::ExecuteOperation(ExecuteOperationHandler),
            ToolHandler::CoordinationStatus(CoordinationStatusHandler),
            ToolHandler::RollbackOperation(RollbackOperationHandler),
            ToolHandler::HolisticUpdate(HolisticUpdateHandler),
            ToolHandler::JobStatus(JobStatusHandler),
            ToolHandler::CancelJob(CancelJobHandler),
            ToolHandler::RollbackUpdate(RollbackUpdateHandler),
            ToolHandler::Reindex(ReindexHandler),
            ToolHandler::SubmitApproval(SubmitApprovalHandler),
            ToolHandler::ApprovalStatus(ApprovalStatusHandler),
            ToolHandler::RecentUpdates(RecentUpdatesHandler),
            ToolHandler::PendingRollbacks(PendingRollbacksHandler),
            ToolHandler::Maintenance(MaintenanceHandler),
        ]
    }

    /// Get the tool name
    pub fn name(&self) -> &str {
        match self {
            ToolHandler::CreatePlan(h) => h.name(),
            ToolHandler::ExecuteOperation(h) => h.name(),
            ToolHandler::CoordinationStatus(h) => h.name(),
            ToolHandler::RollbackOperation(h) => h.name(),
            ToolHandler::HolisticUpdate(h) => h.name(),
            ToolHandler::JobStatus(h) => h.name(),
            ToolHandler::CancelJob(h) => h.name(),
            ToolHandler::RollbackUpdate(h) => h.name(),
            ToolHandler::Reindex(h) => h.name(),
            ToolHandler::SubmitApproval(h) => h.name(),
            ToolHandler::ApprovalStatus(h) => h.name(),
            ToolHandler::RecentUpdates(h) => h.name(),
            ToolHandler::PendingRollbacks(h) => h.name(),
            ToolHandler::Maintenance(h) => h.name(),
        }
    }

    /// Get the tool description
    pub fn description(&self) -> &str {
        match self {
            ToolHandler::CreatePlan(h) => h.description(),
            ToolHandler::ExecuteOperation(h) => h.description(),
            ToolHandler::CoordinationStatus(h) => h.description(),
            ToolHandler::RollbackOperation(h) => h.description(),
            ToolHandler::HolisticUpdate(h) => h.description(),
            ToolHandler::JobStatus(h) => h.description(),
            ToolHandler::CancelJob(h) => h.description(),
            ToolHandler::RollbackUpdate(h) => h.description(),
            ToolHandler::Reindex(h) => h.description(),
            ToolHandler::SubmitApproval(h) => h.description(),
            ToolHandler::ApprovalStatus(h) => h.description(),
            ToolHandler::RecentUpdates(h) => h.description(),
            ToolHandler::PendingRollbacks(h) => h.description(),
            ToolHandler::Maintenance(h) => h.description(),
        }
    }

    /// Get the tool argument schema
    pub fn argument_schema(&self) -> Value {
        match self {
            ToolHandler::CreatePlan(h) => h.argument_schema(),
            ToolHandler::ExecuteOperation(h) => h.argument_schema(),
            ToolHandler::CoordinationStatus(h) => h.argument_schema(),
            ToolHandler::RollbackOperation(h) => h.argument_schema(),
            ToolHandler::HolisticUpdate(h) => h.argument_schema(),
            ToolHandler::JobStatus(h) => h.argument_schema(),
            ToolHandler::CancelJob(h) => h.argument_schema(),
            ToolHandler::RollbackUpdate(h) => h.argument_schema(),
            ToolHandler::Reindex(h) => h.argument_schema(),
            ToolHandler::SubmitApproval(h) => h.argument_schema(),
            ToolHandler::ApprovalStatus(h) => h.argument_schema(),
            ToolHandler::RecentUpdates(h) => h.argument_schema(),
            ToolHandler::PendingRollbacks(h) => h.argument_schema(),
            ToolHandler::Maintenance(h) => h.argument_schema(),
        }
    }

    /// Execute the tool
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        match self {
            ToolHandler::CreatePlan(h) => h.execute(engine, args).await,
            ToolHandler::ExecuteOperation(h) => h.execute(engine, args).await,
            ToolHandler::CoordinationStatus(h) => h.execute(engine, args).await,
            ToolHandler::RollbackOperation(h) => h.execute(engine, args).await,
            ToolHandler::HolisticUpdate(h) => h.execute(engine, args).await,
            ToolHandler::JobStatus(h) => h.execute(engine, args).await,
            ToolHandler::CancelJob(h) => h.execute(engine, args).await,
            ToolHandler::RollbackUpdate(h) => h.execute(engine, args).await,
            ToolHandler::Reindex(h) => h.execute(engine, args).await,
            ToolHandler::SubmitApproval(h) => h.execute(engine, args).await,
            ToolHandler::ApprovalStatus(h) => h.execute(engine, args).await,
            ToolHandler::RecentUpdates(h) => h.execute(engine, args).await,
            ToolHandler::PendingRollbacks(h) => h.execute(engine, args).await,
            ToolHandler::Maintenance(h) => h.execute(engine, args).await,
        }
    }
}

/// Decode tool arguments into their typed request
fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, JsonRpcError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| {
        JsonRpcError::invalid_params_with_suggestion(
            format!("Invalid arguments: {}", e),
            "Check the tool's inputSchema from tools/list",
        )
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::internal_error(format!("Serialization error: {}", e)))
}

/// Result object with `success` and `summary` ahead of the tool-specific fields
fn tool_result(success: bool, summary: impl Into<String>, fields: Value) -> Value {
    let mut result = serde_json::Map::new();
    result.insert("success".to_string(), Value::Bool(success));
    result.insert("summary".to_string(), Value::String(summary.into()));
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            if key != "success" {
                result.insert(key, value);
            }
        }
    }
    Value::Object(result)
}

fn start_job(engine: &Engine, job_type: &str, parameters: Value) -> Value {
    let started = engine
        .jobs()
        .start_job(JobRequest::new(job_type, parameters, REQUESTER));
    let summary = match (&started.job_id, &started.reason) {
        (Some(job_id), _) => format!("Started {} job {}", job_type, job_id),
        (None, Some(reason)) => format!("Could not start {} job: {}", job_type, reason),
        (None, None) => format!("Could not start {} job", job_type),
    };
    tool_result(
        started.started,
        summary,
        json!({
            "jobId": started.job_id,
            "started": started.started,
            "reason": started.reason,
        }),
    )
}

fn operation_summary(operation: &CoordinatedOperation) -> Value {
    let components: Vec<Value> = operation
        .components
        .document_operations
        .iter()
        .map(|op| (&op.operation_id, op.status, &op.error))
        .chain(
            operation
                .components
                .registry_operations
                .iter()
                .map(|op| (&op.operation_id, op.status, &op.error)),
        )
        .map(|(id, status, error)| json!({ "componentId": id, "status": status, "error": error }))
        .collect();

    json!({
        "operationId": operation.operation_id,
        "planId": operation.plan_id,
        "status": operation.status,
        "components": components,
        "progress": operation.progress(),
        "rollbackAvailable": operation.rollback_available(),
        "error": operation.error,
        "metadata": operation.metadata,
    })
}

fn approval_summary(approval: &ApprovalRequest) -> String {
    let approvals = approval
        .responses
        .iter()
        .filter(|r| r.decision == ApprovalDecision::Approved)
        .count();
    match approval.status {
        ApprovalStatus::Pending => format!(
            "Approval {} pending ({}/{} approvals)",
            approval.approval_id, approvals, approval.minimum_approvals
        ),
        ApprovalStatus::Approved => format!("Approval {} approved", approval.approval_id),
        ApprovalStatus::Rejected => format!("Approval {} rejected", approval.approval_id),
        ApprovalStatus::Expired => format!("Approval {} expired", approval.approval_id),
    }
}

// ---------------------------------------------------------------------------
// Lifecycle coordination
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreatePlanArgs {
    operation_type: OperationType,
    #[serde(default)]
    placeholder_ids: Vec<String>,
    #[serde(default)]
    document_paths: Vec<PathBuf>,
    #[serde(default)]
    target_domain: Option<String>,
    #[serde(default)]
    migration_reason: Option<String>,
}

/// Handler for create-lifecycle-coordination-plan
#[derive(Clone)]
pub struct CreatePlanHandler;

impl CreatePlanHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "create-lifecycle-coordination-plan"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Plan a coordinated lifecycle operation: document moves and registry conversions ordered into atomic groups, with approval gates and a rollback strategy."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operationType": {
                    "type": "string",
                    "enum": OperationType::all().iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                    "description": "Kind of lifecycle operation"
                },
                "placeholderIds": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Placeholder IDs to convert into capability IDs"
                },
                "documentPaths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace-relative documents to migrate or restructure"
                },
                "targetDomain": {
                    "type": "string",
                    "description": "Domain the documents and capabilities move into"
                },
                "migrationReason": {
                    "type": "string",
                    "description": "Why the change is made (shown to approvers)"
                }
            },
            "required": ["operationType"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: CreatePlanArgs = parse_args(args)?;
        let request = PlanRequest {
            operation_type: args.operation_type,
            placeholder_ids: args.placeholder_ids,
            document_paths: args.document_paths,
            target_domain: args.target_domain,
            migration_reason: args.migration_reason,
        };

        let plan = engine
            .coordinator()
            .create_coordination_plan(request)
            .map_err(|e| rpc_error(e, json!({})))?;

        let summary = format!(
            "Plan {} created: {} document operations, {} registry operations, {} approval gates",
            plan.plan_id,
            plan.document_operations.len(),
            plan.registry_operations.len(),
            plan.approval_gates.len()
        );
        Ok(tool_result(
            true,
            summary,
            json!({
                "planId": plan.plan_id,
                "operationType": plan.operation_type,
                "documentOperations": plan.document_operations.len(),
                "registryOperations": plan.registry_operations.len(),
                "approvalGates": plan.approval_gates.len(),
                "rollbackStrategy": {
                    "rollbackOrder": plan.rollback_strategy.rollback_order,
                    "atomicGroups": plan.rollback_strategy.atomic_groups.len(),
                    "rollbackTimeoutSecs": plan.rollback_strategy.rollback_timeout_secs,
                },
                "expectedDurationSecs": plan.expected_duration_secs,
                "plan": encode(&plan)?,
            }),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExecuteOperationArgs {
    plan_id: String,
    #[serde(default)]
    run_as_job: bool,
}

/// Handler for execute-coordinated-operation
#[derive(Clone)]
pub struct ExecuteOperationHandler;

impl ExecuteOperationHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "execute-coordinated-operation"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Execute a coordination plan. Waits at approval gates; any failure rolls back every completed component. Set runAsJob to return a job ID immediately."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "planId": {
                    "type": "string",
                    "description": "Plan returned by create-lifecycle-coordination-plan"
                },
                "runAsJob": {
                    "type": "boolean",
                    "description": "Run in the background and return a job ID (default: false)",
                    "default": false
                }
            },
            "required": ["planId"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: ExecuteOperationArgs = parse_args(args)?;
        let ids = json!({ "planId": args.plan_id });

        if engine.coordinator().get_plan(&args.plan_id).is_none() {
            return Err(rpc_error(
                CoordinationError::NotFound {
                    what: "Plan",
                    id: args.plan_id,
                },
                ids,
            ));
        }

        if args.run_as_job {
            let params = encode(&OperationParams {
                plan_id: args.plan_id,
            })?;
            return Ok(start_job(engine, JOB_COORDINATED_OPERATION, params));
        }

        let operation = engine
            .coordinator()
            .execute_coordinated_operation(&args.plan_id, None)
            .await
            .map_err(|e| rpc_error(e, ids))?;

        let success = operation.status == OperationStatus::Completed;
        let summary = match &operation.error {
            None => format!(
                "Operation {} {} ({} components)",
                operation.operation_id,
                operation.status,
                operation.progress().total
            ),
            Some(err) => format!(
                "Operation {} {} after {}: {}",
                operation.operation_id, operation.status, err.kind, err.message
            ),
        };
        Ok(tool_result(success, summary, operation_summary(&operation)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OperationIdArgs {
    operation_id: String,
}

/// Handler for get-coordination-status
#[derive(Clone)]
pub struct CoordinationStatusHandler;

impl CoordinationStatusHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "get-coordination-status"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Status, per-component progress and rollback availability of a coordinated operation."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operationId": {
                    "type": "string",
                    "description": "Operation returned by execute-coordinated-operation"
                }
            },
            "required": ["operationId"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: OperationIdArgs = parse_args(args)?;
        let operation = engine
            .coordinator()
            .get_operation_status(&args.operation_id)
            .ok_or_else(|| {
                rpc_error(
                    CoordinationError::NotFound {
                        what: "Operation",
                        id: args.operation_id.clone(),
                    },
                    json!({ "operationId": args.operation_id }),
                )
            })?;

        let progress = operation.progress();
        let summary = format!(
            "Operation {} is {}: {}/{} components completed",
            operation.operation_id, operation.status, progress.completed, progress.total
        );
        let mut fields = operation_summary(&operation);
        fields["operation"] = encode(&operation)?;
        Ok(tool_result(true, summary, fields))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RollbackOperationArgs {
    operation_id: String,
    #[serde(default)]
    rollback_reason: Option<String>,
}

/// Handler for rollback-coordinated-operation
#[derive(Clone)]
pub struct RollbackOperationHandler;

impl RollbackOperationHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "rollback-coordinated-operation"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Restore every component of a completed or failed coordinated operation, including its context update. Safe to call twice."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operationId": {
                    "type": "string",
                    "description": "Operation to roll back"
                },
                "rollbackReason": {
                    "type": "string",
                    "description": "Recorded on the operation"
                }
            },
            "required": ["operationId"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: RollbackOperationArgs = parse_args(args)?;
        let ids = json!({ "operationId": args.operation_id });

        let rolled_back = engine
            .coordinator()
            .rollback_operation(&args.operation_id, args.rollback_reason)
            .map_err(|e| rpc_error(e, ids))?;

        if !rolled_back {
            return Ok(tool_result(
                false,
                format!(
                    "Operation {} has not started; nothing to roll back",
                    args.operation_id
                ),
                json!({
                    "operationId": args.operation_id,
                    "rolledBack": false,
                    "recommendations": ["Execute the plan or discard it"],
                }),
            ));
        }

        let mut recommendations = vec![
            "Verify the restored documents and capability registry".to_string(),
            "Create a new plan to retry the change".to_string(),
        ];
        let operation = engine.coordinator().get_operation_status(&args.operation_id);
        if let Some(update_id) = operation
            .as_ref()
            .and_then(|op| op.metadata.context_update_id.as_ref())
        {
            recommendations.push(format!(
                "Context update {} was restored as well",
                update_id
            ));
        }

        Ok(tool_result(
            true,
            format!("Operation {} rolled back", args.operation_id),
            json!({
                "operationId": args.operation_id,
                "rolledBack": true,
                "status": operation.map(|op| op.status),
                "recommendations": recommendations,
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Holistic context updates
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HolisticUpdateArgs {
    changed_files: Vec<PathBuf>,
    #[serde(default)]
    git_commit_hash: Option<String>,
    #[serde(default)]
    trigger_type: Option<TriggerType>,
    #[serde(default)]
    performance_timeout: Option<u64>,
    #[serde(default)]
    run_as_job: bool,
}

/// Handler for execute-holistic-context-update
#[derive(Clone)]
pub struct HolisticUpdateHandler;

impl HolisticUpdateHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "execute-holistic-context-update"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Regenerate the context of every domain touched by the changed files, atomically and within a time budget. Set runAsJob to return a job ID immediately."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "changedFiles": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Changed source files, workspace-relative"
                },
                "gitCommitHash": {
                    "type": "string",
                    "description": "Commit the change belongs to"
                },
                "triggerType": {
                    "type": "string",
                    "enum": ["manual", "git-hook", "scheduled", "coordinated"],
                    "default": "manual"
                },
                "performanceTimeout": {
                    "type": "integer",
                    "description": "Soft budget in seconds (default: configured timeout)",
                    "minimum": 1
                },
                "runAsJob": {
                    "type": "boolean",
                    "default": false
                }
            },
            "required": ["changedFiles"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: HolisticUpdateArgs = parse_args(args)?;
        let params = ContextUpdateParams {
            changed_files: args.changed_files,
            git_commit_hash: args.git_commit_hash,
            trigger_type: args.trigger_type.unwrap_or(TriggerType::Manual),
            performance_timeout: args.performance_timeout,
        };

        if args.run_as_job {
            return Ok(start_job(engine, JOB_CONTEXT_UPDATE, encode(&params)?));
        }

        let context = engine.context();
        let request = params.into_request(context.config().default_timeout());
        let result = context.execute_holistic_update(request, None).await;

        let summary = match &result.error {
            None if result.affected_domains.is_empty() => {
                format!("Update {}: no domain affected", result.update_id)
            }
            None => format!(
                "Update {} regenerated {} domain(s) in {} ms",
                result.update_id,
                result.affected_domains.len(),
                result.execution_time
            ),
            Some(err) => format!(
                "Update {} failed ({}): {}{}",
                result.update_id,
                err.kind(),
                err.message(),
                if result.rolled_back {
                    "; previous context restored"
                } else {
                    ""
                }
            ),
        };
        Ok(tool_result(result.success, summary, encode(&result)?))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RollbackUpdateArgs {
    update_id: String,
    #[serde(default = "default_true")]
    validate_before_rollback: bool,
}

fn default_true() -> bool {
    true
}

/// Handler for rollback-holistic-update
#[derive(Clone)]
pub struct RollbackUpdateHandler;

impl RollbackUpdateHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "rollback-holistic-update"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Restore the context that existed before a holistic update."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "updateId": {
                    "type": "string",
                    "description": "Update returned by execute-holistic-context-update"
                },
                "validateBeforeRollback": {
                    "type": "boolean",
                    "description": "Verify the snapshot before writing anything (default: true)",
                    "default": true
                }
            },
            "required": ["updateId"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: RollbackUpdateArgs = parse_args(args)?;
        let report = engine
            .context()
            .rollback_update(&args.update_id, args.validate_before_rollback)
            .map_err(|e| rpc_error(e, json!({ "updateId": args.update_id })))?;

        let summary = format!(
            "Update {} rolled back: {} files restored, {} removed",
            args.update_id,
            report.restored_files.len(),
            report.removed_files.len()
        );
        Ok(tool_result(true, summary, encode(&report)?))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RecentUpdatesArgs {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

/// Handler for get-recent-holistic-updates
#[derive(Clone)]
pub struct RecentUpdatesHandler;

impl RecentUpdatesHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "get-recent-holistic-updates"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Most recent holistic update results, newest first."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "default": 10,
                    "minimum": 1,
                    "maximum": 100
                }
            },
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: RecentUpdatesArgs = parse_args(args)?;
        let updates = engine.context().get_recent_update_status(args.limit);
        Ok(tool_result(
            true,
            format!("{} recent update(s)", updates.len()),
            json!({ "updates": encode(&updates)? }),
        ))
    }
}

/// Handler for list-pending-rollbacks
#[derive(Clone)]
pub struct PendingRollbacksHandler;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

impl PendingRollbacksHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "list-pending-rollbacks"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Snapshots that can still be restored."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let _: NoArgs = parse_args(args)?;
        let snapshots = engine.rollback().get_pending_rollbacks();
        Ok(tool_result(
            true,
            format!("{} restorable snapshot(s)", snapshots.len()),
            json!({ "snapshots": encode(&snapshots)? }),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MaintenanceArgs {
    #[serde(default)]
    dry_run: bool,
}

/// Handler for perform-maintenance
#[derive(Clone)]
pub struct MaintenanceHandler;

impl MaintenanceHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "perform-maintenance"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Purge snapshots, update history and decided approvals past retention. dryRun reports without deleting."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dryRun": { "type": "boolean", "default": false }
            },
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: MaintenanceArgs = parse_args(args)?;
        let report = engine
            .perform_maintenance(args.dry_run)
            .map_err(|e| rpc_error(e, json!({})))?;

        let verb = if report.context.dry_run { "would purge" } else { "purged" };
        let summary = format!(
            "Maintenance {} {} snapshot(s), {} update record(s) and {} approval request(s)",
            verb,
            report.context.rollback.purged_snapshots.len(),
            report.context.trimmed_history,
            report.trimmed_approvals
        );
        Ok(tool_result(true, summary, encode(&report)?))
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JobStatusArgs {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

/// Handler for get-job-status
#[derive(Clone)]
pub struct JobStatusHandler;

impl JobStatusHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "get-job-status"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "One job by ID, or the active and recently finished jobs."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "jobId": { "type": "string" },
                "limit": {
                    "type": "integer",
                    "description": "Recent jobs to list when no jobId is given (default: 10)",
                    "default": 10
                }
            },
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: JobStatusArgs = parse_args(args)?;
        let jobs = engine.jobs();

        match args.job_id {
            Some(job_id) => {
                let job = jobs.get_job_status(&job_id).ok_or_else(|| {
                    rpc_error(
                        JobError::NotFound(job_id.clone()),
                        json!({ "jobId": job_id }),
                    )
                })?;
                let summary = format!(
                    "Job {} ({}) is {} at {}%",
                    job.job_id, job.job_type, job.status, job.progress.current
                );
                Ok(tool_result(true, summary, json!({ "job": encode(&job)? })))
            }
            None => {
                let active = jobs.get_active_jobs();
                let recent = jobs.get_recent_jobs(args.limit);
                Ok(tool_result(
                    true,
                    format!("{} active job(s), {} recent", active.len(), recent.len()),
                    json!({
                        "activeJobs": encode(&active)?,
                        "recentJobs": encode(&recent)?,
                    }),
                ))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JobIdArgs {
    job_id: String,
}

/// Handler for cancel-job
#[derive(Clone)]
pub struct CancelJobHandler;

impl CancelJobHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "cancel-job"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Request cooperative cancellation of a queued or running job."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "jobId": { "type": "string" }
            },
            "required": ["jobId"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: JobIdArgs = parse_args(args)?;
        let jobs = engine.jobs();

        if jobs.cancel_job(&args.job_id) {
            return Ok(tool_result(
                true,
                format!("Cancellation requested for job {}", args.job_id),
                json!({ "jobId": args.job_id }),
            ));
        }

        match jobs.get_job_status(&args.job_id) {
            Some(job) => Ok(tool_result(
                false,
                format!("Job {} already {}", job.job_id, job.status),
                json!({ "jobId": job.job_id, "status": job.status }),
            )),
            None => Err(rpc_error(
                JobError::NotFound(args.job_id.clone()),
                json!({ "jobId": args.job_id }),
            )),
        }
    }
}

/// Handler for start-full-repository-reindex
#[derive(Clone)]
pub struct ReindexHandler;

impl ReindexHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "start-full-repository-reindex"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Start a background reindex of every source file. Not atomic: failed batches are reported, not rolled back."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "batchSize": {
                    "type": "integer",
                    "description": "Files per batch (default: configured batch size)",
                    "minimum": 1
                },
                "timeoutSecs": {
                    "type": "integer",
                    "description": "Soft budget for the whole run (default: unbounded)",
                    "minimum": 1
                }
            },
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let params: ReindexParams = parse_args(args)?;
        Ok(start_job(engine, JOB_FULL_REINDEX, encode(&params)?))
    }
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubmitApprovalArgs {
    approval_id: String,
    approver: String,
    decision: ApprovalDecision,
    #[serde(default)]
    comment: Option<String>,
}

/// Handler for submit-approval-response
#[derive(Clone)]
pub struct SubmitApprovalHandler;

impl SubmitApprovalHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "submit-approval-response"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "Approve or reject a pending approval gate. One rejection decides; approvals count once per approver."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "approvalId": { "type": "string" },
                "approver": { "type": "string" },
                "decision": { "type": "string", "enum": ["approved", "rejected"] },
                "comment": { "type": "string" }
            },
            "required": ["approvalId", "approver", "decision"],
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: SubmitApprovalArgs = parse_args(args)?;
        let approval = engine
            .coordinator()
            .approvals()
            .submit_response(&args.approval_id, &args.approver, args.decision, args.comment)
            .map_err(|e| rpc_error(e, json!({ "approvalId": args.approval_id })))?;

        Ok(tool_result(
            true,
            approval_summary(&approval),
            json!({ "approval": encode(&approval)? }),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApprovalStatusArgs {
    #[serde(default)]
    approval_id: Option<String>,
}

/// Handler for get-approval-status
#[derive(Clone)]
pub struct ApprovalStatusHandler;

impl ApprovalStatusHandler {
    /// Returns the name of this RPC method
    pub fn name(&self) -> &str {
        "get-approval-status"
    }

    /// Returns the description of this RPC method
    pub fn description(&self) -> &str {
        "One approval request by ID, or every request still waiting for responses."
    }

    /// Returns the JSON schema for the arguments of this RPC method
    pub fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "approvalId": { "type": "string" }
            },
            "additionalProperties": false
        })
    }

    /// Executes the RPC method
    pub async fn execute(&self, engine: &Engine, args: Value) -> Result<Value, JsonRpcError> {
        let args: ApprovalStatusArgs = parse_args(args)?;
        let approvals = engine.coordinator().approvals();

        match args.approval_id {
            Some(approval_id) => {
                let approval = approvals
                    .get_status(&approval_id)
                    .map_err(|e| rpc_error(e, json!({ "approvalId": approval_id })))?;
                Ok(tool_result(
                    true,
                    approval_summary(&approval),
                    json!({ "approval": encode(&approval)? }),
                ))
            }
            None => {
                let pending = approvals.pending();
                Ok(tool_result(
                    true,
                    format!("{} approval(s) pending", pending.len()),
                    json!({ "pending": encode(&pending)? }),
                ))
            }
        }
    }
}

/// Map a tool error onto the `isError` payload returned inside a successful response
pub fn error_payload(err: &JsonRpcError) -> Value {
    json!({
        "success": false,
        "summary": err.message,
        "error": {
            "code": err.code,
            "kind": err.kind().unwrap_or(match err.code {
                error_codes::INVALID_PARAMS => "ValidationError",
                _ => "InternalError",
            }),
            "message": err.message,
            "data": err.data,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let engine = Engine::load(dir.path()).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_handler_names_are_unique() {
        let handlers = ToolHandler::all();
        let names: HashSet<&str> = handlers.iter().map(|h| h.name()).collect();
        assert_eq!(names.len(), 14);
        assert!(names.contains("create-lifecycle-coordination-plan"));
        assert!(names.contains("rollback-holistic-update"));
    }

    #[test]
    fn test_argument_schemas() {
        for handler in ToolHandler::all() {
            let schema = handler.argument_schema();
            assert_eq!(schema["type"], "object", "{}", handler.name());
            assert_eq!(schema["additionalProperties"], false, "{}", handler.name());
        }
    }

    #[test]
    fn test_tool_result_puts_success_first() {
        let result = tool_result(false, "nope", json!({ "success": true, "id": 1 }));
        assert_eq!(result["success"], false);
        assert_eq!(result["summary"], "nope");
        assert_eq!(result["id"], 1);
    }

    #[rstest]
    #[case(json!({ "planId": "p", "extra": 1 }))]
    #[case(json!({}))]
    #[case(json!({ "planId": 7 }))]
    fn test_invalid_arguments_are_rejected(#[case] args: Value) {
        let err = parse_args::<ExecuteOperationArgs>(args).unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_plan_is_validation_error() {
        let (_dir, engine) = engine();
        let err = ExecuteOperationHandler
            .execute(&engine, json!({ "planId": "plan-missing" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::VALIDATION_ERROR);
        assert_eq!(err.data.unwrap()["ids"]["planId"], "plan-missing");
    }

    #[tokio::test]
    async fn test_unknown_job_cannot_be_cancelled() {
        let (_dir, engine) = engine();
        let err = CancelJobHandler
            .execute(&engine, json!({ "jobId": "job-missing" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some("ValidationError"));
    }

    #[tokio::test]
    async fn test_unmapped_update_succeeds() {
        let (_dir, engine) = engine();
        let result = HolisticUpdateHandler
            .execute(&engine, json!({ "changedFiles": ["README.md"] }))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert!(result["summary"].as_str().unwrap().contains("no domain"));
        assert_eq!(result["affectedDomains"], json!([]));
    }

    #[tokio::test]
    async fn test_empty_update_reports_failure() {
        let (_dir, engine) = engine();
        let result = HolisticUpdateHandler
            .execute(&engine, json!({ "changedFiles": [] }))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["error"]["kind"], "ValidationError");
    }

    #[tokio::test]
    async fn test_listing_tools_need_no_arguments() {
        let (_dir, engine) = engine();
        for handler in [
            ToolHandler::PendingRollbacks(PendingRollbacksHandler),
            ToolHandler::RecentUpdates(RecentUpdatesHandler),
            ToolHandler::JobStatus(JobStatusHandler),
            ToolHandler::ApprovalStatus(ApprovalStatusHandler),
            ToolHandler::Maintenance(MaintenanceHandler),
        ] {
            let result = handler.execute(&engine, Value::Null).await.unwrap();
            assert_eq!(result["success"], true, "{}", handler.name());
        }
    }

    #[test]
    fn test_error_payload() {
        let payload = error_payload(&JsonRpcError::invalid_params("bad"));
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error"]["kind"], "ValidationError");
    }
}
