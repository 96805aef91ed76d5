// Service Container
//
// *Le Moteur* (The Engine) - builds every component once per workspace and hands out
// shared handles

use crate::config::EngineConfig;
use anyhow::{Context, Result};
use lecontexte::{
    HolisticMaintenanceReport, HolisticUpdateOrchestrator, HolisticUpdateRequest, ReindexOptions,
    TriggerType, UpdateError, UpdateErrorKind,
};
use lecycle::{CoordinationError, CoordinationEvent, LifecycleCoordinator, OperationStatus};
use lereprise::{ContextLayout, RollbackManager};
use letravail::{job_fn, JobContext, JobError, JobManager};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Job type running [`HolisticUpdateOrchestrator::full_repository_reindex`]
pub const JOB_FULL_REINDEX: &str = "full-repository-reindex";

/// Job type running [`HolisticUpdateOrchestrator::execute_holistic_update`]
pub const JOB_CONTEXT_UPDATE: &str = "holistic-context-update";

/// Job type running [`LifecycleCoordinator::execute_coordinated_operation`]
pub const JOB_COORDINATED_OPERATION: &str = "coordinated-operation";

/// Parameters of a holistic context update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextUpdateParams {
    pub changed_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,
    #[serde(default = "default_trigger")]
    pub trigger_type: TriggerType,
    /// Seconds; the configured default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_timeout: Option<u64>,
}

fn default_trigger() -> TriggerType {
    TriggerType::Manual
}

impl ContextUpdateParams {
    /// Orchestrator request, with `default_timeout` filling in a missing budget
    pub fn into_request(self, default_timeout: Duration) -> HolisticUpdateRequest {
        let timeout = self
            .performance_timeout
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        let request = HolisticUpdateRequest::new(self.changed_files, self.trigger_type, timeout);
        match self.git_commit_hash {
            Some(hash) => request.with_commit(hash),
            None => request,
        }
    }
}

/// Parameters of a full-repository reindex
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReindexParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Parameters of a coordinated operation job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OperationParams {
    pub plan_id: String,
}

/// Outcome of [`Engine::perform_maintenance`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    #[serde(flatten)]
    pub context: HolisticMaintenanceReport,
    /// Completed approval requests past retention
    pub trimmed_approvals: usize,
}

/// Owned services for one workspace
pub struct Engine {
    workspace_root: PathBuf,
    config: EngineConfig,
    rollback: Arc<RollbackManager>,
    context: Arc<HolisticUpdateOrchestrator>,
    coordinator: Arc<LifecycleCoordinator>,
    jobs: Arc<JobManager>,
}

impl Engine {
    /// Load `.lecoord/config.toml` from `workspace_root` and open the engine
    pub fn load(workspace_root: impl Into<PathBuf>) -> Result<Self> {
        let workspace_root = workspace_root.into();
        let config = EngineConfig::load(&workspace_root)?;
        Self::open(workspace_root, config)
    }

    /// Open the snapshot store and build every component
    pub fn open(workspace_root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        config.validate().context("Invalid engine configuration")?;
        let workspace_root = workspace_root.into();

        let layout = ContextLayout::new(workspace_root.clone(), config.holistic.context_dir.clone());
        let rollback = Arc::new(
            RollbackManager::open(layout, &config.rollback)
                .context("Failed to open snapshot store")?,
        );

        let context = Arc::new(HolisticUpdateOrchestrator::with_defaults(
            config.holistic.clone(),
            Arc::clone(&rollback),
        ));

        let coordinator = Arc::new(
            LifecycleCoordinator::with_defaults(config.coordination.clone(), Arc::clone(&rollback))
                .with_context_orchestrator(Arc::clone(&context)),
        );

        let mut jobs = JobManager::new(config.jobs.clone());
        register_runners(&mut jobs, &context, &coordinator);

        info!(
            "Engine ready for {} (job types: {})",
            workspace_root.display(),
            jobs.job_types().join(", ")
        );

        Ok(Self {
            workspace_root,
            config,
            rollback,
            context,
            coordinator,
            jobs: Arc::new(jobs),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rollback(&self) -> &Arc<RollbackManager> {
        &self.rollback
    }

    pub fn context(&self) -> &Arc<HolisticUpdateOrchestrator> {
        &self.context
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    /// Purge snapshots, update history and approval requests past retention
    pub fn perform_maintenance(
        &self,
        dry_run: bool,
    ) -> std::result::Result<MaintenanceSummary, UpdateError> {
        let context = self.context.perform_maintenance(dry_run)?;
        let trimmed_approvals = self.coordinator.perform_maintenance(dry_run);
        Ok(MaintenanceSummary {
            context,
            trimmed_approvals,
        })
    }

    /// Log every coordination event until the coordinator is dropped
    ///
    /// Must be called from inside a tokio runtime.
    pub fn spawn_event_log(&self) -> JoinHandle<()> {
        let mut events = self.coordinator.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event log fell behind, {} events dropped", missed)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn log_event(event: &CoordinationEvent) {
    match event {
        CoordinationEvent::PlanCreated {
            plan_id,
            operation_type,
            components,
            approval_gates,
        } => info!(
            "[event] plan {} created ({}, {} components, {} gates)",
            plan_id, operation_type, components, approval_gates
        ),
        CoordinationEvent::OperationStarted {
            operation_id,
            plan_id,
        } => info!("[event] operation {} started for {}", operation_id, plan_id),
        CoordinationEvent::ApprovalRequested {
            operation_id,
            approval_id,
            gate_id,
        } => info!(
            "[event] {} waiting on approval {} ({})",
            operation_id, approval_id, gate_id
        ),
        CoordinationEvent::ApprovalResolved {
            operation_id,
            approval_id,
            approved,
        } => info!(
            "[event] approval {} for {}: {}",
            approval_id,
            operation_id,
            if *approved { "approved" } else { "not approved" }
        ),
        CoordinationEvent::ComponentCompleted {
            operation_id,
            component_id,
        } => info!("[event] {} completed {}", operation_id, component_id),
        CoordinationEvent::ComponentFailed {
            operation_id,
            component_id,
            error,
        } => warn!(
            "[event] {} component {} failed: {}",
            operation_id, component_id, error
        ),
        CoordinationEvent::OperationCompleted { operation_id } => {
            info!("[event] operation {} completed", operation_id)
        }
        CoordinationEvent::OperationFailed {
            operation_id,
            kind,
            message,
        } => warn!("[event] operation {} failed ({}): {}", operation_id, kind, message),
        CoordinationEvent::OperationRolledBack {
            operation_id,
            components,
        } => info!(
            "[event] operation {} rolled back ({} components)",
            operation_id, components
        ),
    }
}

fn parse_params<T: DeserializeOwned>(parameters: Value) -> letravail::Result<T> {
    let parameters = if parameters.is_null() {
        Value::Object(Default::default())
    } else {
        parameters
    };
    Ok(serde_json::from_value(parameters)?)
}

fn to_result<T: Serialize>(value: &T) -> letravail::Result<Value> {
    serde_json::to_value(value).map_err(|e| JobError::Failed(format!("encoding result: {}", e)))
}

fn update_job_error(err: &UpdateError) -> JobError {
    match err.error_kind() {
        UpdateErrorKind::Cancelled => JobError::Cancelled,
        UpdateErrorKind::Timeout => JobError::Timeout(err.message().to_string()),
        UpdateErrorKind::Validation => JobError::InvalidParameters(err.message().to_string()),
        _ => JobError::Failed(err.to_string()),
    }
}

fn coordination_job_error(err: CoordinationError) -> JobError {
    match err.kind() {
        "ValidationError" => JobError::InvalidParameters(err.to_string()),
        "Cancelled" => JobError::Cancelled,
        "TimeoutError" => JobError::Timeout(err.to_string()),
        _ => JobError::Failed(format!("{}: {}", err.kind(), err)),
    }
}

fn register_runners(
    jobs: &mut JobManager,
    context: &Arc<HolisticUpdateOrchestrator>,
    coordinator: &Arc<LifecycleCoordinator>,
) {
    let orchestrator = Arc::clone(context);
    jobs.register_runner(
        JOB_FULL_REINDEX,
        job_fn(move |ctx: JobContext, parameters: Value| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let params: ReindexParams = parse_params(parameters)?;
                let options = ReindexOptions {
                    batch_size: params.batch_size,
                    timeout: params.timeout_secs.map(Duration::from_secs),
                };
                let report = orchestrator
                    .full_repository_reindex(options, Some(ctx.token()), ctx.progress())
                    .await
                    .map_err(|e| update_job_error(&e))?;
                if report.cancelled {
                    return Err(JobError::Cancelled);
                }
                ctx.report(100, "Reindex finished");
                to_result(&report)
            }
        }),
    );

    let orchestrator = Arc::clone(context);
    jobs.register_runner(
        JOB_CONTEXT_UPDATE,
        job_fn(move |ctx: JobContext, parameters: Value| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let params: ContextUpdateParams = parse_params(parameters)?;
                let request = params.into_request(orchestrator.config().default_timeout());
                ctx.report(0, "Updating context");
                let result = orchestrator
                    .execute_holistic_update(request, Some(ctx.token()))
                    .await;
                match (&result.error, result.success) {
                    (Some(err), false) => Err(match update_job_error(err) {
                        JobError::Failed(message) => {
                            JobError::Failed(format!("update {}: {}", result.update_id, message))
                        }
                        other => other,
                    }),
                    _ => {
                        ctx.report(100, "Context updated");
                        to_result(&result)
                    }
                }
            }
        }),
    );

    let coordinator = Arc::clone(coordinator);
    jobs.register_runner(
        JOB_COORDINATED_OPERATION,
        job_fn(move |ctx: JobContext, parameters: Value| {
            let coordinator = Arc::clone(&coordinator);
            async move {
                let params: OperationParams = parse_params(parameters)?;
                ctx.report(0, "Executing coordinated operation");
                let operation = coordinator
                    .execute_coordinated_operation(&params.plan_id, Some(ctx.token()))
                    .await
                    .map_err(coordination_job_error)?;

                if operation.status == OperationStatus::Completed {
                    ctx.report(100, "Operation completed");
                    return to_result(&operation);
                }
                match &operation.error {
                    Some(err) if err.kind == "Cancelled" => Err(JobError::Cancelled),
                    Some(err) => Err(JobError::Failed(format!(
                        "operation {} {} ({}): {}",
                        operation.operation_id, operation.status, err.kind, err.message
                    ))),
                    None => Err(JobError::Failed(format!(
                        "operation {} ended {}",
                        operation.operation_id, operation.status
                    ))),
                }
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_context_params_defaults() {
        let params: ContextUpdateParams =
            serde_json::from_value(json!({ "changedFiles": ["Analysis/x.cs"] })).unwrap();
        assert_eq!(params.trigger_type, TriggerType::Manual);

        let request = params.into_request(Duration::from_secs(15));
        assert_eq!(request.performance_timeout, Duration::from_secs(15));
        assert_eq!(request.git_commit_hash, None);
    }

    #[test]
    fn test_context_params_reject_unknown_fields() {
        let parsed = serde_json::from_value::<ContextUpdateParams>(
            json!({ "changedFiles": [], "timeout": 3 }),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_null_parameters_parse_as_empty_object() {
        let params: ReindexParams = parse_params(Value::Null).unwrap();
        assert_eq!(params, ReindexParams::default());
    }

    #[test]
    fn test_job_error_mapping() {
        assert_eq!(update_job_error(&UpdateError::cancelled()), JobError::Cancelled);
        assert!(matches!(
            update_job_error(&UpdateError::timeout("late")),
            JobError::Timeout(_)
        ));
        assert!(matches!(
            coordination_job_error(CoordinationError::Validation("bad".into())),
            JobError::InvalidParameters(_)
        ));
        assert!(matches!(
            coordination_job_error(CoordinationError::ConcurrencyConflict("x".into())),
            JobError::Failed(_)
        ));
    }

    #[test]
    fn test_open_registers_every_job_type() {
        let dir = tempdir().unwrap();
        let engine = Engine::load(dir.path()).unwrap();
        assert_eq!(
            engine.jobs().job_types(),
            vec![
                JOB_COORDINATED_OPERATION.to_string(),
                JOB_FULL_REINDEX.to_string(),
                JOB_CONTEXT_UPDATE.to_string(),
            ]
        );
        assert!(engine.rollback().store_root().starts_with(dir.path()));
    }

    #[test]
    fn test_maintenance_covers_approvals() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.coordination.approval_retention_hours = 0;
        let engine = Engine::open(dir.path(), config).unwrap();

        let approvals = engine.coordinator().approvals();
        let id = approvals
            .request_approval(lecycle::NewApproval {
                subject: "op-1/gate-1".into(),
                description: "archive".into(),
                minimum_approvals: 1,
                timeout: Duration::from_secs(60),
            })
            .unwrap()
            .approval_id;
        approvals
            .submit_response(&id, "reviewer", lecycle::ApprovalDecision::Rejected, None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let summary = engine.perform_maintenance(false).unwrap();
        assert_eq!(summary.trimmed_approvals, 1);
        assert!(!summary.context.dry_run);
        let encoded = serde_json::to_value(&summary).unwrap();
        assert_eq!(encoded["trimmedApprovals"], 1);
        assert!(encoded.get("trimmedHistory").is_some());
        assert!(approvals.get_status(&id).is_err());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.jobs.max_concurrent_jobs = 0;
        assert!(Engine::open(dir.path(), config).is_err());
    }
}
