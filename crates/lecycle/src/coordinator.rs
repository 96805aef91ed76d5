//! Lifecycle coordination
//!
//! Executes a plan group by group. Every component is preceded by a pre-image snapshot
//! of the paths it may touch; on failure the completed components are restored from
//! those snapshots in reverse forward order, which leaves documents and registry
//! exactly as they were before execution.

use crate::approval::{ApprovalStatus, ApprovalWorkflow, InMemoryApprovalWorkflow, NewApproval};
use crate::documents::{DocumentExecutor, FsDocumentExecutor};
use crate::error::{CoordinationError, Result};
use crate::events::CoordinationEvent;
use crate::operation::{CoordinatedOperation, OperationError, OperationStatus};
use crate::plan::{ApprovalGate, ComponentStatus, CoordinationPlan, RegistryOperationKind};
use crate::planner::{build_plan, validate_request, PlanRequest, PlannerSettings};
use crate::registry::{JsonRegistryStore, RegistryStore};
use lecontexte::{HolisticUpdateOrchestrator, HolisticUpdateRequest, PathSegmentResolver, TriggerType};
use lereprise::{RollbackManager, SnapshotStatus};
use letravail::CancellationToken;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default approval gate timeout (1 hour)
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 3600;

/// Default rollback budget; exceeding it is logged, not enforced
pub const DEFAULT_ROLLBACK_TIMEOUT_SECS: u64 = 300;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Documentation root; its first-level directories are domains
    pub docs_root: PathBuf,

    /// Where archived documents are moved to
    pub archive_dir: PathBuf,

    /// Capability registry file
    pub registry_file: PathBuf,

    /// How long an approval gate waits for a decision
    pub approval_timeout_secs: u64,

    /// How often a waiting gate polls the approval workflow
    pub approval_poll_interval_ms: u64,

    /// Approvals required per gate
    pub minimum_approvals: u32,

    /// Buffered events per subscriber
    pub event_capacity: usize,

    /// Regenerate the context of touched domains after a successful operation
    pub regenerate_context: bool,

    /// Budget for compensating a failed operation
    pub rollback_timeout_secs: u64,

    /// How long completed approval requests are kept
    pub approval_retention_hours: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            docs_root: PathBuf::from("docs"),
            archive_dir: PathBuf::from("docs/archive"),
            registry_file: PathBuf::from("docs/capability-registry.json"),
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            approval_poll_interval_ms: 500,
            minimum_approvals: 1,
            event_capacity: 256,
            regenerate_context: true,
            rollback_timeout_secs: DEFAULT_ROLLBACK_TIMEOUT_SECS,
            approval_retention_hours: lereprise::DEFAULT_RETENTION_HOURS,
        }
    }
}

impl CoordinationConfig {
    fn planner_settings(&self) -> PlannerSettings {
        PlannerSettings {
            docs_root: self.docs_root.clone(),
            minimum_approvals: self.minimum_approvals,
            approval_timeout_secs: self.approval_timeout_secs,
            rollback_timeout_secs: self.rollback_timeout_secs,
        }
    }
}

/// Failure of a forward execution
struct Failure {
    error: CoordinationError,
    component: Option<String>,
}

impl From<CoordinationError> for Failure {
    fn from(error: CoordinationError) -> Self {
        Self {
            error,
            component: None,
        }
    }
}

/// Resources held by one execution; released on drop
struct ResourceClaim<'a> {
    claims: &'a Mutex<HashMap<String, String>>,
    keys: Vec<String>,
}

impl Drop for ResourceClaim<'_> {
    fn drop(&mut self) {
        let mut claims = self.claims.lock();
        for key in &self.keys {
            claims.remove(key);
        }
    }
}

/// Marks an operation as having a forward or rollback execution in flight
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    operation_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.operation_id);
    }
}

/// Plans and executes approval-gated, rollback-capable multi-component operations
pub struct LifecycleCoordinator {
    config: CoordinationConfig,
    rollback: Arc<RollbackManager>,
    documents: Arc<dyn DocumentExecutor>,
    registry: Arc<dyn RegistryStore>,
    approvals: Arc<dyn ApprovalWorkflow>,
    context: Option<Arc<HolisticUpdateOrchestrator>>,
    resolver: PathSegmentResolver,
    plans: Mutex<HashMap<String, CoordinationPlan>>,
    operations: Mutex<HashMap<String, CoordinatedOperation>>,
    claims: Mutex<HashMap<String, String>>,
    in_flight: Mutex<HashSet<String>>,
    events: broadcast::Sender<CoordinationEvent>,
}

impl LifecycleCoordinator {
    /// Coordinator over explicit collaborators
    pub fn new(
        config: CoordinationConfig,
        rollback: Arc<RollbackManager>,
        documents: Arc<dyn DocumentExecutor>,
        registry: Arc<dyn RegistryStore>,
        approvals: Arc<dyn ApprovalWorkflow>,
    ) -> Self {
        let resolver = PathSegmentResolver::new(
            rollback.layout().workspace_root(),
            vec![config.docs_root.clone()],
        );
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            rollback,
            documents,
            registry,
            approvals,
            context: None,
            resolver,
            plans: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            claims: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Coordinator with filesystem documents, a JSON registry and in-memory approvals
    pub fn with_defaults(config: CoordinationConfig, rollback: Arc<RollbackManager>) -> Self {
        let root = rollback.layout().workspace_root().to_path_buf();
        let documents = FsDocumentExecutor::new(&root, &config.docs_root, &config.archive_dir);
        let registry = JsonRegistryStore::new(&root, &config.registry_file);
        Self::new(
            config,
            rollback,
            Arc::new(documents),
            Arc::new(registry),
            Arc::new(InMemoryApprovalWorkflow::new()),
        )
    }

    /// Regenerate context through `orchestrator` after successful operations
    pub fn with_context_orchestrator(mut self, orchestrator: Arc<HolisticUpdateOrchestrator>) -> Self {
        self.context = Some(orchestrator);
        self
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Approval workflow gates are resolved against
    pub fn approvals(&self) -> &Arc<dyn ApprovalWorkflow> {
        &self.approvals
    }

    /// Register an observer; events sent before this call are not replayed
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CoordinationEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Build and store a plan for `request`
    pub fn create_coordination_plan(&self, request: PlanRequest) -> Result<CoordinationPlan> {
        validate_request(&request)?;

        let capability_ids = if request.placeholder_ids.is_empty() {
            Vec::new()
        } else {
            let domain = request.target_domain.as_deref().unwrap_or_default();
            self.registry
                .propose_capability_ids(&request.placeholder_ids, domain)?
        };

        let plan_id = format!("plan-{}", uuid::Uuid::new_v4());
        let plan = build_plan(
            plan_id,
            &request,
            &capability_ids,
            &self.config.planner_settings(),
            &self.resolver,
        )?;

        info!(
            "Plan {} created: {} ({} document ops, {} registry ops, {} gates)",
            plan.plan_id,
            plan.operation_type,
            plan.document_operations.len(),
            plan.registry_operations.len(),
            plan.approval_gates.len()
        );
        self.emit(CoordinationEvent::PlanCreated {
            plan_id: plan.plan_id.clone(),
            operation_type: plan.operation_type,
            components: plan.component_ids().len(),
            approval_gates: plan.approval_gates.len(),
        });

        self.plans.lock().insert(plan.plan_id.clone(), plan.clone());
        Ok(plan)
    }

    pub fn get_plan(&self, plan_id: &str) -> Option<CoordinationPlan> {
        self.plans.lock().get(plan_id).cloned()
    }

    pub fn get_operation_status(&self, operation_id: &str) -> Option<CoordinatedOperation> {
        self.operations.lock().get(operation_id).cloned()
    }

    /// Execute a stored plan to completion or full compensation
    ///
    /// Errors are returned only when the operation could not start (unknown plan,
    /// overlapping execution). Once started, the returned operation carries the outcome:
    /// `completed`, `rolled-back` with `error` set, or `failed` when compensation itself
    /// failed and the error kind is `RollbackError`.
    pub async fn execute_coordinated_operation(
        &self,
        plan_id: &str,
        token: Option<&CancellationToken>,
    ) -> Result<CoordinatedOperation> {
        let plan = self
            .get_plan(plan_id)
            .ok_or_else(|| CoordinationError::not_found("Plan", plan_id))?;

        let operation_id = format!("op-{}", uuid::Uuid::new_v4());
        let _claim = self.claim(&plan, &operation_id)?;
        let _in_flight = self.enter(&operation_id)?;

        let mut operation = CoordinatedOperation::from_plan(operation_id.clone(), &plan);
        operation.transition(OperationStatus::Executing);
        self.operations.lock().insert(operation_id.clone(), operation);

        info!("Operation {} started for plan {}", operation_id, plan.plan_id);
        self.emit(CoordinationEvent::OperationStarted {
            operation_id: operation_id.clone(),
            plan_id: plan.plan_id.clone(),
        });

        let outcome = match self.run_groups(&plan, &operation_id, token).await {
            Ok(()) => self.regenerate_context(&plan, &operation_id, token).await,
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(()) => self.finish_success(&operation_id),
            Err(failure) => self.finish_failure(&plan, &operation_id, failure),
        }

        self.get_operation_status(&operation_id)
            .ok_or_else(|| CoordinationError::not_found("Operation", &operation_id))
    }

    async fn run_groups(
        &self,
        plan: &CoordinationPlan,
        operation_id: &str,
        token: Option<&CancellationToken>,
    ) -> std::result::Result<(), Failure> {
        for (index, group) in plan.rollback_strategy.atomic_groups.iter().enumerate() {
            checkpoint(token).await?;

            if let Some(gate) = plan.gate_before(index) {
                self.await_gate(gate, operation_id, token).await?;
            }

            debug!(
                "Operation {}: group {} ({} components)",
                operation_id,
                group.group_id,
                group.components.len()
            );
            for component in &group.components {
                checkpoint(token).await?;
                self.run_component(plan, operation_id, component)?;
            }
        }
        Ok(())
    }

    fn run_component(
        &self,
        plan: &CoordinationPlan,
        operation_id: &str,
        component: &str,
    ) -> std::result::Result<(), Failure> {
        let document = plan
            .document_operations
            .iter()
            .find(|op| op.operation_id == component);
        let registry = plan
            .registry_operations
            .iter()
            .find(|op| op.operation_id == component);

        let paths = match (document, registry) {
            (Some(op), _) => self.documents.affected_paths(&op.kind),
            (None, Some(_)) => self.registry.registry_paths(),
            (None, None) => {
                return Err(Failure {
                    error: CoordinationError::not_found("Component", component),
                    component: Some(component.to_string()),
                })
            }
        };

        self.update_operation(operation_id, |op| {
            op.set_component(component, ComponentStatus::Executing, None)
        });

        let result = self
            .rollback
            .create_path_snapshot(&snapshot_id(operation_id, component), &paths)
            .map_err(CoordinationError::from)
            .and_then(|_| {
                let applied = match (document, registry) {
                    (Some(op), _) => self.documents.execute(&op.kind),
                    (None, Some(op)) => self.registry.apply(&op.kind),
                    (None, None) => Ok(()),
                };
                applied.map_err(|e| CoordinationError::execution(component, format!("{:#}", e)))
            });

        match result {
            Ok(()) => {
                self.update_operation(operation_id, |op| {
                    op.set_component(component, ComponentStatus::Completed, None)
                });
                debug!("Operation {}: {} completed", operation_id, component);
                self.emit(CoordinationEvent::ComponentCompleted {
                    operation_id: operation_id.to_string(),
                    component_id: component.to_string(),
                });
                Ok(())
            }
            Err(error) => {
                warn!("Operation {}: {} failed: {}", operation_id, component, error);
                self.update_operation(operation_id, |op| {
                    op.set_component(component, ComponentStatus::Failed, Some(error.to_string()))
                });
                self.emit(CoordinationEvent::ComponentFailed {
                    operation_id: operation_id.to_string(),
                    component_id: component.to_string(),
                    error: error.to_string(),
                });
                Err(Failure {
                    error,
                    component: Some(component.to_string()),
                })
            }
        }
    }

    async fn await_gate(
        &self,
        gate: &ApprovalGate,
        operation_id: &str,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let timeout = Duration::from_secs(gate.timeout_secs);
        let approval = self.approvals.request_approval(NewApproval {
            subject: format!("{}/{}", operation_id, gate.gate_id),
            description: gate.reason.clone(),
            minimum_approvals: gate.minimum_approvals,
            timeout,
        })?;
        let approval_id = approval.approval_id;

        self.update_operation(operation_id, |op| {
            op.metadata.approval_ids.push(approval_id.clone())
        });
        info!(
            "Operation {} waiting on approval {} ({})",
            operation_id, approval_id, gate.reason
        );
        self.emit(CoordinationEvent::ApprovalRequested {
            operation_id: operation_id.to_string(),
            approval_id: approval_id.clone(),
            gate_id: gate.gate_id.clone(),
        });

        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(self.config.approval_poll_interval_ms.max(1));
        loop {
            let status = self.approvals.get_status(&approval_id)?.status;
            let resolved = match status {
                ApprovalStatus::Approved => Some(Ok(())),
                ApprovalStatus::Rejected => Some(Err(CoordinationError::ApprovalRejected {
                    approval_id: approval_id.clone(),
                })),
                ApprovalStatus::Expired => Some(Err(CoordinationError::ApprovalExpired {
                    approval_id: approval_id.clone(),
                })),
                // an external workflow may never expire on its own
                ApprovalStatus::Pending if Instant::now() >= deadline => {
                    Some(Err(CoordinationError::ApprovalExpired {
                        approval_id: approval_id.clone(),
                    }))
                }
                ApprovalStatus::Pending => None,
            };

            if let Some(outcome) = resolved {
                info!("Approval {} resolved: {:?}", approval_id, status);
                self.emit(CoordinationEvent::ApprovalResolved {
                    operation_id: operation_id.to_string(),
                    approval_id: approval_id.clone(),
                    approved: outcome.is_ok(),
                });
                return outcome;
            }

            match token {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = token.cancelled() => return Err(CoordinationError::Cancelled),
                    }
                }
                None => tokio::time::sleep(poll).await,
            }
        }
    }

    async fn regenerate_context(
        &self,
        plan: &CoordinationPlan,
        operation_id: &str,
        token: Option<&CancellationToken>,
    ) -> std::result::Result<(), Failure> {
        let Some(context) = self.context.as_ref().filter(|_| self.config.regenerate_context) else {
            return Ok(());
        };
        let changed: Vec<PathBuf> = plan
            .document_operations
            .iter()
            .filter_map(|op| op.kind.destination().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if changed.is_empty() {
            return Ok(());
        }

        let request = HolisticUpdateRequest::new(
            changed,
            TriggerType::Coordinated,
            context.config().default_timeout(),
        );
        let result = context.execute_holistic_update(request, token).await;

        if let Some(err) = result.error {
            let error = match CoordinationError::from(err) {
                CoordinationError::Cancelled => CoordinationError::Cancelled,
                other => CoordinationError::execution("context-regeneration", other.to_string()),
            };
            return Err(error.into());
        }

        if !result.affected_domains.is_empty() {
            debug!(
                "Operation {}: context update {} regenerated {:?}",
                operation_id, result.update_id, result.affected_domains
            );
            self.update_operation(operation_id, |op| {
                op.metadata.context_update_id = Some(result.update_id.clone())
            });
        }
        Ok(())
    }

    fn finish_success(&self, operation_id: &str) {
        self.update_operation(operation_id, |op| {
            if op.all_components_completed() {
                op.transition(OperationStatus::Completed);
            } else {
                // never completed with unfinished components
                op.error = Some(OperationError {
                    kind: "ExecutionError".to_string(),
                    message: "components left unfinished".to_string(),
                    component_id: None,
                });
                op.transition(OperationStatus::Failed);
            }
        });
        info!("Operation {} completed", operation_id);
        self.emit(CoordinationEvent::OperationCompleted {
            operation_id: operation_id.to_string(),
        });
    }

    fn finish_failure(&self, plan: &CoordinationPlan, operation_id: &str, failure: Failure) {
        let kind = failure.error.kind().to_string();
        let message = failure.error.to_string();
        warn!("Operation {} failed: {}", operation_id, message);

        self.update_operation(operation_id, |op| {
            for id in plan.component_ids() {
                if op.component_status(&id) == Some(ComponentStatus::Pending) {
                    op.set_component(&id, ComponentStatus::Skipped, None);
                }
            }
            op.error = Some(OperationError {
                kind: kind.clone(),
                message: message.clone(),
                component_id: failure.component.clone(),
            });
            op.transition(OperationStatus::Failed);
        });
        self.emit(CoordinationEvent::OperationFailed {
            operation_id: operation_id.to_string(),
            kind,
            message,
        });

        match self.compensate(plan, operation_id) {
            Ok(reversed) => {
                self.update_operation(operation_id, |op| op.transition(OperationStatus::RolledBack));
                info!(
                    "Operation {} rolled back ({} components reversed)",
                    operation_id, reversed
                );
                self.emit(CoordinationEvent::OperationRolledBack {
                    operation_id: operation_id.to_string(),
                    components: reversed,
                });
            }
            Err(rollback_err) => {
                error!(
                    "Operation {} could not be rolled back: {}; manual intervention required",
                    operation_id, rollback_err
                );
                self.update_operation(operation_id, |op| {
                    let original = op.error.take();
                    op.error = Some(OperationError {
                        kind: rollback_err.kind().to_string(),
                        message: match original {
                            Some(original) => format!("{}; {}", original.message, rollback_err),
                            None => rollback_err.to_string(),
                        },
                        component_id: failure.component,
                    });
                });
            }
        }
    }

    /// Restore component pre-images in rollback order
    ///
    /// Completed components become `rolled-back`; a failed component is restored too,
    /// since it may have applied part of its change before failing.
    fn compensate(&self, plan: &CoordinationPlan, operation_id: &str) -> Result<usize> {
        let started = Instant::now();
        let mut reversed = 0;

        for component in &plan.rollback_strategy.rollback_order {
            let status = self
                .update_operation(operation_id, |op| op.component_status(component))
                .flatten();
            let snapshot = snapshot_id(operation_id, component);

            match status {
                Some(ComponentStatus::Completed) => {
                    self.restore(&snapshot, component)?;
                    self.update_operation(operation_id, |op| {
                        op.set_component(component, ComponentStatus::RolledBack, None)
                    });
                    reversed += 1;
                }
                Some(ComponentStatus::Failed) | Some(ComponentStatus::Executing) => {
                    let captured = self
                        .rollback
                        .get_snapshot(&snapshot)
                        .is_some_and(|s| s.status == SnapshotStatus::Valid);
                    if captured {
                        self.restore(&snapshot, component)?;
                    }
                }
                _ => {}
            }
        }

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(plan.rollback_strategy.rollback_timeout_secs) {
            warn!(
                "Rollback of {} took {} ms, over its {} s budget",
                operation_id,
                elapsed.as_millis(),
                plan.rollback_strategy.rollback_timeout_secs
            );
        }
        Ok(reversed)
    }

    fn restore(&self, snapshot: &str, component: &str) -> Result<()> {
        self.rollback
            .execute_holistic_rollback(snapshot)
            .map(|report| {
                debug!(
                    "Component {} restored: {} rewritten, {} removed",
                    component,
                    report.restored_files.len(),
                    report.removed_files.len()
                );
            })
            .map_err(|e| CoordinationError::Rollback(format!("component {}: {}", component, e)))
    }

    /// Reverse a completed or failed operation
    ///
    /// Returns `Ok(true)` once the operation is rolled back (immediately if it already
    /// was) and `Ok(false)` for an operation that never started. A restore that stops
    /// partway leaves the operation `failed` with a `RollbackError`; calling again resumes
    /// with the components that are still applied.
    pub fn rollback_operation(&self, operation_id: &str, reason: Option<String>) -> Result<bool> {
        let operation = self
            .get_operation_status(operation_id)
            .ok_or_else(|| CoordinationError::not_found("Operation", operation_id))?;

        match operation.status {
            OperationStatus::RolledBack => {
                debug!("Operation {} already rolled back", operation_id);
                return Ok(true);
            }
            OperationStatus::Pending => return Ok(false),
            OperationStatus::Executing => {
                return Err(CoordinationError::ConcurrencyConflict(format!(
                    "operation {} is still executing",
                    operation_id
                )))
            }
            OperationStatus::Completed | OperationStatus::Failed => {}
        }

        let plan = self
            .get_plan(&operation.plan_id)
            .ok_or_else(|| CoordinationError::not_found("Plan", &operation.plan_id))?;
        let _in_flight = self.enter(operation_id)?;
        let _claim = self.claim(&plan, operation_id)?;

        // refuse before touching anything if a pre-image is unusable
        for component in &plan.rollback_strategy.rollback_order {
            if operation.component_status(component) == Some(ComponentStatus::Completed)
                && !self
                    .rollback
                    .validate_rollback_data(&snapshot_id(operation_id, component))
            {
                return Err(CoordinationError::Rollback(format!(
                    "pre-image of {} is missing or invalid",
                    component
                )));
            }
        }

        if let (Some(context), Some(update_id)) =
            (self.context.as_ref(), operation.metadata.context_update_id.as_deref())
        {
            // an earlier attempt may have restored the context before failing
            let restored = context
                .rollback_manager()
                .get_snapshot(update_id)
                .is_some_and(|s| s.status == SnapshotStatus::Consumed);
            if restored {
                debug!("Context update {} already restored", update_id);
            } else {
                context.rollback_update(update_id, true)?;
            }
        }

        let reversed = match self.compensate(&plan, operation_id) {
            Ok(reversed) => reversed,
            Err(err) => {
                error!(
                    "Rollback of operation {} stopped partway: {}; retry once the cause is cleared",
                    operation_id, err
                );
                // partially reversed, so no longer completed
                self.update_operation(operation_id, |op| {
                    op.error = Some(OperationError {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                        component_id: None,
                    });
                    if op.status != OperationStatus::Failed {
                        op.transition(OperationStatus::Failed);
                    }
                });
                return Err(err);
            }
        };
        self.update_operation(operation_id, |op| {
            op.metadata.rollback_reason = reason.clone();
            op.transition(OperationStatus::RolledBack);
        });

        info!(
            "Operation {} rolled back on request ({} components, reason: {})",
            operation_id,
            reversed,
            reason.as_deref().unwrap_or("none given")
        );
        self.emit(CoordinationEvent::OperationRolledBack {
            operation_id: operation_id.to_string(),
            components: reversed,
        });
        Ok(true)
    }

    /// Drop approval requests completed before the retention window
    ///
    /// Returns how many were dropped, or would be under `dry_run`.
    pub fn perform_maintenance(&self, dry_run: bool) -> usize {
        let hours = self.config.approval_retention_hours.min(24 * 365 * 100) as i64;
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours);
        self.approvals.purge_completed(cutoff, dry_run)
    }

    fn update_operation<R>(
        &self,
        operation_id: &str,
        f: impl FnOnce(&mut CoordinatedOperation) -> R,
    ) -> Option<R> {
        self.operations.lock().get_mut(operation_id).map(f)
    }

    fn enter(&self, operation_id: &str) -> Result<InFlight<'_>> {
        let mut set = self.in_flight.lock();
        if !set.insert(operation_id.to_string()) {
            return Err(CoordinationError::ConcurrencyConflict(format!(
                "operation {} already has an execution in flight",
                operation_id
            )));
        }
        Ok(InFlight {
            set: &self.in_flight,
            operation_id: operation_id.to_string(),
        })
    }

    /// Claim every document path, registry identifier and registry file the plan touches
    fn claim(&self, plan: &CoordinationPlan, operation_id: &str) -> Result<ResourceClaim<'_>> {
        let mut keys = BTreeSet::new();
        for op in &plan.document_operations {
            for path in self.documents.affected_paths(&op.kind) {
                keys.insert(format!("document:{}", path.display()));
            }
        }
        for op in &plan.registry_operations {
            if let RegistryOperationKind::ConvertPlaceholder {
                placeholder_id,
                capability_id,
                ..
            } = &op.kind
            {
                keys.insert(format!("placeholder:{}", placeholder_id));
                keys.insert(format!("capability:{}", capability_id));
            }
        }
        // per-component registry pre-images cover the whole file
        if !plan.registry_operations.is_empty() {
            for path in self.registry.registry_paths() {
                keys.insert(format!("registry:{}", path.display()));
            }
        }

        let mut claims = self.claims.lock();
        if let Some((key, holder)) = keys
            .iter()
            .find_map(|key| claims.get(key).map(|holder| (key, holder)))
        {
            return Err(CoordinationError::ConcurrencyConflict(format!(
                "{} is held by operation {}",
                key, holder
            )));
        }
        for key in &keys {
            claims.insert(key.clone(), operation_id.to_string());
        }
        Ok(ResourceClaim {
            claims: &self.claims,
            keys: keys.into_iter().collect(),
        })
    }
}

fn snapshot_id(operation_id: &str, component: &str) -> String {
    format!("{}.{}", operation_id, component)
}

async fn checkpoint(token: Option<&CancellationToken>) -> Result<()> {
    tokio::task::yield_now().await;
    if token.is_some_and(|t| t.is_cancelled()) {
        return Err(CoordinationError::Cancelled);
    }
    Ok(())
}
