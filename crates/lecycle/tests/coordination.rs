// Integration tests for coordinated operations
//
// - Planning a two-document new-concepts migration
// - A registry failure mid-plan rolls back every earlier component byte for byte
// - Rolling back twice is a no-op the second time
// - Rejected and expired approval gates abort before any component runs
// - A completed full-lifecycle operation, context included, can be rolled back
// - A rollback that stops partway fails the operation and can be retried
// - Overlapping executions are rejected

use lecontexte::{HolisticConfig, HolisticUpdateOrchestrator};
use lecycle::{
    ApprovalDecision, ComponentStatus, CoordinationConfig, CoordinationEvent,
    CoordinationError, FsDocumentExecutor, InMemoryApprovalWorkflow, JsonRegistryStore,
    LifecycleCoordinator, OperationStatus, OperationType, PlanRequest, RegistryOperationKind,
    RegistryStore,
};
use lereprise::{ContextLayout, RollbackConfig, RollbackManager};
use letravail::CancellationSource;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

const REGISTRY_FILE: &str = "docs/capability-registry.json";

/// Registry that refuses to convert one placeholder
struct FailingRegistry {
    inner: JsonRegistryStore,
    fail_on: &'static str,
}

impl RegistryStore for FailingRegistry {
    fn registry_paths(&self) -> Vec<PathBuf> {
        self.inner.registry_paths()
    }

    fn propose_capability_ids(
        &self,
        placeholder_ids: &[String],
        domain: &str,
    ) -> lecycle::Result<Vec<String>> {
        self.inner.propose_capability_ids(placeholder_ids, domain)
    }

    fn apply(&self, kind: &RegistryOperationKind) -> anyhow::Result<()> {
        if let RegistryOperationKind::ConvertPlaceholder { placeholder_id, .. } = kind {
            if placeholder_id == self.fail_on {
                anyhow::bail!("registry rejected {}", placeholder_id);
            }
        }
        self.inner.apply(kind)
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Every file in the workspace outside the snapshot store, with its bytes
fn workspace_state(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) != Some(".lecoord") {
                    walk(root, &path, out);
                }
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(relative, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

fn seed(dir: &TempDir) {
    write(dir.path(), "docs/NewConcepts/a.md", "# A\n\nUses PH-1.\n");
    write(dir.path(), "docs/NewConcepts/b.md", "# B\n\nUses PH-2.\n");
    let registry = JsonRegistryStore::new(dir.path(), REGISTRY_FILE);
    registry
        .register_placeholder("PH-1", "NewConcepts", Some(Path::new("docs/NewConcepts/a.md")))
        .unwrap();
    registry
        .register_placeholder("PH-2", "NewConcepts", Some(Path::new("docs/NewConcepts/b.md")))
        .unwrap();
}

fn rollback_manager(dir: &TempDir) -> Arc<RollbackManager> {
    Arc::new(
        RollbackManager::open(
            ContextLayout::with_default_context(dir.path()),
            &RollbackConfig::default(),
        )
        .unwrap(),
    )
}

fn config() -> CoordinationConfig {
    CoordinationConfig {
        approval_poll_interval_ms: 10,
        ..CoordinationConfig::default()
    }
}

fn coordinator_with(
    dir: &TempDir,
    config: CoordinationConfig,
    registry: Arc<dyn RegistryStore>,
) -> Arc<LifecycleCoordinator> {
    let documents = FsDocumentExecutor::new(dir.path(), &config.docs_root, &config.archive_dir);
    Arc::new(LifecycleCoordinator::new(
        config,
        rollback_manager(dir),
        Arc::new(documents),
        registry,
        Arc::new(InMemoryApprovalWorkflow::new()),
    ))
}

fn migration(placeholders: &[&str], docs: &[&str]) -> PlanRequest {
    PlanRequest {
        operation_type: OperationType::NewconceptsMigration,
        placeholder_ids: placeholders.iter().map(|s| s.to_string()).collect(),
        document_paths: docs.iter().map(PathBuf::from).collect(),
        target_domain: Some("Analysis".to_string()),
        migration_reason: Some("concepts settled".to_string()),
    }
}

/// Answers every approval request the coordinator raises
fn spawn_approver(coordinator: &LifecycleCoordinator, decision: ApprovalDecision) -> JoinHandle<usize> {
    let mut events = coordinator.subscribe();
    let approvals = coordinator.approvals().clone();
    tokio::spawn(async move {
        let mut answered = 0;
        while let Ok(event) = events.recv().await {
            if let CoordinationEvent::ApprovalRequested { approval_id, .. } = event {
                approvals
                    .submit_response(&approval_id, "reviewer", decision, None)
                    .unwrap();
                answered += 1;
            }
        }
        answered
    })
}

#[tokio::test]
async fn test_newconcepts_migration_plan_shape() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let coordinator = LifecycleCoordinator::with_defaults(config(), rollback_manager(&dir));

    let plan = coordinator
        .create_coordination_plan(migration(
            &["PH-1", "PH-2"],
            &["docs/NewConcepts/a.md", "docs/NewConcepts/b.md"],
        ))
        .unwrap();

    assert_eq!(plan.document_operations.len(), 2);
    assert_eq!(plan.registry_operations.len(), 2);
    assert_eq!(plan.rollback_strategy.rollback_order.len(), 4);
    assert!(plan.is_acyclic());
    assert_eq!(coordinator.get_plan(&plan.plan_id), Some(plan.clone()));

    let RegistryOperationKind::ConvertPlaceholder { capability_id, .. } =
        &plan.registry_operations[1].kind
    else {
        panic!("expected a placeholder conversion");
    };
    assert_eq!(capability_id, "CAP-ANALYSIS-002");
}

#[tokio::test]
async fn test_unknown_placeholder_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let coordinator = LifecycleCoordinator::with_defaults(config(), rollback_manager(&dir));
    let err = coordinator
        .create_coordination_plan(migration(&["PH-404"], &["docs/NewConcepts/a.md"]))
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Validation(_)));
}

#[tokio::test]
async fn test_registry_failure_rolls_back_completed_components() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let before = workspace_state(dir.path());

    let registry = Arc::new(FailingRegistry {
        inner: JsonRegistryStore::new(dir.path(), REGISTRY_FILE),
        fail_on: "PH-2",
    });
    let coordinator = coordinator_with(&dir, config(), registry);
    let approver = spawn_approver(&coordinator, ApprovalDecision::Approved);

    let plan = coordinator
        .create_coordination_plan(migration(
            &["PH-1", "PH-2"],
            &["docs/NewConcepts/a.md", "docs/NewConcepts/b.md"],
        ))
        .unwrap();
    let op = coordinator
        .execute_coordinated_operation(&plan.plan_id, None)
        .await
        .unwrap();

    assert_eq!(op.status, OperationStatus::RolledBack);
    let history: Vec<OperationStatus> = op.status_history.iter().map(|c| c.status).collect();
    assert_eq!(
        &history[history.len() - 2..],
        &[OperationStatus::Failed, OperationStatus::RolledBack]
    );

    let error = op.error.as_ref().unwrap();
    assert_eq!(error.kind, "ExecutionError");
    assert_eq!(error.component_id.as_deref(), Some("reg-2"));

    assert_eq!(op.component_status("doc-1"), Some(ComponentStatus::RolledBack));
    assert_eq!(op.component_status("reg-1"), Some(ComponentStatus::RolledBack));
    assert_eq!(op.component_status("doc-2"), Some(ComponentStatus::RolledBack));
    assert_eq!(op.component_status("reg-2"), Some(ComponentStatus::Failed));
    assert_eq!(op.metadata.approval_ids.len(), 2);

    assert_eq!(workspace_state(dir.path()), before);

    // second rollback is a no-op that reports success
    assert!(coordinator.rollback_operation(&op.operation_id, None).unwrap());
    assert!(coordinator.rollback_operation(&op.operation_id, None).unwrap());
    assert_eq!(workspace_state(dir.path()), before);

    drop(coordinator);
    assert_eq!(approver.await.unwrap(), 2);
}

#[tokio::test]
async fn test_rejected_gate_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let before = workspace_state(dir.path());
    let coordinator = LifecycleCoordinator::with_defaults(config(), rollback_manager(&dir));
    let approver = spawn_approver(&coordinator, ApprovalDecision::Rejected);

    let plan = coordinator
        .create_coordination_plan(migration(&["PH-1"], &["docs/NewConcepts/a.md"]))
        .unwrap();
    let op = coordinator
        .execute_coordinated_operation(&plan.plan_id, None)
        .await
        .unwrap();

    assert_eq!(op.status, OperationStatus::RolledBack);
    assert_eq!(op.error.as_ref().unwrap().kind, "ApprovalRejectedError");
    assert_eq!(op.progress().skipped, 2);
    assert_eq!(workspace_state(dir.path()), before);
    approver.abort();
}

#[tokio::test]
async fn test_expired_gate_aborts() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let coordinator = LifecycleCoordinator::with_defaults(
        CoordinationConfig {
            approval_timeout_secs: 0,
            ..config()
        },
        rollback_manager(&dir),
    );

    let plan = coordinator
        .create_coordination_plan(migration(&["PH-1"], &["docs/NewConcepts/a.md"]))
        .unwrap();
    let op = coordinator
        .execute_coordinated_operation(&plan.plan_id, None)
        .await
        .unwrap();

    assert_eq!(op.error.as_ref().unwrap().kind, "ApprovalExpiredError");
    assert!(dir.path().join("docs/NewConcepts/a.md").exists());
}

#[tokio::test]
async fn test_completed_full_lifecycle_rolls_back_with_context() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let before = workspace_state(dir.path());

    let rollback = rollback_manager(&dir);
    let context = Arc::new(HolisticUpdateOrchestrator::with_defaults(
        HolisticConfig {
            source_roots: vec![PathBuf::from("docs")],
            ..HolisticConfig::default()
        },
        rollback.clone(),
    ));
    let coordinator = LifecycleCoordinator::with_defaults(config(), rollback)
        .with_context_orchestrator(context);
    let approver = spawn_approver(&coordinator, ApprovalDecision::Approved);

    let plan = coordinator
        .create_coordination_plan(PlanRequest {
            operation_type: OperationType::FullLifecycle,
            placeholder_ids: vec!["PH-1".to_string()],
            document_paths: vec![PathBuf::from("docs/NewConcepts/a.md")],
            target_domain: Some("Analysis".to_string()),
            migration_reason: None,
        })
        .unwrap();
    let op = coordinator
        .execute_coordinated_operation(&plan.plan_id, None)
        .await
        .unwrap();

    assert_eq!(op.status, OperationStatus::Completed, "{:?}", op.error);
    assert!(op.all_components_completed());
    assert!(op.rollback_available());
    assert!(op.metadata.context_update_id.is_some());
    assert!(dir.path().join("docs/Analysis/a.md").exists());
    assert!(dir.path().join("docs/archive/NewConcepts/a.md").exists());
    assert!(!dir.path().join("docs/NewConcepts/a.md").exists());
    assert!(dir.path().join(".context/Analysis/CONTEXT.md").exists());

    let registry = JsonRegistryStore::new(dir.path(), REGISTRY_FILE).load().unwrap();
    assert_eq!(
        registry.capabilities["CAP-ANALYSIS-001"].document_path,
        Some(PathBuf::from("docs/Analysis/a.md"))
    );

    assert!(coordinator
        .rollback_operation(&op.operation_id, Some("wrong domain".to_string()))
        .unwrap());
    let after = coordinator.get_operation_status(&op.operation_id).unwrap();
    assert_eq!(after.status, OperationStatus::RolledBack);
    assert_eq!(after.metadata.rollback_reason.as_deref(), Some("wrong domain"));
    assert_eq!(workspace_state(dir.path()), before);

    assert!(coordinator.rollback_operation(&op.operation_id, None).unwrap());
    assert_eq!(workspace_state(dir.path()), before);
    approver.abort();
}

#[tokio::test]
async fn test_interrupted_rollback_fails_operation_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let before = workspace_state(dir.path());

    let rollback = rollback_manager(&dir);
    let context = Arc::new(HolisticUpdateOrchestrator::with_defaults(
        HolisticConfig {
            source_roots: vec![PathBuf::from("docs")],
            ..HolisticConfig::default()
        },
        rollback.clone(),
    ));
    let coordinator = LifecycleCoordinator::with_defaults(config(), rollback)
        .with_context_orchestrator(context);
    let approver = spawn_approver(&coordinator, ApprovalDecision::Approved);

    let plan = coordinator
        .create_coordination_plan(PlanRequest {
            operation_type: OperationType::FullLifecycle,
            placeholder_ids: vec!["PH-1".to_string()],
            document_paths: vec![PathBuf::from("docs/NewConcepts/a.md")],
            target_domain: Some("Analysis".to_string()),
            migration_reason: None,
        })
        .unwrap();
    let op = coordinator
        .execute_coordinated_operation(&plan.plan_id, None)
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Completed, "{:?}", op.error);

    // a directory where the original document has to be written back
    let blocker = dir.path().join("docs/NewConcepts/a.md");
    fs::create_dir_all(&blocker).unwrap();

    let err = coordinator
        .rollback_operation(&op.operation_id, None)
        .unwrap_err();
    assert_eq!(err.kind(), "RollbackError");

    let stuck = coordinator.get_operation_status(&op.operation_id).unwrap();
    assert_eq!(stuck.status, OperationStatus::Failed);
    assert_eq!(stuck.error.as_ref().unwrap().kind, "RollbackError");
    assert!(!stuck.all_components_completed());

    fs::remove_dir_all(&blocker).unwrap();
    assert!(coordinator
        .rollback_operation(&op.operation_id, Some("retry".to_string()))
        .unwrap());

    let after = coordinator.get_operation_status(&op.operation_id).unwrap();
    assert_eq!(after.status, OperationStatus::RolledBack);
    assert_eq!(workspace_state(dir.path()), before);
    approver.abort();
}

#[tokio::test]
async fn test_overlapping_execution_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir);
    let coordinator = coordinator_with(
        &dir,
        config(),
        Arc::new(JsonRegistryStore::new(dir.path(), REGISTRY_FILE)),
    );

    let first = coordinator
        .create_coordination_plan(migration(&["PH-1"], &["docs/NewConcepts/a.md"]))
        .unwrap();
    let second = coordinator
        .create_coordination_plan(PlanRequest {
            operation_type: OperationType::DocumentRestructure,
            placeholder_ids: Vec::new(),
            document_paths: vec![PathBuf::from("docs/NewConcepts/a.md")],
            target_domain: Some("Billing".to_string()),
            migration_reason: None,
        })
        .unwrap();

    // the first execution parks on its approval gate while holding its resources
    let source = CancellationSource::new();
    let running = {
        let coordinator = coordinator.clone();
        let token = source.token();
        let plan_id = first.plan_id.clone();
        tokio::spawn(async move {
            coordinator
                .execute_coordinated_operation(&plan_id, Some(&token))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = coordinator
        .execute_coordinated_operation(&second.plan_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ConcurrencyConflict");

    source.cancel();
    let op = running.await.unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::RolledBack);
    assert_eq!(op.error.unwrap().kind, "Cancelled");

    // resources are released once the first execution ended
    let approver = spawn_approver(&coordinator, ApprovalDecision::Approved);
    let op = coordinator
        .execute_coordinated_operation(&second.plan_id, None)
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Completed, "{:?}", op.error);
    assert!(dir.path().join("docs/Billing/a.md").exists());
    approver.abort();
}
