//! lecycle - Lifecycle Coordinator
//!
//! *Le Cycle* (The Lifecycle) - plans document and registry changes as dependency-ordered
//! atomic groups, gates risky groups on human approval, and undoes everything a failed
//! operation did.

pub mod approval;
pub mod coordinator;
pub mod documents;
pub mod error;
pub mod events;
pub mod operation;
pub mod plan;
pub mod planner;
pub mod registry;

pub use approval::{
    ApprovalDecision, ApprovalRequest, ApprovalResponse, ApprovalStatus, ApprovalWorkflow,
    InMemoryApprovalWorkflow, NewApproval,
};
pub use coordinator::{
    CoordinationConfig, LifecycleCoordinator, DEFAULT_APPROVAL_TIMEOUT_SECS,
    DEFAULT_ROLLBACK_TIMEOUT_SECS,
};
pub use documents::{DocumentExecutor, FsDocumentExecutor};
pub use error::{CoordinationError, Result};
pub use events::CoordinationEvent;
pub use operation::{
    CoordinatedOperation, OperationComponents, OperationError, OperationMetadata,
    OperationStatus, ProgressCounts, StatusChange,
};
pub use plan::{
    ApprovalGate, AtomicGroup, ComponentStatus, CoordinationPlan, Dependency, DocumentOperation,
    DocumentOperationKind, OperationType, RegistryOperation, RegistryOperationKind,
    RollbackStrategy,
};
pub use planner::{build_plan, validate_request, PlanRequest, PlannerSettings};
pub use registry::{
    capability_prefix, CapabilityRecord, JsonRegistryStore, PlaceholderRecord, PlaceholderState,
    Registry, RegistryStore,
};
