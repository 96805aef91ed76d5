//! Coordination plans
//!
//! A plan is immutable once created. Operations reference it by `plan_id` and copy its
//! components when they start.

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Kind of lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    /// Move new-concept documents into a target domain and convert their placeholders
    NewconceptsMigration,
    /// Convert placeholders to final capability IDs
    PlaceholderConversion,
    /// Move documents into a different domain layout
    DocumentRestructure,
    /// Migrate, convert, re-path and archive in one operation
    FullLifecycle,
}

impl OperationType {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::NewconceptsMigration => "newconcepts-migration",
            OperationType::PlaceholderConversion => "placeholder-conversion",
            OperationType::DocumentRestructure => "document-restructure",
            OperationType::FullLifecycle => "full-lifecycle",
        }
    }

    /// Every known type
    pub fn all() -> [OperationType; 4] {
        [
            OperationType::NewconceptsMigration,
            OperationType::PlaceholderConversion,
            OperationType::DocumentRestructure,
            OperationType::FullLifecycle,
        ]
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown operation type: {}", s))
    }
}

/// Status of one component (sub-operation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    RolledBack,
    /// Never started because an earlier component failed
    Skipped,
}

/// What a document operation does; all paths are workspace-relative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DocumentOperationKind {
    /// Copy `source` to `target`, then optionally move the original into the archive
    Migrate {
        source: PathBuf,
        target: PathBuf,
        archive_original: bool,
    },
    /// Move `source` into the archive
    Archive { source: PathBuf },
    /// Move `source` to `target`
    Restructure { source: PathBuf, target: PathBuf },
    /// Replace placeholder references inside a document
    RewriteReferences {
        document: PathBuf,
        replacements: Vec<(String, String)>,
    },
}

impl DocumentOperationKind {
    /// Whether the operation removes the original content from its location
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            DocumentOperationKind::Archive { .. }
                | DocumentOperationKind::Migrate {
                    archive_original: true,
                    ..
                }
        )
    }

    /// Document the operation starts from
    pub fn source(&self) -> &PathBuf {
        match self {
            DocumentOperationKind::Migrate { source, .. }
            | DocumentOperationKind::Archive { source }
            | DocumentOperationKind::Restructure { source, .. } => source,
            DocumentOperationKind::RewriteReferences { document, .. } => document,
        }
    }

    /// Where the document lives once the operation completed
    pub fn destination(&self) -> Option<&PathBuf> {
        match self {
            DocumentOperationKind::Migrate { target, .. }
            | DocumentOperationKind::Restructure { target, .. } => Some(target),
            DocumentOperationKind::RewriteReferences { document, .. } => Some(document),
            DocumentOperationKind::Archive { .. } => None,
        }
    }
}

/// What a registry operation does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RegistryOperationKind {
    /// Replace a placeholder with its final capability ID
    ConvertPlaceholder {
        placeholder_id: String,
        capability_id: String,
        domain: String,
        document_path: Option<PathBuf>,
    },
    /// Point registry entries at a document's new location
    UpdateDocumentPath { from: PathBuf, to: PathBuf },
}

/// Atomic document sub-step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOperation {
    pub operation_id: String,
    #[serde(flatten)]
    pub kind: DocumentOperationKind,
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Atomic registry sub-step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryOperation {
    pub operation_id: String,
    #[serde(flatten)]
    pub kind: RegistryOperationKind,
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `component` may only run after `depends_on` completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub component: String,
    pub depends_on: String,
}

/// Human approval required before an atomic group starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGate {
    pub gate_id: String,
    /// Index into `rollback_strategy.atomic_groups`
    pub before_group: usize,
    pub reason: String,
    pub minimum_approvals: u32,
    pub timeout_secs: u64,
}

/// Components that succeed or are rolled back together, in forward order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicGroup {
    pub group_id: String,
    pub components: Vec<String>,
}

/// How a failed execution is undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackStrategy {
    /// Reverse of the forward execution order
    pub rollback_order: Vec<String>,
    /// Groups in forward execution order
    pub atomic_groups: Vec<AtomicGroup>,
    pub rollback_timeout_secs: u64,
}

/// A proposed multi-step cross-component change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationPlan {
    pub plan_id: String,
    pub operation_type: OperationType,
    pub placeholder_ids: Vec<String>,
    pub document_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_reason: Option<String>,
    pub document_operations: Vec<DocumentOperation>,
    pub registry_operations: Vec<RegistryOperation>,
    pub dependencies: Vec<Dependency>,
    pub approval_gates: Vec<ApprovalGate>,
    pub rollback_strategy: RollbackStrategy,
    pub expected_duration_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl CoordinationPlan {
    /// Component IDs in forward execution order
    pub fn forward_order(&self) -> Vec<String> {
        self.rollback_strategy
            .atomic_groups
            .iter()
            .flat_map(|group| group.components.iter().cloned())
            .collect()
    }

    /// Every component ID, documents first
    pub fn component_ids(&self) -> Vec<String> {
        self.document_operations
            .iter()
            .map(|op| op.operation_id.clone())
            .chain(
                self.registry_operations
                    .iter()
                    .map(|op| op.operation_id.clone()),
            )
            .collect()
    }

    /// Dependency graph with an edge `depends_on -> component`
    pub fn dependency_graph(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        for id in self.component_ids() {
            let node = graph.add_node(id.clone());
            nodes.insert(id, node);
        }
        for dep in &self.dependencies {
            if let (Some(&from), Some(&to)) = (nodes.get(&dep.depends_on), nodes.get(&dep.component)) {
                graph.add_edge(from, to, ());
            }
        }
        graph
    }

    /// Whether the dependency graph admits a topological order
    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.dependency_graph())
    }

    /// Gate guarding a group, if any
    pub fn gate_before(&self, group_index: usize) -> Option<&ApprovalGate> {
        self.approval_gates
            .iter()
            .find(|gate| gate.before_group == group_index)
    }
}
