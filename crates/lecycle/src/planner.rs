//! Plan construction
//!
//! Turns an operation request into components, dependency edges, atomic groups and
//! approval gates. Planning is pure: capability IDs are proposed by the registry
//! beforehand and passed in.

use crate::error::{CoordinationError, Result};
use crate::plan::{
    ApprovalGate, AtomicGroup, ComponentStatus, CoordinationPlan, Dependency, DocumentOperation,
    DocumentOperationKind, OperationType, RegistryOperation, RegistryOperationKind,
    RollbackStrategy,
};
use chrono::Utc;
use lecontexte::DomainResolver;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::Direction::{Incoming, Outgoing};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

const SECS_PER_DOCUMENT_OP: u64 = 30;
const SECS_PER_REGISTRY_OP: u64 = 5;

/// Input of [`build_plan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub operation_type: OperationType,
    #[serde(default)]
    pub placeholder_ids: Vec<String>,
    #[serde(default)]
    pub document_paths: Vec<PathBuf>,
    #[serde(default)]
    pub target_domain: Option<String>,
    #[serde(default)]
    pub migration_reason: Option<String>,
}

/// Layout and approval defaults the planner applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerSettings {
    pub docs_root: PathBuf,
    pub minimum_approvals: u32,
    pub approval_timeout_secs: u64,
    pub rollback_timeout_secs: u64,
}

/// Check identifiers before anything else is computed
pub fn validate_request(request: &PlanRequest) -> Result<()> {
    let needs_docs = matches!(
        request.operation_type,
        OperationType::NewconceptsMigration
            | OperationType::DocumentRestructure
            | OperationType::FullLifecycle
    );
    let needs_placeholders = matches!(
        request.operation_type,
        OperationType::PlaceholderConversion | OperationType::FullLifecycle
    );

    let target = request
        .target_domain
        .as_deref()
        .ok_or_else(|| invalid(format!("{} requires targetDomain", request.operation_type)))?;
    if target.is_empty() || target.starts_with('.') || target.contains(['/', '\\']) {
        return Err(invalid(format!("invalid targetDomain: {:?}", target)));
    }

    if needs_docs && request.document_paths.is_empty() {
        return Err(invalid(format!(
            "{} requires at least one documentPath",
            request.operation_type
        )));
    }
    if needs_placeholders && request.placeholder_ids.is_empty() {
        return Err(invalid(format!(
            "{} requires at least one placeholderId",
            request.operation_type
        )));
    }
    if request.operation_type == OperationType::DocumentRestructure
        && !request.placeholder_ids.is_empty()
    {
        return Err(invalid("document-restructure does not take placeholderIds"));
    }

    let mut seen = HashSet::new();
    for id in &request.placeholder_ids {
        if id.trim().is_empty() {
            return Err(invalid("placeholderIds must not contain empty values"));
        }
        if !seen.insert(id.as_str()) {
            return Err(invalid(format!("duplicate placeholderId: {}", id)));
        }
    }

    let mut seen = HashSet::new();
    for path in &request.document_paths {
        if !is_plain_relative(path) {
            return Err(invalid(format!(
                "documentPath must be workspace-relative: {:?}",
                path
            )));
        }
        if path.file_name().is_none() {
            return Err(invalid(format!("documentPath has no file name: {:?}", path)));
        }
        if !seen.insert(path.as_path()) {
            return Err(invalid(format!("duplicate documentPath: {:?}", path)));
        }
    }

    Ok(())
}

/// Build a plan; `capability_ids[i]` is the final ID for `placeholder_ids[i]`
pub fn build_plan(
    plan_id: String,
    request: &PlanRequest,
    capability_ids: &[String],
    settings: &PlannerSettings,
    resolver: &dyn DomainResolver,
) -> Result<CoordinationPlan> {
    validate_request(request)?;
    if capability_ids.len() != request.placeholder_ids.len() {
        return Err(invalid(format!(
            "{} capability IDs proposed for {} placeholders",
            capability_ids.len(),
            request.placeholder_ids.len()
        )));
    }

    let target_domain = request.target_domain.clone().unwrap_or_default();
    let mut builder = ComponentBuilder::default();
    let target_of = |doc: &Path| -> PathBuf {
        let name = doc.file_name().map(PathBuf::from).unwrap_or_default();
        settings.docs_root.join(&target_domain).join(name)
    };

    match request.operation_type {
        OperationType::NewconceptsMigration => {
            let docs: Vec<String> = request
                .document_paths
                .iter()
                .map(|doc| {
                    builder.document(DocumentOperationKind::Migrate {
                        source: doc.clone(),
                        target: target_of(doc),
                        archive_original: true,
                    })
                })
                .collect();
            for (j, (placeholder, capability)) in
                request.placeholder_ids.iter().zip(capability_ids).enumerate()
            {
                let reg = builder.registry(RegistryOperationKind::ConvertPlaceholder {
                    placeholder_id: placeholder.clone(),
                    capability_id: capability.clone(),
                    domain: target_domain.clone(),
                    document_path: request.document_paths.get(j).map(|d| target_of(d)),
                });
                builder.depends_on_paired(&reg, &docs, j);
            }
        }
        OperationType::PlaceholderConversion => {
            let replacements: Vec<(String, String)> = request
                .placeholder_ids
                .iter()
                .cloned()
                .zip(capability_ids.iter().cloned())
                .collect();
            let docs: Vec<String> = request
                .document_paths
                .iter()
                .map(|doc| {
                    builder.document(DocumentOperationKind::RewriteReferences {
                        document: doc.clone(),
                        replacements: replacements.clone(),
                    })
                })
                .collect();
            for (j, (placeholder, capability)) in
                request.placeholder_ids.iter().zip(capability_ids).enumerate()
            {
                let reg = builder.registry(RegistryOperationKind::ConvertPlaceholder {
                    placeholder_id: placeholder.clone(),
                    capability_id: capability.clone(),
                    domain: target_domain.clone(),
                    document_path: request.document_paths.get(j).cloned(),
                });
                // every rewritten document references every placeholder
                for doc in &docs {
                    builder.depend(&reg, doc);
                }
            }
        }
        OperationType::DocumentRestructure => {
            for doc in &request.document_paths {
                let moved = builder.document(DocumentOperationKind::Restructure {
                    source: doc.clone(),
                    target: target_of(doc),
                });
                let reg = builder.registry(RegistryOperationKind::UpdateDocumentPath {
                    from: doc.clone(),
                    to: target_of(doc),
                });
                builder.depend(&reg, &moved);
            }
        }
        OperationType::FullLifecycle => {
            let mut migrations = Vec::new();
            for doc in &request.document_paths {
                let migrate = builder.document(DocumentOperationKind::Migrate {
                    source: doc.clone(),
                    target: target_of(doc),
                    archive_original: false,
                });
                let archive = builder.document(DocumentOperationKind::Archive {
                    source: doc.clone(),
                });
                builder.depend(&archive, &migrate);
                migrations.push(migrate);
            }
            for (j, (placeholder, capability)) in
                request.placeholder_ids.iter().zip(capability_ids).enumerate()
            {
                let reg = builder.registry(RegistryOperationKind::ConvertPlaceholder {
                    placeholder_id: placeholder.clone(),
                    capability_id: capability.clone(),
                    domain: target_domain.clone(),
                    document_path: request.document_paths.get(j).map(|d| target_of(d)),
                });
                builder.depends_on_paired(&reg, &migrations, j);
            }
            for (doc, migrate) in request.document_paths.iter().zip(&migrations) {
                let reg = builder.registry(RegistryOperationKind::UpdateDocumentPath {
                    from: doc.clone(),
                    to: target_of(doc),
                });
                builder.depend(&reg, migrate);
            }
        }
    }

    let ComponentBuilder {
        documents,
        registry,
        dependencies,
    } = builder;

    let ids: Vec<String> = documents
        .iter()
        .map(|op| op.operation_id.clone())
        .chain(registry.iter().map(|op| op.operation_id.clone()))
        .collect();
    let groups = atomic_groups(&plan_id, &ids, documents.len(), &dependencies)?;

    let docs_by_id: HashMap<&str, &DocumentOperation> = documents
        .iter()
        .map(|op| (op.operation_id.as_str(), op))
        .collect();
    let mut approval_gates = Vec::new();
    for (index, group) in groups.iter().enumerate() {
        let mut reasons = BTreeSet::new();
        for component in &group.components {
            let Some(doc) = docs_by_id.get(component.as_str()) else {
                continue;
            };
            if doc.kind.is_destructive() {
                reasons.insert(format!("{} removes {}", component, doc.kind.source().display()));
            }
            if let Some(domain) = resolver.resolve(doc.kind.source()) {
                if domain != target_domain {
                    reasons.insert(format!(
                        "{} crosses domains ({} -> {})",
                        component, domain, target_domain
                    ));
                }
            }
        }
        if !reasons.is_empty() {
            approval_gates.push(ApprovalGate {
                gate_id: format!("{}-gate-{}", plan_id, index + 1),
                before_group: index,
                reason: reasons.into_iter().collect::<Vec<_>>().join("; "),
                minimum_approvals: settings.minimum_approvals.max(1),
                timeout_secs: settings.approval_timeout_secs,
            });
        }
    }

    let mut rollback_order: Vec<String> = groups
        .iter()
        .flat_map(|group| group.components.iter().cloned())
        .collect();
    rollback_order.reverse();

    let expected_duration_secs = documents.len() as u64 * SECS_PER_DOCUMENT_OP
        + registry.len() as u64 * SECS_PER_REGISTRY_OP;

    Ok(CoordinationPlan {
        plan_id,
        operation_type: request.operation_type,
        placeholder_ids: request.placeholder_ids.clone(),
        document_paths: request.document_paths.clone(),
        target_domain: request.target_domain.clone(),
        migration_reason: request.migration_reason.clone(),
        document_operations: documents,
        registry_operations: registry,
        dependencies,
        approval_gates,
        rollback_strategy: RollbackStrategy {
            rollback_order,
            atomic_groups: groups,
            rollback_timeout_secs: settings.rollback_timeout_secs,
        },
        expected_duration_secs,
        created_at: Utc::now(),
    })
}

#[derive(Default)]
struct ComponentBuilder {
    documents: Vec<DocumentOperation>,
    registry: Vec<RegistryOperation>,
    dependencies: Vec<Dependency>,
}

impl ComponentBuilder {
    fn document(&mut self, kind: DocumentOperationKind) -> String {
        let id = format!("doc-{}", self.documents.len() + 1);
        self.documents.push(DocumentOperation {
            operation_id: id.clone(),
            kind,
            status: ComponentStatus::Pending,
            error: None,
        });
        id
    }

    fn registry(&mut self, kind: RegistryOperationKind) -> String {
        let id = format!("reg-{}", self.registry.len() + 1);
        self.registry.push(RegistryOperation {
            operation_id: id.clone(),
            kind,
            status: ComponentStatus::Pending,
            error: None,
        });
        id
    }

    fn depend(&mut self, component: &str, depends_on: &str) {
        self.dependencies.push(Dependency {
            component: component.to_string(),
            depends_on: depends_on.to_string(),
        });
    }

    /// Depend on the document paired by index, or on all of them when unpaired
    fn depends_on_paired(&mut self, component: &str, documents: &[String], index: usize) {
        match documents.get(index) {
            Some(doc) => self.depend(component, doc),
            None => {
                for doc in documents {
                    self.depend(component, doc);
                }
            }
        }
    }
}

/// Partition components into connected groups, each ordered topologically with
/// documents ahead of registry operations where dependencies allow
fn atomic_groups(
    plan_id: &str,
    ids: &[String],
    document_count: usize,
    dependencies: &[Dependency],
) -> Result<Vec<AtomicGroup>> {
    // node weight is the position in `ids`
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(ids.len(), dependencies.len());
    let nodes: HashMap<&str, NodeIndex> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), graph.add_node(i)))
        .collect();

    let mut connected = UnionFind::<usize>::new(ids.len());
    for dep in dependencies {
        let (Some(&to), Some(&from)) = (
            nodes.get(dep.component.as_str()),
            nodes.get(dep.depends_on.as_str()),
        ) else {
            return Err(invalid(format!(
                "dependency references unknown component: {} -> {}",
                dep.component, dep.depends_on
            )));
        };
        graph.add_edge(from, to, ());
        connected.union(from.index(), to.index());
    }
    if is_cyclic_directed(&graph) {
        return Err(invalid("component dependencies contain a cycle"));
    }

    // members per component, in order of their smallest member
    let mut members: Vec<Vec<NodeIndex>> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();
    for node in graph.node_indices() {
        let position = *slot.entry(connected.find(node.index())).or_insert_with(|| {
            members.push(Vec::new());
            members.len() - 1
        });
        members[position].push(node);
    }

    let rank = |node: NodeIndex| (usize::from(graph[node] >= document_count), node.index());

    let mut groups = Vec::with_capacity(members.len());
    for (n, group) in members.into_iter().enumerate() {
        let mut indegree: HashMap<NodeIndex, usize> = group
            .iter()
            .map(|&node| (node, graph.neighbors_directed(node, Incoming).count()))
            .collect();
        let mut ready: BTreeSet<(usize, usize)> = group
            .iter()
            .filter(|node| indegree.get(*node) == Some(&0))
            .map(|&node| rank(node))
            .collect();

        let mut ordered = Vec::with_capacity(group.len());
        while let Some((_, index)) = ready.pop_first() {
            let node = NodeIndex::new(index);
            ordered.push(ids[graph[node]].clone());
            for next in graph.neighbors_directed(node, Outgoing) {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(rank(next));
                    }
                }
            }
        }

        groups.push(AtomicGroup {
            group_id: format!("{}-group-{}", plan_id, n + 1),
            components: ordered,
        });
    }

    Ok(groups)
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn invalid(message: impl Into<String>) -> CoordinationError {
    CoordinationError::Validation(message.into())
}
