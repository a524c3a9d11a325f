//! Patches: the single mutation path for a workflow graph.

use crate::diff::{diff, GraphChange};
use crate::workflow::{Connection, NodeId, NodeSpec, WorkflowGraph};
use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Closed failure taxonomy, in classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    AuthError,
    CredentialMissing,
    TypeMismatch,
    RateLimited,
    Timeout,
    Unknown,
}

impl ErrorClass {
    pub const ORDERED: [ErrorClass; 6] = [
        ErrorClass::AuthError,
        ErrorClass::CredentialMissing,
        ErrorClass::TypeMismatch,
        ErrorClass::RateLimited,
        ErrorClass::Timeout,
        ErrorClass::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::AuthError => "AuthError",
            ErrorClass::CredentialMissing => "CredentialMissing",
            ErrorClass::TypeMismatch => "TypeMismatch",
            ErrorClass::RateLimited => "RateLimited",
            ErrorClass::Timeout => "Timeout",
            ErrorClass::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a patch does to its target node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum PatchOperation {
    /// Set and unset parameters by dotted path
    ModifyParameters {
        #[serde(default)]
        set: BTreeMap<String, Value>,
        #[serde(default)]
        unset: Vec<String>,
    },
    DisableNode,
    /// Insert `node` on output `output` of `after`, taking over its outgoing edges there
    InsertNode {
        node: NodeSpec,
        after: NodeId,
        #[serde(default)]
        output: usize,
    },
    RewireConnection { remove: Connection, add: Connection },
    NoOp,
}

impl PatchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            PatchOperation::ModifyParameters { .. } => "modify_parameters",
            PatchOperation::DisableNode => "disable_node",
            PatchOperation::InsertNode { .. } => "insert_node",
            PatchOperation::RewireConnection { .. } => "rewire_connection",
            PatchOperation::NoOp => "no_op",
        }
    }
}

/// A proposed graph mutation. Never applies itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patch {
    pub id: Uuid,
    pub target_node_id: NodeId,
    pub operation: PatchOperation,
    pub rationale: String,
    pub risk_score: f64,
    pub simulated: bool,
    pub error_class: ErrorClass,
    /// Graph version the patch was generated against
    pub base_version: u64,
    pub requires_confirmation: bool,
}

impl Patch {
    pub fn new(
        error_class: ErrorClass,
        target_node_id: impl Into<String>,
        operation: PatchOperation,
        rationale: impl Into<String>,
        risk_score: f64,
        base_version: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_node_id: target_node_id.into(),
            operation,
            rationale: rationale.into(),
            risk_score: risk_score.clamp(0.0, 1.0),
            simulated: true,
            error_class,
            base_version,
            requires_confirmation: false,
        }
    }

    /// Empty patch for failures that need a human.
    pub fn empty(
        error_class: ErrorClass,
        target_node_id: impl Into<String>,
        rationale: impl Into<String>,
        base_version: u64,
    ) -> Self {
        Self::new(error_class, target_node_id, PatchOperation::NoOp, rationale, 0.0, base_version)
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.operation, PatchOperation::NoOp)
    }

    /// Content hash used as the confirmation token. Excludes `id` and `simulated`
    /// so the same diagnosis regenerated later hashes identically.
    pub fn rationale_hash(&self) -> String {
        let operation = serde_json::to_string(&self.operation).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.target_node_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(operation.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.rationale.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.base_version.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether `changes` are exactly what this patch's operation declares.
    pub fn accounts_for(&self, changes: &[GraphChange]) -> bool {
        let target = &self.target_node_id;
        match &self.operation {
            PatchOperation::ModifyParameters { set, unset } => match changes {
                [GraphChange::NodeModified { id, before, after, .. }] => {
                    id == target
                        && before.disabled == after.disabled
                        && before.node_type == after.node_type
                        && set.iter().all(|(path, value)| after.parameter(path) == Some(value))
                        && unset.iter().all(|path| after.parameter(path).is_none())
                }
                _ => false,
            },
            PatchOperation::DisableNode => matches!(
                changes,
                [GraphChange::NodeModified { id, fields, after, .. }]
                    if id == target && after.disabled && fields == &vec!["disabled".to_string()]
            ),
            PatchOperation::InsertNode { node, after, output } => {
                let added: Vec<&NodeSpec> = changes
                    .iter()
                    .filter_map(|change| match change {
                        GraphChange::NodeAdded { node } => Some(node),
                        _ => None,
                    })
                    .collect();
                added.len() == 1
                    && added[0].id == node.id
                    && changes.iter().all(|change| match change {
                        GraphChange::NodeAdded { .. } => true,
                        GraphChange::ConnectionAdded { connection } => connection.touches(&node.id),
                        GraphChange::ConnectionRemoved { connection } => {
                            &connection.source == after && connection.source_output == *output
                        }
                        _ => false,
                    })
            }
            PatchOperation::RewireConnection { remove, add } => matches!(
                changes,
                [GraphChange::ConnectionRemoved { connection: r }, GraphChange::ConnectionAdded { connection: a }]
                    if r == remove && a == add
            ),
            PatchOperation::NoOp => changes.is_empty(),
        }
    }
}

/// Apply a patch, producing the next graph version.
///
/// Fails with `PatchConflict` when the graph moved past the patch's base version
/// or the target node is gone, and with `PatchNoEffect` when nothing would change.
pub fn apply_patch(graph: &WorkflowGraph, patch: &Patch) -> Result<WorkflowGraph, WorkflowError> {
    let target = &patch.target_node_id;
    if patch.base_version != graph.version {
        return Err(WorkflowError::PatchConflict {
            target: target.clone(),
            reason: format!(
                "patch was generated for version {} but the workflow is at version {}",
                patch.base_version, graph.version
            ),
        });
    }
    if !graph.nodes.contains_key(target) {
        return Err(WorkflowError::PatchConflict {
            target: target.clone(),
            reason: "target node no longer exists".into(),
        });
    }

    let mut next = graph.clone();
    match &patch.operation {
        PatchOperation::ModifyParameters { set, unset } => {
            let node = target_node(&mut next, target)?;
            for (path, value) in set {
                node.set_parameter(path, value.clone());
            }
            for path in unset {
                node.remove_parameter(path);
            }
        }
        PatchOperation::DisableNode => {
            target_node(&mut next, target)?.disabled = true;
        }
        PatchOperation::InsertNode { node, after, output } => {
            insert_after(&mut next, node, after, *output)?;
        }
        PatchOperation::RewireConnection { remove, add } => {
            let position = next
                .connections
                .iter()
                .position(|c| c == remove)
                .ok_or_else(|| WorkflowError::PatchConflict {
                    target: target.clone(),
                    reason: format!("connection '{}' -> '{}' no longer exists", remove.source, remove.target),
                })?;
            for endpoint in [&add.source, &add.target] {
                if !next.nodes.contains_key(endpoint) {
                    return Err(WorkflowError::PatchConflict {
                        target: target.clone(),
                        reason: format!("rewired endpoint '{}' does not exist", endpoint),
                    });
                }
            }
            next.connections[position] = add.clone();
        }
        PatchOperation::NoOp => return Err(WorkflowError::PatchNoEffect(target.clone())),
    }

    if diff(graph, &next).is_empty() {
        return Err(WorkflowError::PatchNoEffect(target.clone()));
    }
    next.version = graph.version + 1;
    Ok(next)
}

fn target_node<'a>(graph: &'a mut WorkflowGraph, target: &str) -> Result<&'a mut NodeSpec, WorkflowError> {
    graph
        .nodes
        .get_mut(target)
        .ok_or_else(|| WorkflowError::NodeNotFound(target.to_string()))
}

fn insert_after(
    graph: &mut WorkflowGraph,
    node: &NodeSpec,
    after: &str,
    output: usize,
) -> Result<(), WorkflowError> {
    if !graph.nodes.contains_key(after) {
        return Err(WorkflowError::PatchConflict {
            target: after.to_string(),
            reason: "insertion point no longer exists".into(),
        });
    }
    if graph.nodes.contains_key(&node.id) {
        return Err(WorkflowError::PatchConflict {
            target: after.to_string(),
            reason: format!("a node named '{}' already exists", node.id),
        });
    }

    let (outgoing, kept): (Vec<Connection>, Vec<Connection>) = graph
        .connections
        .drain(..)
        .partition(|c| c.source == after && c.source_output == output);
    graph.connections = kept;
    graph.nodes.insert(node.id.clone(), node.clone());

    let kind = outgoing
        .first()
        .map(|c| c.kind.clone())
        .unwrap_or_else(|| crate::workflow::MAIN_CONNECTION.to_string());
    graph.connections.push(Connection {
        source: after.to_string(),
        source_output: output,
        target: node.id.clone(),
        target_input: 0,
        kind,
    });
    for conn in outgoing {
        graph.connections.push(Connection {
            source: node.id.clone(),
            source_output: 0,
            target: conn.target,
            target_input: conn.target_input,
            kind: conn.kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("Invoice Sync");
        graph.version = 3;
        graph.add_node(NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
        graph.add_node(NodeSpec::new("HTTP Request", "n8n-nodes-base.httpRequest"));
        graph.add_node(NodeSpec::new("Slack", "n8n-nodes-base.slack"));
        graph.add_node(NodeSpec::new("Sheets", "n8n-nodes-base.googleSheets"));
        graph.connect("Webhook", "HTTP Request");
        graph.connect("HTTP Request", "Slack");
        graph.connect("HTTP Request", "Sheets");
        graph
    }

    fn retry_patch(base_version: u64) -> Patch {
        let mut set = BTreeMap::new();
        set.insert("retryOnFail".to_string(), json!(true));
        set.insert("maxRetries".to_string(), json!(3));
        Patch::new(
            ErrorClass::RateLimited,
            "HTTP Request",
            PatchOperation::ModifyParameters { set, unset: vec![] },
            "retry with backoff",
            0.2,
            base_version,
        )
    }

    #[test]
    fn test_apply_modify_parameters() {
        let before = graph();
        let patch = retry_patch(3);
        let after = apply_patch(&before, &patch).unwrap();

        assert_eq!(after.version, 4);
        assert_eq!(after.node("HTTP Request").unwrap().parameter("maxRetries"), Some(&json!(3)));
        assert!(patch.accounts_for(&diff(&before, &after)));
        assert_eq!(before.version, 3);
    }

    #[test]
    fn test_stale_patch_conflicts() {
        let err = apply_patch(&graph(), &retry_patch(2)).unwrap_err();
        assert_eq!(err.error_class(), "PatchConflictError");
    }

    #[test]
    fn test_missing_target_conflicts() {
        let mut patch = retry_patch(3);
        patch.target_node_id = "Gone".into();
        assert!(matches!(
            apply_patch(&graph(), &patch),
            Err(WorkflowError::PatchConflict { .. })
        ));
    }

    #[test]
    fn test_no_effect_is_an_error() {
        let once = apply_patch(&graph(), &retry_patch(3)).unwrap();
        let err = apply_patch(&once, &retry_patch(4)).unwrap_err();
        assert!(matches!(err, WorkflowError::PatchNoEffect(_)));

        let empty = Patch::empty(ErrorClass::Unknown, "HTTP Request", "manual review required", 3);
        assert!(matches!(apply_patch(&graph(), &empty), Err(WorkflowError::PatchNoEffect(_))));
    }

    #[test]
    fn test_insert_node_takes_over_outgoing_edges() {
        let before = graph();
        let normalizer = NodeSpec::new("Normalize HTTP Request", "n8n-nodes-base.code");
        let patch = Patch::new(
            ErrorClass::TypeMismatch,
            "HTTP Request",
            PatchOperation::InsertNode {
                node: normalizer,
                after: "HTTP Request".into(),
                output: 0,
            },
            "normalize output",
            0.6,
            3,
        );

        let after = apply_patch(&before, &patch).unwrap();
        assert_eq!(after.successors("HTTP Request"), vec!["Normalize HTTP Request"]);
        assert_eq!(after.successors("Normalize HTTP Request"), vec!["Slack", "Sheets"]);
        assert!(patch.accounts_for(&diff(&before, &after)));
    }

    #[test]
    fn test_disable_and_rewire() {
        let before = graph();
        let disable = Patch::new(ErrorClass::Timeout, "Slack", PatchOperation::DisableNode, "requires manual redesign", 0.3, 3);
        let after = apply_patch(&before, &disable).unwrap();
        assert!(after.node("Slack").unwrap().disabled);
        assert!(disable.accounts_for(&diff(&before, &after)));

        let rewire = Patch::new(
            ErrorClass::Unknown,
            "Sheets",
            PatchOperation::RewireConnection {
                remove: Connection::main("HTTP Request", "Sheets"),
                add: Connection::main("Webhook", "Sheets"),
            },
            "feed sheets from the trigger",
            0.5,
            3,
        );
        let rewired = apply_patch(&before, &rewire).unwrap();
        assert_eq!(rewired.predecessors("Sheets"), vec!["Webhook"]);
        assert!(rewire.accounts_for(&diff(&before, &rewired)));
    }

    #[test]
    fn test_rationale_hash_ignores_patch_id() {
        let a = retry_patch(3);
        let b = retry_patch(3);
        assert_ne!(a.id, b.id);
        assert_eq!(a.rationale_hash(), b.rationale_hash());
        assert_ne!(a.rationale_hash(), retry_patch(4).rationale_hash());
        assert_eq!(a.rationale_hash().len(), 64);
    }
}
