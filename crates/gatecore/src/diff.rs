//! Structural diffing between two workflow graphs.
//!
//! Changes come out in a fixed order: removed nodes, added nodes, modified
//! nodes (by id), removed connections, added connections. Node positions are
//! layout hints and never produce a change.

use crate::workflow::{Connection, NodeId, NodeSpec, WorkflowGraph};
use crate::WorkflowError;
use serde::{Deserialize, Serialize};

/// One structural difference between two graphs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum GraphChange {
    NodeAdded { node: NodeSpec },
    NodeRemoved { node: NodeSpec },
    NodeModified {
        id: NodeId,
        fields: Vec<String>,
        before: NodeSpec,
        after: NodeSpec,
    },
    ConnectionAdded { connection: Connection },
    ConnectionRemoved { connection: Connection },
}

impl GraphChange {
    /// The change that undoes this one.
    pub fn inverse(&self) -> GraphChange {
        match self {
            GraphChange::NodeAdded { node } => GraphChange::NodeRemoved { node: node.clone() },
            GraphChange::NodeRemoved { node } => GraphChange::NodeAdded { node: node.clone() },
            GraphChange::NodeModified { id, fields, before, after } => GraphChange::NodeModified {
                id: id.clone(),
                fields: fields.clone(),
                before: after.clone(),
                after: before.clone(),
            },
            GraphChange::ConnectionAdded { connection } => GraphChange::ConnectionRemoved {
                connection: connection.clone(),
            },
            GraphChange::ConnectionRemoved { connection } => GraphChange::ConnectionAdded {
                connection: connection.clone(),
            },
        }
    }

    /// One-line description used for change-audit logging.
    pub fn describe(&self) -> String {
        match self {
            GraphChange::NodeAdded { node } => format!("+ node '{}' ({})", node.id, node.node_type),
            GraphChange::NodeRemoved { node } => format!("- node '{}' ({})", node.id, node.node_type),
            GraphChange::NodeModified { id, fields, .. } => {
                format!("~ node '{}' [{}]", id, fields.join(", "))
            }
            GraphChange::ConnectionAdded { connection } => format!(
                "+ edge '{}'[{}] -> '{}'[{}]",
                connection.source, connection.source_output, connection.target, connection.target_input
            ),
            GraphChange::ConnectionRemoved { connection } => format!(
                "- edge '{}'[{}] -> '{}'[{}]",
                connection.source, connection.source_output, connection.target, connection.target_input
            ),
        }
    }
}

/// Ordered structural changes turning `before` into `after`.
pub fn diff(before: &WorkflowGraph, after: &WorkflowGraph) -> Vec<GraphChange> {
    let mut changes = Vec::new();

    for (id, node) in &before.nodes {
        if !after.nodes.contains_key(id) {
            changes.push(GraphChange::NodeRemoved { node: node.clone() });
        }
    }
    for (id, node) in &after.nodes {
        if !before.nodes.contains_key(id) {
            changes.push(GraphChange::NodeAdded { node: node.clone() });
        }
    }
    for (id, old) in &before.nodes {
        if let Some(new) = after.nodes.get(id) {
            let fields = changed_fields(old, new);
            if !fields.is_empty() {
                changes.push(GraphChange::NodeModified {
                    id: id.clone(),
                    fields,
                    before: old.clone(),
                    after: new.clone(),
                });
            }
        }
    }

    // Connections form a multiset: parallel edges count individually
    let mut unmatched_after: Vec<Option<&Connection>> = after.connections.iter().map(Some).collect();
    let mut removed = Vec::new();
    for conn in &before.connections {
        match unmatched_after.iter_mut().find(|slot| slot.is_some_and(|c| c == conn)) {
            Some(slot) => *slot = None,
            None => removed.push(conn),
        }
    }
    changes.extend(removed.into_iter().map(|conn| GraphChange::ConnectionRemoved {
        connection: conn.clone(),
    }));
    changes.extend(unmatched_after.into_iter().flatten().map(|conn| GraphChange::ConnectionAdded {
        connection: conn.clone(),
    }));

    changes
}

/// Graphs are structurally equal when their diff is empty.
pub fn structurally_eq(a: &WorkflowGraph, b: &WorkflowGraph) -> bool {
    diff(a, b).is_empty()
}

/// Inverse of a change list, in application order.
pub fn invert(changes: &[GraphChange]) -> Vec<GraphChange> {
    changes.iter().map(GraphChange::inverse).collect()
}

/// Apply a change list to a copy of `graph`. Endpoints are validated once at the end.
pub fn apply_changes(graph: &WorkflowGraph, changes: &[GraphChange]) -> Result<WorkflowGraph, WorkflowError> {
    let mut next = graph.clone();
    for change in changes {
        match change {
            GraphChange::NodeAdded { node } => {
                if next.nodes.contains_key(&node.id) {
                    return Err(WorkflowError::PatchConflict {
                        target: node.id.clone(),
                        reason: "node already exists".into(),
                    });
                }
                next.nodes.insert(node.id.clone(), node.clone());
            }
            GraphChange::NodeRemoved { node } => {
                if next.nodes.remove(&node.id).is_none() {
                    return Err(WorkflowError::NodeNotFound(node.id.clone()));
                }
            }
            GraphChange::NodeModified { id, after, .. } => match next.nodes.get_mut(id) {
                Some(slot) => *slot = after.clone(),
                None => return Err(WorkflowError::NodeNotFound(id.clone())),
            },
            GraphChange::ConnectionAdded { connection } => next.connections.push(connection.clone()),
            GraphChange::ConnectionRemoved { connection } => {
                let position = next
                    .connections
                    .iter()
                    .position(|c| c == connection)
                    .ok_or_else(|| WorkflowError::PatchConflict {
                        target: connection.source.clone(),
                        reason: format!("connection to '{}' does not exist", connection.target),
                    })?;
                next.connections.remove(position);
            }
        }
    }
    next.validate()?;
    Ok(next)
}

fn changed_fields(old: &NodeSpec, new: &NodeSpec) -> Vec<String> {
    let mut fields = Vec::new();
    if old.node_type != new.node_type {
        fields.push("type".to_string());
    }
    if old.type_version != new.type_version {
        fields.push("typeVersion".to_string());
    }
    if old.disabled != new.disabled {
        fields.push("disabled".to_string());
    }
    if old.credentials != new.credentials {
        fields.push("credentials".to_string());
    }
    if old.engine_id != new.engine_id {
        fields.push("engineId".to_string());
    }
    let keys: std::collections::BTreeSet<&String> =
        old.parameters.keys().chain(new.parameters.keys()).collect();
    for key in keys {
        if old.parameters.get(key) != new.parameters.get(key) {
            fields.push(format!("parameters.{}", key));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("Invoice Sync");
        graph.add_node(NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
        graph.add_node(NodeSpec::new("HTTP Request", "n8n-nodes-base.httpRequest").with_parameter("url", "https://x"));
        graph.add_node(NodeSpec::new("Slack", "n8n-nodes-base.slack"));
        graph.connect("Webhook", "HTTP Request");
        graph.connect("HTTP Request", "Slack");
        graph
    }

    #[test]
    fn test_diff_is_reflexive() {
        let graph = base();
        assert!(diff(&graph, &graph).is_empty());
    }

    #[test]
    fn test_diff_orders_changes() {
        let a = base();
        let mut b = base();
        b.nodes.remove("Slack");
        b.connections.retain(|c| c.target != "Slack");
        b.add_node(NodeSpec::new("Email", "n8n-nodes-base.emailSend"));
        b.connect("HTTP Request", "Email");
        if let Some(node) = b.nodes.get_mut("HTTP Request") {
            node.set_parameter("retryOnFail", json!(true));
        }

        let changes = diff(&a, &b);
        assert_eq!(changes.len(), 5);
        assert!(matches!(&changes[0], GraphChange::NodeRemoved { node } if node.id == "Slack"));
        assert!(matches!(&changes[1], GraphChange::NodeAdded { node } if node.id == "Email"));
        assert!(matches!(&changes[2], GraphChange::NodeModified { fields, .. } if fields == &vec!["parameters.retryOnFail".to_string()]));
        assert!(matches!(&changes[3], GraphChange::ConnectionRemoved { connection } if connection.target == "Slack"));
        assert!(matches!(&changes[4], GraphChange::ConnectionAdded { connection } if connection.target == "Email"));
    }

    #[test]
    fn test_position_is_not_structural() {
        let a = base();
        let mut b = base();
        if let Some(node) = b.nodes.get_mut("Slack") {
            node.position = Some(crate::workflow::Position { x: 400.0, y: 80.0 });
        }
        assert!(structurally_eq(&a, &b));
    }

    #[test]
    fn test_parallel_edges_count_individually() {
        let a = base();
        let mut b = base();
        b.connect("Webhook", "HTTP Request");

        let changes = diff(&a, &b);
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], GraphChange::ConnectionAdded { .. }));
    }

    #[test]
    fn test_inverse_round_trip() {
        let a = base();
        let mut b = base();
        b.nodes.remove("Webhook");
        b.connections.retain(|c| !c.touches("Webhook"));
        b.add_node(NodeSpec::new("Cron", "n8n-nodes-base.scheduleTrigger"));
        b.connect("Cron", "HTTP Request");
        if let Some(node) = b.nodes.get_mut("Slack") {
            node.disabled = true;
        }

        let forward = diff(&a, &b);
        let replayed = apply_changes(&a, &forward).unwrap();
        assert!(structurally_eq(&replayed, &b));

        let restored = apply_changes(&b, &invert(&forward)).unwrap();
        assert!(structurally_eq(&restored, &a));
    }

    #[test]
    fn test_apply_changes_rejects_missing_connection() {
        let graph = base();
        let change = GraphChange::ConnectionRemoved {
            connection: Connection::main("Slack", "Webhook"),
        };
        assert!(matches!(
            apply_changes(&graph, &[change]),
            Err(WorkflowError::PatchConflict { .. })
        ));
    }
}
