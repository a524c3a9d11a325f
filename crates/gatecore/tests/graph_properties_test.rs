use gatecore::{
    apply_changes, apply_patch, diff, invert, structurally_eq, Connection, ErrorClass, NodeSpec, Patch,
    PatchOperation, WorkflowError, WorkflowGraph,
};
use serde_json::json;
use std::collections::BTreeMap;

/// Order pipeline with a branch and a loop back into the retry gate
fn order_pipeline() -> WorkflowGraph {
    WorkflowGraph::load(&json!({
        "id": "41",
        "name": "Order Pipeline",
        "versionCounter": 7,
        "nodes": [
            {"name": "Cron", "type": "n8n-nodes-base.scheduleTrigger", "parameters": {}},
            {"name": "Fetch Orders", "type": "n8n-nodes-base.httpRequest", "parameters": {"url": "https://shop/orders", "options": {}}},
            {"name": "Has Orders", "type": "n8n-nodes-base.if", "parameters": {}},
            {"name": "Store", "type": "n8n-nodes-base.postgres", "parameters": {"table": "orders"}},
            {"name": "Wait", "type": "n8n-nodes-base.wait", "parameters": {"amount": 5}}
        ],
        "connections": {
            "Cron": {"main": [[{"node": "Fetch Orders", "type": "main", "index": 0}]]},
            "Fetch Orders": {"main": [[{"node": "Has Orders", "type": "main", "index": 0}]]},
            "Has Orders": {"main": [
                [{"node": "Store", "type": "main", "index": 0}],
                [{"node": "Wait", "type": "main", "index": 0}]
            ]},
            "Wait": {"main": [[{"node": "Fetch Orders", "type": "main", "index": 0}]]}
        }
    }))
    .unwrap()
}

fn patches(graph: &WorkflowGraph) -> Vec<Patch> {
    let mut set = BTreeMap::new();
    set.insert("options.timeout".to_string(), json!(60000));
    vec![
        Patch::new(
            ErrorClass::Timeout,
            "Fetch Orders",
            PatchOperation::ModifyParameters { set, unset: vec![] },
            "raise timeout",
            0.3,
            graph.version,
        ),
        Patch::new(ErrorClass::Timeout, "Store", PatchOperation::DisableNode, "requires manual redesign", 0.3, graph.version),
        Patch::new(
            ErrorClass::TypeMismatch,
            "Has Orders",
            PatchOperation::InsertNode {
                node: NodeSpec::new("Normalize Has Orders", "n8n-nodes-base.code"),
                after: "Has Orders".into(),
                output: 1,
            },
            "normalize the false branch",
            0.5,
            graph.version,
        ),
        Patch::new(
            ErrorClass::Unknown,
            "Store",
            PatchOperation::RewireConnection {
                remove: Connection::main("Has Orders", "Store"),
                add: Connection::main("Fetch Orders", "Store"),
            },
            "skip the gate",
            0.4,
            graph.version,
        ),
    ]
}

#[test]
fn test_applied_patch_diff_matches_declared_operation() {
    let graph = order_pipeline();
    for patch in patches(&graph) {
        let next = apply_patch(&graph, &patch).unwrap();
        let changes = diff(&graph, &next);
        assert!(!changes.is_empty(), "{} produced no change", patch.operation.name());
        assert!(patch.accounts_for(&changes), "{} diff mismatch: {:?}", patch.operation.name(), changes);
        assert_eq!(next.version, graph.version + 1);
    }
}

#[test]
fn test_patch_round_trips_through_inverse_diff() {
    let graph = order_pipeline();
    for patch in patches(&graph) {
        let next = apply_patch(&graph, &patch).unwrap();
        let restored = apply_changes(&next, &invert(&diff(&graph, &next))).unwrap();
        assert!(structurally_eq(&restored, &graph));
    }
}

#[test]
fn test_insert_on_branch_leaves_other_output_alone() {
    let graph = order_pipeline();
    let insert = patches(&graph).remove(2);
    let next = apply_patch(&graph, &insert).unwrap();

    assert_eq!(next.successors("Has Orders"), vec!["Store", "Normalize Has Orders"]);
    assert_eq!(next.successors("Normalize Has Orders"), vec!["Wait"]);
    assert!(next.downstream_of("Normalize Has Orders").contains(&"Fetch Orders".to_string()));
}

#[test]
fn test_reapplying_against_new_version_conflicts() {
    let graph = order_pipeline();
    let patch = patches(&graph).remove(1);
    let next = apply_patch(&graph, &patch).unwrap();

    match apply_patch(&next, &patch) {
        Err(WorkflowError::PatchConflict { target, .. }) => assert_eq!(target, "Store"),
        other => panic!("expected conflict, got {:?}", other),
    }
}
