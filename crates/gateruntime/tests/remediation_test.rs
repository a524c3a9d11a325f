use gatecore::{ErrorClass, GatewayConfig, NodeSpec, PatchOperation, WorkflowGraph};
use gateruntime::{Approval, MemoryEngine, RemediationError, RemediationState, Remediator};
use serde_json::{json, Value};
use std::sync::Arc;

fn run(start: i64, extra: Value) -> Value {
    let mut base = json!({"startTime": start, "executionTime": 40, "executionStatus": "success"});
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    json!([base])
}

fn items(values: &[Value]) -> Value {
    json!({"main": [values.iter().map(|v| json!({"json": v})).collect::<Vec<_>>()]})
}

fn invoice_sync() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new("Invoice Sync").with_id("wf-1");
    graph.add_node(NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
    graph.add_node(
        NodeSpec::new("HTTP Request", "n8n-nodes-base.httpRequest")
            .with_parameter("url", "https://api.example.com/invoices"),
    );
    graph.add_node(NodeSpec::new("Fetch", "n8n-nodes-base.code").with_parameter("jsCode", "return $input.all();"));
    graph.add_node(NodeSpec::new("Transform", "n8n-nodes-base.code"));
    graph.connect("Webhook", "HTTP Request");
    graph.connect("HTTP Request", "Fetch");
    graph.connect("Fetch", "Transform");
    graph
}

fn rate_limited_execution() -> Value {
    json!({"id": "101", "workflowId": "wf-1", "status": "error", "data": {"resultData": {"runData": {
        "Webhook": run(1, json!({"data": items(&[json!({"invoice": 7})])})),
        "HTTP Request": run(2, json!({
            "executionStatus": "error",
            "source": [{"previousNode": "Webhook"}],
            "error": {"message": "Request failed with status code 429", "httpCode": 429}
        }))
    }}}})
}

fn malformed_execution() -> Value {
    json!({"id": "102", "workflowId": "wf-1", "status": "error", "data": {"resultData": {"runData": {
        "Webhook": run(1, json!({"data": items(&[json!({"invoice": 7})])})),
        "HTTP Request": run(2, json!({"source": [{"previousNode": "Webhook"}], "data": items(&[json!({"body": "ok"})])})),
        "Fetch": run(3, json!({"source": [{"previousNode": "HTTP Request"}], "data": items(&[json!({"rows": "not-a-list"})])})),
        "Transform": run(4, json!({
            "executionStatus": "error",
            "source": [{"previousNode": "Fetch"}],
            "error": {"message": "items.map is not a function"}
        }))
    }}}})
}

fn remediator(engine: Arc<MemoryEngine>) -> Remediator {
    Remediator::new(engine, &GatewayConfig::default())
}

#[tokio::test]
async fn test_rate_limit_is_applied_automatically() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(invoice_sync())
            .with_execution(rate_limited_execution()),
    );
    let remediator = remediator(engine.clone());

    let diagnosis = remediator.diagnose("101").await.unwrap();
    let report = diagnosis.report.unwrap();
    assert_eq!(report.error_class, ErrorClass::RateLimited);
    let patch = diagnosis.patch.unwrap();
    assert!(patch.simulated);
    assert_eq!(patch.risk_score, 0.2);
    match &patch.operation {
        PatchOperation::ModifyParameters { set, .. } => {
            assert_eq!(set["retryOnFail"], json!(true));
            assert_eq!(set["maxRetries"], json!(3));
        }
        other => panic!("unexpected operation {:?}", other),
    }
    assert_eq!(engine.calls().update_workflow, 0);

    let outcome = remediator.auto_fix("101", Approval::Auto).await.unwrap();
    assert_eq!(outcome.state, RemediationState::Applied);
    assert!(!outcome.patch.unwrap().simulated);
    assert_eq!(outcome.workflow_version, Some(2));
    assert_eq!(engine.calls().update_workflow, 1);

    let stored = engine.workflow("wf-1").unwrap();
    let node = stored.node("HTTP Request").unwrap();
    assert_eq!(node.parameter("retryOnFail"), Some(&json!(true)));
    assert_eq!(node.parameter("maxRetries"), Some(&json!(3)));
}

#[tokio::test]
async fn test_high_risk_patch_waits_for_confirmation() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(invoice_sync())
            .with_execution(malformed_execution()),
    );
    let remediator = remediator(engine.clone());

    let pending = remediator.auto_fix("102", Approval::Auto).await.unwrap();
    assert_eq!(pending.state, RemediationState::AwaitingConfirmation);
    let patch = pending.patch.clone().unwrap();
    assert_eq!(patch.error_class, ErrorClass::TypeMismatch);
    assert!(patch.risk_score >= remediator.risk_threshold());
    assert!(matches!(patch.operation, PatchOperation::InsertNode { .. }));
    assert!(!pending.changes.is_empty());
    assert_eq!(engine.calls().update_workflow, 0);

    let token = pending.confirmation_token.unwrap();
    let applied = remediator.auto_fix("102", Approval::Confirm(token)).await.unwrap();
    assert_eq!(applied.state, RemediationState::Applied);
    assert_eq!(engine.calls().update_workflow, 1);
    assert!(engine.workflow("wf-1").unwrap().node("Normalize Fetch").is_some());
}

#[tokio::test]
async fn test_wrong_token_and_decline_are_rejected() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(invoice_sync())
            .with_execution(malformed_execution()),
    );
    let remediator = remediator(engine.clone());

    let wrong = remediator
        .auto_fix("102", Approval::Confirm("not-the-hash".into()))
        .await
        .unwrap();
    assert_eq!(wrong.state, RemediationState::Rejected);

    let declined = remediator.auto_fix("102", Approval::Decline).await.unwrap();
    assert_eq!(declined.state, RemediationState::Rejected);
    assert_eq!(engine.calls().update_workflow, 0);
}

#[tokio::test]
async fn test_shadow_simulation_never_mutates() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(invoice_sync())
            .with_execution(rate_limited_execution()),
    );
    let remediator = remediator(engine.clone());

    let outcome = remediator.shadow_simulate("101").await.unwrap();
    assert_eq!(outcome.state, RemediationState::Simulated);
    assert!(!outcome.changes.is_empty());
    assert!(outcome.patch.unwrap().simulated);
    assert_eq!(engine.calls().update_workflow, 0);
    assert_eq!(engine.calls().create_workflow, 0);
    assert_eq!(engine.workflow("wf-1").unwrap().version, 1);
}

#[tokio::test]
async fn test_concurrent_edit_is_rejected() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(invoice_sync())
            .with_execution(malformed_execution()),
    );
    let remediator = remediator(engine.clone());

    let pending = remediator.auto_fix("102", Approval::Auto).await.unwrap();
    let token = pending.confirmation_token.unwrap();

    // Someone edits the workflow between the proposal and the confirmation;
    // the patch now targets a newer base version and the token no longer matches.
    engine.touch_workflow("wf-1");
    let outcome = remediator.auto_fix("102", Approval::Confirm(token)).await.unwrap();
    assert_eq!(outcome.state, RemediationState::Rejected);
    assert_eq!(engine.calls().update_workflow, 0);
    assert_eq!(engine.workflow("wf-1").unwrap().version, 2);
}

#[tokio::test]
async fn test_cancelled_remediation_leaves_remote_untouched() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(invoice_sync())
            .with_execution(rate_limited_execution()),
    );
    let remediator = remediator(engine.clone());
    remediator.shutdown_token().cancel();

    let err = remediator.auto_fix("101", Approval::Auto).await.unwrap_err();
    assert!(matches!(err, RemediationError::Cancelled));
    assert_eq!(engine.calls().update_workflow, 0);
}

#[tokio::test]
async fn test_successful_execution_has_nothing_to_fix() {
    let engine = Arc::new(MemoryEngine::new().with_workflow(invoice_sync()).with_execution(json!({
        "id": "103", "workflowId": "wf-1", "status": "success", "data": {"resultData": {"runData": {
            "Webhook": run(1, json!({}))
        }}}
    })));
    let remediator = remediator(engine.clone());

    let outcome = remediator.auto_fix("103", Approval::Auto).await.unwrap();
    assert_eq!(outcome.state, RemediationState::Simulated);
    assert!(outcome.report.is_none());
    assert_eq!(outcome.reason.as_deref(), Some("execution did not fail"));
    assert_eq!(engine.calls().update_workflow, 0);
}

#[tokio::test]
async fn test_successful_execution_with_errored_node_is_left_alone() {
    let mut execution = rate_limited_execution();
    execution["id"] = json!("104");
    execution["status"] = json!("success");
    let engine = Arc::new(MemoryEngine::new().with_workflow(invoice_sync()).with_execution(execution));
    let remediator = remediator(engine.clone());

    let outcome = remediator.auto_fix("104", Approval::Auto).await.unwrap();
    assert!(outcome.report.is_none());
    assert!(outcome.patch.is_none());
    assert_eq!(outcome.reason.as_deref(), Some("execution did not fail"));
    assert_eq!(engine.calls().update_workflow, 0);
    assert_eq!(engine.workflow("wf-1").unwrap().version, 1);
}

#[tokio::test]
async fn test_missing_execution_surfaces_not_found() {
    let engine = Arc::new(MemoryEngine::new());
    let remediator = remediator(engine);

    let err = remediator.diagnose("404").await.unwrap_err();
    assert_eq!(err.error_class(), "NotFound");
}
