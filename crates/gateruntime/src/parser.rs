//! Turns a raw execution payload into a `FailureReport`.
//!
//! The symptom is the first run marked failed. When its error says it was
//! fed malformed input, blame moves up the lineage to the nearest node that
//! actually produced items, at most `MAX_UPSTREAM_HOPS` hops away.

use crate::classifier::Classifier;
use gatecore::config::DiagnosisConfig;
use gatecore::{
    ErrorClass, ExecutionRecord, ExecutionStatus, FailureReport, FailureSignals, NodeRun, RunError, WorkflowError,
    WorkflowGraph,
};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub const MAX_UPSTREAM_HOPS: usize = 3;
pub const CONTEXT_SNIPPET_LIMIT: usize = 400;

/// Node id used when the engine reports a failure without naming a node
pub const WORKFLOW_LEVEL_NODE: &str = "(workflow)";

/// Node types that forward input untouched and are never blamed for its shape
const PASS_THROUGH_TYPES: &[&str] = &[
    "n8n-nodes-base.noOp",
    "n8n-nodes-base.wait",
    "n8n-nodes-base.merge",
    "n8n-nodes-base.if",
    "n8n-nodes-base.switch",
    "n8n-nodes-base.filter",
];

static MALFORMED_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)cannot read propert(?:y|ies) of (?:undefined|null)|is not a function|is not iterable|expected (?:an? )?(?:array|object|string|number|boolean)|must be (?:an? )?(?:array|object|string|number)|unexpected token|invalid json|wrong type|type ?error|input data (?:is )?(?:invalid|malformed)",
    )
    .expect("malformed input sentinel compiles")
});

/// Whether an error text carries the malformed-input sentinel.
pub fn is_malformed_input(text: &str) -> bool {
    MALFORMED_INPUT.is_match(text)
}

#[derive(Debug, Clone)]
pub struct ExecutionParser {
    classifier: Classifier,
}

impl ExecutionParser {
    pub fn new(config: &DiagnosisConfig) -> Self {
        Self {
            classifier: Classifier::new(config),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Parse a raw payload. `Ok(None)` means there is nothing to diagnose.
    pub fn parse(&self, raw: &Value, graph: Option<&WorkflowGraph>) -> Result<Option<FailureReport>, WorkflowError> {
        let record = ExecutionRecord::from_engine(raw)?;
        Ok(self.parse_record(&record, graph))
    }

    /// `graph` is used for lineage, node types and credentials; the execution's
    /// embedded workflow snapshot is the fallback.
    pub fn parse_record(&self, record: &ExecutionRecord, graph: Option<&WorkflowGraph>) -> Option<FailureReport> {
        // A run the engine reports as successful is never diagnosed, whatever its node runs say.
        if record.status == ExecutionStatus::Success {
            return None;
        }
        let graph = graph.or(record.workflow_snapshot.as_ref());

        let Some(position) = record.node_runs.iter().position(|run| !run.success) else {
            if !record.status.is_failure() {
                return None;
            }
            return Some(self.workflow_level_report(record, graph));
        };
        let symptom = &record.node_runs[position];

        // A failed run without its own error borrows the workflow-level one
        // only when the engine attributes that error to the same node.
        let error = symptom.error.clone().or_else(|| {
            (record.last_node_executed.as_deref() == Some(symptom.node_id.as_str()))
                .then(|| record.error.clone())
                .flatten()
        });

        let upstream_chain = chain_before(record, position);
        let node_type = node_type_of(graph, symptom, error.as_ref());

        let mut report = FailureReport {
            execution_id: record.execution_id.clone(),
            workflow_id: record.workflow_id.clone(),
            failing_node_id: symptom.node_id.clone(),
            symptom_node_id: symptom.node_id.clone(),
            error_class: ErrorClass::Unknown,
            error_message: error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
            context_snippet: None,
            upstream_chain,
            signals: FailureSignals::default(),
        };

        // Without an error payload there is no evidence to classify on
        let Some(error) = error else {
            tracing::debug!(
                execution_id = %record.execution_id,
                node = %symptom.node_id,
                "failed run carries no error payload"
            );
            return Some(report);
        };

        let text = error.full_text();
        let malformed = is_malformed_input(&text);
        report.signals = FailureSignals {
            http_status: error.http_code,
            error_name: error.name.clone(),
            description: error.description.clone(),
            node_type,
            elapsed_ms: symptom.execution_time_ms,
            malformed_input: malformed,
            unbound_credentials: graph
                .and_then(|g| g.node(&symptom.node_id))
                .map(|node| node.unbound_credentials())
                .unwrap_or_default(),
        };

        let offending_sample = if malformed {
            match self.walk_upstream(record, graph, position) {
                Some(root) => {
                    let root_run = &record.node_runs[root];
                    tracing::debug!(
                        symptom = %symptom.node_id,
                        root = %root_run.node_id,
                        "attributing malformed input upstream"
                    );
                    report.failing_node_id = root_run.node_id.clone();
                    sample_snippet(root_run.output.as_ref().and_then(|o| o.sample.as_ref()))
                }
                None => sample_snippet(symptom.input.as_ref().and_then(|i| i.sample.as_ref())),
            }
        } else {
            None
        };
        report.context_snippet = offending_sample.or_else(|| error.description.as_deref().map(truncate));

        report.error_class = self.classifier.classify(&report);
        Some(report)
    }

    /// Bounded walk up the lineage. Returns the run index of the root cause.
    fn walk_upstream(&self, record: &ExecutionRecord, graph: Option<&WorkflowGraph>, from: usize) -> Option<usize> {
        let mut current = from;
        for _ in 0..MAX_UPSTREAM_HOPS {
            let previous = lineage(record, graph, current)?;
            let run = &record.node_runs[previous];
            let produced_items = run.output.as_ref().is_some_and(|o| o.items > 0);
            if produced_items && !is_pass_through(graph, &run.node_id) {
                return Some(previous);
            }
            current = previous;
        }
        None
    }

    fn workflow_level_report(&self, record: &ExecutionRecord, graph: Option<&WorkflowGraph>) -> FailureReport {
        let node = record
            .last_node_executed
            .clone()
            .unwrap_or_else(|| WORKFLOW_LEVEL_NODE.to_string());
        let error = record.error.clone().unwrap_or_default();
        let mut report = FailureReport {
            execution_id: record.execution_id.clone(),
            workflow_id: record.workflow_id.clone(),
            failing_node_id: node.clone(),
            symptom_node_id: node.clone(),
            error_class: ErrorClass::Unknown,
            error_message: error.message.clone(),
            context_snippet: error.description.as_deref().map(truncate),
            upstream_chain: chain_before(record, record.node_runs.len()),
            signals: FailureSignals {
                http_status: error.http_code,
                error_name: error.name.clone(),
                description: error.description.clone(),
                node_type: graph.and_then(|g| g.node(&node)).map(|n| n.node_type.clone()),
                ..FailureSignals::default()
            },
        };
        if !error.message.is_empty() {
            report.error_class = self.classifier.classify(&report);
        }
        report
    }
}

/// Run index that fed `position`: the recorded source first, then graph
/// predecessors, then simply the previous run.
fn lineage(record: &ExecutionRecord, graph: Option<&WorkflowGraph>, position: usize) -> Option<usize> {
    let run = &record.node_runs[position];
    if let Some(source) = &run.source_node {
        if let Some(found) = last_index_of(record, source, position) {
            return Some(found);
        }
    }
    if let Some(graph) = graph {
        let latest = graph
            .predecessors(&run.node_id)
            .into_iter()
            .filter_map(|pred| last_index_of(record, pred, position))
            .max();
        if latest.is_some() {
            return latest;
        }
    }
    position.checked_sub(1)
}

fn last_index_of(record: &ExecutionRecord, node_id: &str, before: usize) -> Option<usize> {
    record.node_runs[..before].iter().rposition(|run| run.node_id == node_id)
}

fn is_pass_through(graph: Option<&WorkflowGraph>, node_id: &str) -> bool {
    graph
        .and_then(|g| g.node(node_id))
        .is_some_and(|node| PASS_THROUGH_TYPES.contains(&node.node_type.as_str()))
}

/// Distinct node ids executed before `position`, oldest first.
fn chain_before(record: &ExecutionRecord, position: usize) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    for run in &record.node_runs[..position] {
        if !chain.contains(&run.node_id) {
            chain.push(run.node_id.clone());
        }
    }
    chain
}

fn node_type_of(graph: Option<&WorkflowGraph>, run: &NodeRun, error: Option<&RunError>) -> Option<String> {
    graph
        .and_then(|g| g.node(&run.node_id))
        .map(|node| node.node_type.clone())
        .or_else(|| error.and_then(|e| e.node_type.clone()))
}

fn sample_snippet(sample: Option<&Value>) -> Option<String> {
    sample.map(|value| truncate(&value.to_string()))
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= CONTEXT_SNIPPET_LIMIT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(CONTEXT_SNIPPET_LIMIT).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> ExecutionParser {
        ExecutionParser::new(&DiagnosisConfig { slow_node_ms: 60_000 })
    }

    fn run(start: i64, extra: Value) -> Value {
        let mut base = json!({"startTime": start, "executionTime": 12, "executionStatus": "success"});
        if let (Value::Object(base_map), Value::Object(extra_map)) = (&mut base, extra) {
            base_map.extend(extra_map);
        }
        json!([base])
    }

    fn items(values: &[Value]) -> Value {
        json!({"main": [values.iter().map(|v| json!({"json": v})).collect::<Vec<_>>()]})
    }

    #[test]
    fn test_success_yields_nothing() {
        let raw = json!({"id": "1", "status": "success", "data": {"resultData": {"runData": {
            "Webhook": run(1, json!({}))
        }}}});
        assert!(parser().parse(&raw, None).unwrap().is_none());
    }

    #[test]
    fn test_success_status_ignores_errored_node_runs() {
        let raw = json!({"id": "1", "workflowId": "wf-1", "status": "success", "data": {"resultData": {"runData": {
            "Webhook": run(1, json!({})),
            "HTTP Request": run(2, json!({
                "executionStatus": "error",
                "source": [{"previousNode": "Webhook"}],
                "error": {"message": "Request failed with status code 429", "httpCode": 429}
            }))
        }}}});
        assert!(parser().parse(&raw, None).unwrap().is_none());
    }

    #[test]
    fn test_missing_id_is_a_parse_error() {
        let err = parser().parse(&json!({"status": "error"}), None).unwrap_err();
        assert_eq!(err.error_class(), "ParseError");
    }

    #[test]
    fn test_failed_run_without_error_is_unknown() {
        let raw = json!({"id": "2", "status": "error", "data": {"resultData": {"runData": {
            "Webhook": run(1, json!({})),
            "Code": run(2, json!({"executionStatus": "error"}))
        }}}});

        let report = parser().parse(&raw, None).unwrap().unwrap();
        assert_eq!(report.failing_node_id, "Code");
        assert_eq!(report.error_class, ErrorClass::Unknown);
        assert_eq!(report.upstream_chain, vec!["Webhook".to_string()]);
    }

    #[test]
    fn test_rate_limit_report() {
        let raw = json!({"id": "3", "workflowId": "wf-1", "status": "error", "data": {"resultData": {"runData": {
            "Webhook": run(1, json!({"data": items(&[json!({"a": 1})])})),
            "HTTP Request": run(2, json!({
                "executionStatus": "error",
                "source": [{"previousNode": "Webhook"}],
                "error": {"message": "Request failed with status code 429", "httpCode": 429}
            }))
        }}}});

        let report = parser().parse(&raw, None).unwrap().unwrap();
        assert_eq!(report.failing_node_id, "HTTP Request");
        assert!(!report.shifted());
        assert_eq!(report.signals.http_status, Some(429));
        assert_eq!(report.error_class, ErrorClass::RateLimited);
    }

    #[test]
    fn test_malformed_input_shifts_upstream() {
        let raw = json!({"id": "4", "status": "error", "data": {"resultData": {"runData": {
            "Webhook": run(1, json!({"data": items(&[json!({"body": "x"})])})),
            "Fetch": run(2, json!({"source": [{"previousNode": "Webhook"}], "data": items(&[json!({"rows": "not-a-list"})])})),
            "Pass": run(3, json!({"source": [{"previousNode": "Fetch"}], "data": items(&[json!({"rows": "not-a-list"})])})),
            "Transform": run(4, json!({
                "executionStatus": "error",
                "source": [{"previousNode": "Pass"}],
                "error": {"message": "Cannot read properties of undefined (reading 'map')"}
            }))
        }}}});

        let mut graph = WorkflowGraph::new("Shape");
        graph.add_node(gatecore::NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
        graph.add_node(gatecore::NodeSpec::new("Fetch", "n8n-nodes-base.httpRequest"));
        graph.add_node(gatecore::NodeSpec::new("Pass", "n8n-nodes-base.noOp"));
        graph.add_node(gatecore::NodeSpec::new("Transform", "n8n-nodes-base.code"));
        graph.connect("Webhook", "Fetch");
        graph.connect("Fetch", "Pass");
        graph.connect("Pass", "Transform");

        let report = parser().parse(&raw, Some(&graph)).unwrap().unwrap();
        assert_eq!(report.symptom_node_id, "Transform");
        assert_eq!(report.failing_node_id, "Fetch");
        assert_eq!(report.error_class, ErrorClass::TypeMismatch);
        assert_eq!(report.upstream_chain, vec!["Webhook", "Fetch", "Pass"]);
        assert!(report.context_snippet.unwrap().contains("not-a-list"));
    }

    #[test]
    fn test_upstream_walk_is_bounded() {
        let mut run_data = serde_json::Map::new();
        run_data.insert("Origin".into(), run(1, json!({"data": items(&[json!({"v": 1})])})));
        for (i, name) in ["Hop1", "Hop2", "Hop3"].iter().enumerate() {
            run_data.insert((*name).into(), run(2 + i as i64, json!({})));
        }
        run_data.insert(
            "Sink".into(),
            run(10, json!({"executionStatus": "error", "error": {"message": "items.map is not a function"}})),
        );
        let raw = json!({"id": "5", "status": "error", "data": {"resultData": {"runData": run_data}}});

        let report = parser().parse(&raw, None).unwrap().unwrap();
        // Origin is four hops away: attribution stays on the symptom
        assert_eq!(report.failing_node_id, "Sink");
        assert_eq!(report.error_class, ErrorClass::TypeMismatch);
    }

    #[test]
    fn test_unbound_credential_from_graph() {
        let raw = json!({"id": "6", "status": "error", "data": {"resultData": {"runData": {
            "Slack": run(1, json!({"executionStatus": "error", "error": {"message": "Node has no access to credential"}}))
        }}}});
        let mut graph = WorkflowGraph::new("Notify");
        graph.add_node(
            gatecore::NodeSpec::new("Slack", "n8n-nodes-base.slack")
                .with_credential("slackApi", gatecore::CredentialRef::default()),
        );

        let report = parser().parse(&raw, Some(&graph)).unwrap().unwrap();
        assert_eq!(report.signals.unbound_credentials, vec!["slackApi".to_string()]);
        assert_eq!(report.error_class, ErrorClass::CredentialMissing);
    }

    #[test]
    fn test_workflow_level_failure() {
        let raw = json!({"id": "7", "status": "crashed", "data": {"resultData": {
            "error": {"message": "Workflow did not finish, timed out"}
        }}});
        let report = parser().parse(&raw, None).unwrap().unwrap();
        assert_eq!(report.failing_node_id, WORKFLOW_LEVEL_NODE);
        assert_eq!(report.error_class, ErrorClass::Timeout);
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = "x".repeat(CONTEXT_SNIPPET_LIMIT * 2);
        assert_eq!(truncate(&long).chars().count(), CONTEXT_SNIPPET_LIMIT + 1);
        assert_eq!(truncate("short"), "short");
    }
}
