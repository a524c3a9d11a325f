//! One remediation strategy per failure class.
//!
//! Strategies are pure: `(graph, report) -> Patch`. A diagnosis yields at most
//! one patch, and every patch starts out simulated.

use gatecore::config::RemediationConfig;
use gatecore::{ErrorClass, FailureReport, NodeSpec, Patch, PatchOperation, WorkflowGraph};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const CREDENTIAL_RISK: f64 = 0.1;
pub const RATE_LIMIT_RISK: f64 = 0.2;
pub const TIMEOUT_RISK: f64 = 0.3;

pub const MIN_RETRIES: u64 = 3;
pub const MAX_RETRIES: u64 = 5;
pub const DEFAULT_RETRY_WAIT_MS: u64 = 1_000;
pub const MAX_RETRY_WAIT_MS: u64 = 5_000;

/// Node timeout assumed when none is configured
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 30_000;

const TYPE_MISMATCH_BASE_RISK: f64 = 0.4;
const TYPE_MISMATCH_RISK_PER_CONSUMER: f64 = 0.1;
const TYPE_MISMATCH_MAX_RISK: f64 = 0.95;

pub const MANUAL_REVIEW: &str = "manual review required";

const NORMALIZE_CODE: &str = "return $input.all().map((item) => {\n  const json = item.json;\n  if (json !== null && typeof json === 'object' && !Array.isArray(json)) {\n    return { json };\n  }\n  return { json: { value: json } };\n});";

/// Risk of a type-mismatch fix with `consumers` downstream nodes.
pub fn type_mismatch_risk(consumers: usize) -> f64 {
    (TYPE_MISMATCH_BASE_RISK + TYPE_MISMATCH_RISK_PER_CONSUMER * consumers as f64).min(TYPE_MISMATCH_MAX_RISK)
}

#[derive(Debug, Clone)]
pub struct PatchGenerator {
    timeout_ceiling_ms: u64,
}

impl PatchGenerator {
    pub fn new(config: &RemediationConfig) -> Self {
        Self {
            timeout_ceiling_ms: config.timeout_ceiling_ms,
        }
    }

    pub fn generate(&self, graph: &WorkflowGraph, report: &FailureReport) -> Patch {
        let patch = match report.error_class {
            ErrorClass::AuthError => auth_error(graph, report),
            ErrorClass::CredentialMissing => credential_missing(graph, report),
            ErrorClass::TypeMismatch => type_mismatch(graph, report),
            ErrorClass::RateLimited => rate_limited(graph, report),
            ErrorClass::Timeout => timeout(graph, report, self.timeout_ceiling_ms),
            ErrorClass::Unknown => unknown(graph, report),
        };
        tracing::debug!(
            class = %report.error_class,
            target = %patch.target_node_id,
            operation = patch.operation.name(),
            risk = patch.risk_score,
            "generated patch"
        );
        patch
    }
}

fn manual_review(graph: &WorkflowGraph, report: &FailureReport, why: &str) -> Patch {
    Patch::empty(
        report.error_class,
        report.failing_node_id.clone(),
        format!("{}; {}", why, MANUAL_REVIEW),
        graph.version,
    )
}

fn auth_error(graph: &WorkflowGraph, report: &FailureReport) -> Patch {
    manual_review(
        graph,
        report,
        &format!(
            "the service rejected the credential used by '{}'; re-authorise it",
            report.failing_node_id
        ),
    )
}

fn unknown(graph: &WorkflowGraph, report: &FailureReport) -> Patch {
    Patch::empty(ErrorClass::Unknown, report.failing_node_id.clone(), MANUAL_REVIEW, graph.version)
}

fn credential_missing(graph: &WorkflowGraph, report: &FailureReport) -> Patch {
    let Some(node) = graph.node(&report.failing_node_id) else {
        return manual_review(graph, report, "the failing node is not part of the current workflow");
    };

    let credential_types = if report.signals.unbound_credentials.is_empty() {
        node.credentials.keys().cloned().collect::<Vec<_>>()
    } else {
        report.signals.unbound_credentials.clone()
    };
    let needed = if credential_types.is_empty() {
        "a credential".to_string()
    } else {
        credential_types.join(", ")
    };

    let mut set = BTreeMap::new();
    set.insert("notes".to_string(), json!(format!("Bind credential manually: {}", needed)));
    set.insert("notesInFlow".to_string(), json!(true));

    Patch::new(
        ErrorClass::CredentialMissing,
        node.id.clone(),
        PatchOperation::ModifyParameters { set, unset: vec![] },
        format!("'{}' references an unset credential ({}); flagged for manual binding", node.id, needed),
        CREDENTIAL_RISK,
        graph.version,
    )
    .requiring_confirmation()
}

fn type_mismatch(graph: &WorkflowGraph, report: &FailureReport) -> Patch {
    // Blame the producer: the shifted root, or the symptom's first predecessor
    let producer = if report.shifted() {
        Some(report.failing_node_id.as_str())
    } else {
        graph
            .predecessors(&report.symptom_node_id)
            .first()
            .copied()
            .map(String::as_str)
    };
    let Some(node) = producer.and_then(|id| graph.node(id)) else {
        return manual_review(graph, report, "no upstream producer could be identified");
    };

    let consumers = graph.downstream_of(&node.id).len();
    let risk = type_mismatch_risk(consumers);

    if let Some((path, value)) = narrowing(node) {
        let mut set = BTreeMap::new();
        set.insert(path.to_string(), value);
        return Patch::new(
            ErrorClass::TypeMismatch,
            node.id.clone(),
            PatchOperation::ModifyParameters { set, unset: vec![] },
            format!(
                "'{}' received malformed data from '{}'; narrowing '{}' output via {} ({} downstream consumers)",
                report.symptom_node_id, node.id, node.id, path, consumers
            ),
            risk,
            graph.version,
        );
    }

    let normalizer = normalization_node(graph, node);
    let output = output_towards(graph, &node.id, &report.symptom_node_id);
    Patch::new(
        ErrorClass::TypeMismatch,
        node.id.clone(),
        PatchOperation::InsertNode {
            node: normalizer,
            after: node.id.clone(),
            output,
        },
        format!(
            "'{}' received malformed data from '{}'; inserting a normalization step ({} downstream consumers)",
            report.symptom_node_id, node.id, consumers
        ),
        risk,
        graph.version,
    )
}

/// Parameter change that makes a node emit a stricter output shape, if one is known.
fn narrowing(node: &NodeSpec) -> Option<(&'static str, Value)> {
    match node.node_type.as_str() {
        "n8n-nodes-base.httpRequest" => {
            let path = "options.response.response.responseFormat";
            (node.parameter(path) != Some(&json!("json"))).then(|| (path, json!("json")))
        }
        "n8n-nodes-base.set" if node.type_version < 3.0 => {
            (node.parameter("keepOnlySet") != Some(&json!(true))).then(|| ("keepOnlySet", json!(true)))
        }
        _ => None,
    }
}

fn normalization_node(graph: &WorkflowGraph, after: &NodeSpec) -> NodeSpec {
    let base = format!("Normalize {}", after.id);
    let mut name = base.clone();
    let mut suffix = 2;
    while graph.nodes.contains_key(&name) {
        name = format!("{} {}", base, suffix);
        suffix += 1;
    }
    let mut node = NodeSpec::new(name, "n8n-nodes-base.code")
        .with_parameter("mode", "runOnceForAllItems")
        .with_parameter("jsCode", NORMALIZE_CODE);
    node.type_version = 2.0;
    if let Some(position) = after.position {
        node.position = Some(gatecore::Position {
            x: position.x + 200.0,
            y: position.y + 120.0,
        });
    }
    node
}

/// Output index of `from` whose edges lead to `symptom`; 0 when none does.
fn output_towards(graph: &WorkflowGraph, from: &str, symptom: &str) -> usize {
    graph
        .connections
        .iter()
        .filter(|c| c.source == from)
        .find(|c| c.target == symptom || graph.downstream_of(&c.target).iter().any(|id| id == symptom))
        .map(|c| c.source_output)
        .unwrap_or(0)
}

fn rate_limited(graph: &WorkflowGraph, report: &FailureReport) -> Patch {
    let Some(node) = graph.node(&report.failing_node_id) else {
        return manual_review(graph, report, "the failing node is not part of the current workflow");
    };

    // Existing settings are only ever raised; values above the caps are kept as they are.
    let retrying = node.parameter("retryOnFail") == Some(&json!(true));
    let retries = match node.parameter("maxRetries").and_then(Value::as_u64) {
        Some(current) if retrying => (current + 1).clamp(MIN_RETRIES, MAX_RETRIES).max(current),
        Some(current) => current.max(MIN_RETRIES),
        None => MIN_RETRIES,
    };
    let wait = match node.parameter("waitBetweenTries").and_then(Value::as_u64) {
        Some(current) if retrying => current
            .saturating_mul(2)
            .clamp(DEFAULT_RETRY_WAIT_MS, MAX_RETRY_WAIT_MS)
            .max(current),
        Some(current) => current.max(DEFAULT_RETRY_WAIT_MS),
        None => DEFAULT_RETRY_WAIT_MS,
    };

    let mut set = BTreeMap::new();
    set.insert("retryOnFail".to_string(), json!(true));
    set.insert("maxRetries".to_string(), json!(retries));
    set.insert("waitBetweenTries".to_string(), json!(wait));

    let unchanged = set.iter().all(|(key, value)| node.parameter(key) == Some(value));
    if unchanged {
        return manual_review(graph, report, "retry with backoff is already at its maximum");
    }

    Patch::new(
        ErrorClass::RateLimited,
        node.id.clone(),
        PatchOperation::ModifyParameters { set, unset: vec![] },
        format!(
            "'{}' was rate limited; retry up to {} times waiting {}ms between tries",
            node.id, retries, wait
        ),
        RATE_LIMIT_RISK,
        graph.version,
    )
}

fn timeout(graph: &WorkflowGraph, report: &FailureReport, ceiling_ms: u64) -> Patch {
    let Some(node) = graph.node(&report.failing_node_id) else {
        return manual_review(graph, report, "the failing node is not part of the current workflow");
    };

    let path = timeout_path(node);
    let current = node.parameter(path).and_then(Value::as_u64);
    if current.is_some_and(|ms| ms >= ceiling_ms) {
        return Patch::new(
            ErrorClass::Timeout,
            node.id.clone(),
            PatchOperation::DisableNode,
            format!(
                "'{}' keeps timing out at the {}ms ceiling; requires manual redesign",
                node.id, ceiling_ms
            ),
            TIMEOUT_RISK,
            graph.version,
        );
    }

    let raised = current
        .map(|ms| ms.saturating_mul(2))
        .unwrap_or(DEFAULT_NODE_TIMEOUT_MS.saturating_mul(2))
        .min(ceiling_ms);
    let mut set = BTreeMap::new();
    set.insert(path.to_string(), json!(raised));
    Patch::new(
        ErrorClass::Timeout,
        node.id.clone(),
        PatchOperation::ModifyParameters { set, unset: vec![] },
        format!("'{}' timed out; raising {} to {}ms", node.id, path, raised),
        TIMEOUT_RISK,
        graph.version,
    )
}

fn timeout_path(node: &NodeSpec) -> &'static str {
    if node.parameter("options.timeout").is_some() {
        "options.timeout"
    } else if node.parameter("timeout").is_some() {
        "timeout"
    } else if node.parameter("options").is_some_and(Value::is_object) {
        "options.timeout"
    } else {
        "timeout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecore::{apply_patch, diff, FailureSignals};

    fn report(class: ErrorClass, failing: &str, symptom: &str) -> FailureReport {
        FailureReport {
            execution_id: "9".into(),
            workflow_id: Some("wf".into()),
            failing_node_id: failing.into(),
            symptom_node_id: symptom.into(),
            error_class: class,
            error_message: "boom".into(),
            context_snippet: None,
            upstream_chain: vec![],
            signals: FailureSignals::default(),
        }
    }

    fn generator() -> PatchGenerator {
        PatchGenerator::new(&RemediationConfig {
            risk_threshold: 0.5,
            timeout_ceiling_ms: 300_000,
        })
    }

    fn pipeline(consumers: usize) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("Pipeline");
        graph.add_node(NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
        graph.add_node(NodeSpec::new("Code", "n8n-nodes-base.code"));
        graph.add_node(NodeSpec::new("HTTP Request", "n8n-nodes-base.httpRequest").with_parameter("options", json!({})));
        graph.connect("Webhook", "Code");
        graph.connect("Code", "HTTP Request");
        for i in 0..consumers {
            let name = format!("Consumer {}", i);
            graph.add_node(NodeSpec::new(name.clone(), "n8n-nodes-base.noOp"));
            graph.connect("Code", name);
        }
        graph
    }

    #[test]
    fn test_rate_limit_adds_retry() {
        let graph = pipeline(0);
        let patch = generator().generate(&graph, &report(ErrorClass::RateLimited, "HTTP Request", "HTTP Request"));

        assert_eq!(patch.risk_score, RATE_LIMIT_RISK);
        assert!(patch.simulated);
        match &patch.operation {
            PatchOperation::ModifyParameters { set, .. } => {
                assert_eq!(set["retryOnFail"], json!(true));
                assert_eq!(set["maxRetries"], json!(3));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_raises_existing_retry_up_to_cap() {
        let mut graph = pipeline(0);
        if let Some(node) = graph.nodes.get_mut("HTTP Request") {
            node.set_parameter("retryOnFail", json!(true));
            node.set_parameter("maxRetries", json!(4));
            node.set_parameter("waitBetweenTries", json!(4000));
        }
        let patch = generator().generate(&graph, &report(ErrorClass::RateLimited, "HTTP Request", "HTTP Request"));
        let PatchOperation::ModifyParameters { set, .. } = &patch.operation else {
            panic!("expected modify_parameters");
        };
        assert_eq!(set["maxRetries"], json!(5));
        assert_eq!(set["waitBetweenTries"], json!(5000));

        let capped = apply_patch(&graph, &patch).unwrap();
        let again = generator().generate(&capped, &report(ErrorClass::RateLimited, "HTTP Request", "HTTP Request"));
        assert!(again.is_empty());
        assert!(again.risk_score < 0.3);
    }

    #[test]
    fn test_rate_limit_never_lowers_generous_retry() {
        let mut graph = pipeline(0);
        if let Some(node) = graph.nodes.get_mut("HTTP Request") {
            node.set_parameter("retryOnFail", json!(true));
            node.set_parameter("maxRetries", json!(8));
            node.set_parameter("waitBetweenTries", json!(10_000));
        }
        let patch = generator().generate(&graph, &report(ErrorClass::RateLimited, "HTTP Request", "HTTP Request"));
        assert!(patch.is_empty());
        assert!(patch.rationale.contains(MANUAL_REVIEW));
        assert_eq!(patch.risk_score, 0.0);
        assert!(apply_patch(&graph, &patch).is_err());
    }

    #[test]
    fn test_rate_limit_enables_retry_keeping_higher_values() {
        let mut graph = pipeline(0);
        if let Some(node) = graph.nodes.get_mut("HTTP Request") {
            node.set_parameter("maxRetries", json!(8));
            node.set_parameter("waitBetweenTries", json!(10_000));
        }
        let patch = generator().generate(&graph, &report(ErrorClass::RateLimited, "HTTP Request", "HTTP Request"));
        let PatchOperation::ModifyParameters { set, .. } = &patch.operation else {
            panic!("expected modify_parameters");
        };
        assert_eq!(set["retryOnFail"], json!(true));
        assert_eq!(set["maxRetries"], json!(8));
        assert_eq!(set["waitBetweenTries"], json!(10_000));
    }

    #[test]
    fn test_type_mismatch_risk_grows_with_consumers() {
        let mut last = 0.0;
        for consumers in 0..8 {
            let graph = pipeline(consumers);
            let patch = generator().generate(&graph, &report(ErrorClass::TypeMismatch, "Code", "HTTP Request"));
            assert!(patch.risk_score >= last);
            assert!(patch.risk_score <= 0.95);
            last = patch.risk_score;
        }
        assert_eq!(type_mismatch_risk(100), 0.95);
    }

    #[test]
    fn test_type_mismatch_inserts_normalizer_after_producer() {
        let graph = pipeline(1);
        let patch = generator().generate(&graph, &report(ErrorClass::TypeMismatch, "Code", "HTTP Request"));
        assert!(matches!(&patch.operation, PatchOperation::InsertNode { node, after, .. }
            if node.id == "Normalize Code" && after == "Code"));

        let next = apply_patch(&graph, &patch).unwrap();
        assert!(patch.accounts_for(&diff(&graph, &next)));
        assert_eq!(next.successors("Code"), vec!["Normalize Code"]);
    }

    #[test]
    fn test_type_mismatch_narrows_http_output() {
        let graph = pipeline(0);
        let patch = generator().generate(&graph, &report(ErrorClass::TypeMismatch, "HTTP Request", "Sink"));
        let PatchOperation::ModifyParameters { set, .. } = &patch.operation else {
            panic!("expected narrowing");
        };
        assert_eq!(set["options.response.response.responseFormat"], json!("json"));
    }

    #[test]
    fn test_timeout_doubles_until_ceiling_then_disables() {
        let mut graph = pipeline(0);
        let patch = generator().generate(&graph, &report(ErrorClass::Timeout, "HTTP Request", "HTTP Request"));
        let PatchOperation::ModifyParameters { set, .. } = &patch.operation else {
            panic!("expected timeout raise");
        };
        assert_eq!(set["options.timeout"], json!(60_000));
        assert_eq!(patch.risk_score, TIMEOUT_RISK);

        if let Some(node) = graph.nodes.get_mut("HTTP Request") {
            node.set_parameter("options.timeout", json!(200_000));
        }
        let capped = generator().generate(&graph, &report(ErrorClass::Timeout, "HTTP Request", "HTTP Request"));
        let PatchOperation::ModifyParameters { set, .. } = &capped.operation else {
            panic!("expected timeout raise");
        };
        assert_eq!(set["options.timeout"], json!(300_000));

        if let Some(node) = graph.nodes.get_mut("HTTP Request") {
            node.set_parameter("options.timeout", json!(300_000));
        }
        let disable = generator().generate(&graph, &report(ErrorClass::Timeout, "HTTP Request", "HTTP Request"));
        assert_eq!(disable.operation, PatchOperation::DisableNode);
        assert!(disable.rationale.contains("requires manual redesign"));
    }

    #[test]
    fn test_credential_missing_requires_confirmation() {
        let graph = pipeline(0);
        let mut r = report(ErrorClass::CredentialMissing, "HTTP Request", "HTTP Request");
        r.signals.unbound_credentials = vec!["httpHeaderAuth".into()];
        let patch = generator().generate(&graph, &r);
        assert_eq!(patch.risk_score, CREDENTIAL_RISK);
        assert!(patch.requires_confirmation);
        assert!(patch.rationale.contains("httpHeaderAuth"));
    }

    #[test]
    fn test_unknown_and_auth_are_empty() {
        let graph = pipeline(0);
        let unknown = generator().generate(&graph, &report(ErrorClass::Unknown, "Code", "Code"));
        assert!(unknown.is_empty());
        assert_eq!(unknown.risk_score, 0.0);
        assert_eq!(unknown.rationale, MANUAL_REVIEW);

        let auth = generator().generate(&graph, &report(ErrorClass::AuthError, "HTTP Request", "HTTP Request"));
        assert!(auth.is_empty());
        assert_eq!(auth.risk_score, 0.0);
    }
}
