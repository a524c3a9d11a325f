//! Security scanning and the emergency kill switch.

use super::N8N;
use crate::support::*;
use futures::FutureExt;
use gatecore::{NodeSpec, WorkflowGraph};
use gateruntime::{Kernel, RouterError, SkillContext, SkillRegistryBuilder};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;

const SECRET_MARKERS: [&str; 5] = ["password", "secret", "api_key", "apikey", "token"];

static PII_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("phone", r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b"),
        ("credit_card", r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b"),
        ("ssn", r"\b\d{3}-?\d{2}-?\d{4}\b"),
        ("ip_address", r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid PII regex")))
    .collect()
});

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::SecurityExpert;
    builder.skill(k, "security_audit", N8N, "Find hardcoded secrets, plain HTTP and SQL injection risks", |ctx, p| {
        security_audit(ctx, p).boxed()
    })?;
    builder.skill(k, "scan_pii", N8N, "Detect personal data embedded in a workflow", |ctx, p| {
        scan_pii(ctx, p).boxed()
    })?;
    builder.skill(k, "kill_switch", N8N, "Deactivate every active workflow (dry run by default)", |ctx, p| {
        kill_switch(ctx, p).boxed()
    })?;
    builder.skill(k, "check_credential_usage", N8N, "Workflows that use a credential", |ctx, p| {
        check_credential_usage(ctx, p).boxed()
    })?;
    Ok(())
}

/// Literal string parameters whose dotted path names a secret.
fn hardcoded_secrets(value: &Value, path: &str, found: &mut BTreeSet<&'static str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{}.{}", path, key) };
                hardcoded_secrets(child, &child_path, found);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| hardcoded_secrets(item, path, found)),
        Value::String(s) if !s.is_empty() && !s.contains("{{") => {
            let path = path.to_ascii_lowercase();
            if let Some(marker) = SECRET_MARKERS.iter().find(|m| path.contains(*m)) {
                found.insert(marker);
            }
        }
        _ => {}
    }
}

fn node_issues(node: &NodeSpec) -> Vec<Value> {
    let mut issues = Vec::new();
    let kind = node.node_type.to_ascii_lowercase();

    let mut secrets = BTreeSet::new();
    for (key, value) in &node.parameters {
        hardcoded_secrets(value, key, &mut secrets);
    }
    for marker in secrets {
        issues.push(json!({
            "severity": "high",
            "node": node.id,
            "issue": format!("Potential hardcoded secret ({})", marker),
            "recommendation": "Use credentials instead of hardcoded values",
        }));
    }

    if kind.contains("http") {
        let url = node.parameter("url").and_then(Value::as_str).unwrap_or("");
        if url.starts_with("http://") && !url.contains("localhost") && !url.contains("127.0.0.1") {
            issues.push(json!({
                "severity": "medium",
                "node": node.id,
                "issue": "Insecure HTTP connection",
                "recommendation": "Use HTTPS for external connections",
            }));
        }
    }

    if ["postgres", "mysql", "mssql"].iter().any(|db| kind.contains(db)) {
        let query = node.parameter("query").and_then(Value::as_str).unwrap_or("");
        if query.contains("{{") && query.contains('+') {
            issues.push(json!({
                "severity": "high",
                "node": node.id,
                "issue": "Potential SQL injection vector",
                "recommendation": "Use parameterized queries",
            }));
        }
    }
    issues
}

pub(crate) fn audit(graph: &WorkflowGraph) -> (Vec<Value>, &'static str, [usize; 3]) {
    let issues: Vec<Value> = graph.nodes.values().flat_map(node_issues).collect();
    let count = |severity: &str| issues.iter().filter(|i| i["severity"] == severity).count();
    let counts = [count("high"), count("medium"), count("low")];
    let risk = match counts {
        [high, _, _] if high > 2 => "critical",
        [high, _, _] if high > 0 => "high",
        [_, medium, _] if medium > 2 => "medium",
        _ => "low",
    };
    (issues, risk, counts)
}

async fn security_audit(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let (issues, risk, [high, medium, low]) = audit(&graph);
    tracing::info!(%workflow_id, risk, issues = issues.len(), "security audit");
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "overall_risk": risk,
        "issue_counts": { "high": high, "medium": medium, "low": low },
        "issues": issues,
    }))
}

fn mask(sample: &str) -> String {
    let visible: String = sample.chars().take(4).collect();
    format!("{}****", visible)
}

pub(crate) fn pii_findings(text: &str) -> Vec<Value> {
    PII_PATTERNS
        .iter()
        .filter_map(|(kind, pattern)| {
            let matches: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
            let first = matches.first()?;
            Some(json!({ "type": kind, "count": matches.len(), "sample": mask(first) }))
        })
        .collect()
}

async fn scan_pii(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let findings = pii_findings(&graph.to_engine_json().to_string());
    Ok(json!({
        "workflow_id": workflow_id,
        "pii_detected": !findings.is_empty(),
        "recommendation": if findings.is_empty() { "No PII detected" } else { "Review and mask sensitive data" },
        "findings": findings,
    }))
}

async fn kill_switch(ctx: &SkillContext, params: Params) -> SkillResult {
    let dry_run = bool_or(&params, "dry_run", true)?;
    let active: Vec<WorkflowGraph> = ctx
        .engine
        .list_workflows(None)
        .await?
        .into_iter()
        .filter(|w| w.active)
        .collect();

    let mut deactivated = Vec::new();
    let mut failed = Vec::new();
    if !dry_run {
        tracing::warn!(count = active.len(), "kill switch engaged");
        for graph in &active {
            let Some(id) = graph.id.as_deref() else { continue };
            match ctx.engine.set_workflow_active(id, false).await {
                Ok(_) => deactivated.push(id.to_string()),
                Err(e) => {
                    tracing::warn!(workflow_id = id, error = %e, "failed to deactivate");
                    failed.push(json!({ "workflow_id": id, "error": e.to_string() }));
                }
            }
        }
    }

    Ok(json!({
        "mode": if dry_run { "dry_run" } else { "executed" },
        "active_workflows_found": active.len(),
        "workflows": active
            .iter()
            .map(|w| json!({ "id": w.id, "name": w.name }))
            .collect::<Vec<_>>(),
        "deactivated": deactivated,
        "failed": failed,
        "warning": "This stops all automation",
    }))
}

async fn check_credential_usage(ctx: &SkillContext, params: Params) -> SkillResult {
    let credential = required_str(&params, "credential_name")?;
    let needle = credential.to_lowercase();
    let workflows = ctx.engine.list_workflows(None).await?;

    let using: Vec<Value> = workflows
        .iter()
        .filter_map(|graph| {
            let nodes: Vec<&str> = graph
                .nodes
                .values()
                .filter(|node| {
                    node.credentials.values().any(|reference| {
                        reference.name.as_deref().map(str::to_lowercase).as_deref() == Some(needle.as_str())
                            || reference.id.as_deref() == Some(credential.as_str())
                    })
                })
                .map(|node| node.id.as_str())
                .collect();
            if nodes.is_empty() {
                return None;
            }
            Some(json!({ "id": graph.id, "name": graph.name, "active": graph.active, "nodes": nodes }))
        })
        .collect();

    Ok(json!({
        "credential_name": credential,
        "usage_count": using.len(),
        "workflows": using,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecore::CredentialRef;

    #[test]
    fn test_audit_flags_secrets_http_and_sql() {
        let mut graph = WorkflowGraph::new("Leaky");
        graph.add_node(
            NodeSpec::new("Call", "n8n-nodes-base.httpRequest")
                .with_parameter("url", "http://api.example.com/data")
                .with_parameter("headers.apiKey", "sk-live-123"),
        );
        graph.add_node(
            NodeSpec::new("Query", "n8n-nodes-base.postgres")
                .with_parameter("query", "SELECT * FROM users WHERE id = '{{ $json.id }}' + ''"),
        );
        graph.add_node(
            NodeSpec::new("Local", "n8n-nodes-base.httpRequest")
                .with_parameter("url", "http://localhost:8080")
                .with_parameter("token", "={{ $env.TOKEN }}"),
        );

        let (issues, risk, counts) = audit(&graph);
        assert_eq!(counts, [2, 1, 0]);
        assert_eq!(risk, "high");
        let nodes: Vec<&str> = issues.iter().filter_map(|i| i["node"].as_str()).collect();
        assert!(!nodes.contains(&"Local"));
    }

    #[test]
    fn test_pii_findings_mask_samples() {
        let findings = pii_findings(r#"{"to":"jane.doe@example.com","ip":"10.0.0.12"}"#);
        let email = findings.iter().find(|f| f["type"] == "email").unwrap();
        assert_eq!(email["sample"], "jane****");
        assert_eq!(email["count"], 1);
        assert!(findings.iter().any(|f| f["type"] == "ip_address"));
        assert!(pii_findings("nothing to see").is_empty());
    }

    #[test]
    fn test_credential_reference_shape() {
        let node = NodeSpec::new("Mail", "n8n-nodes-base.gmail").with_credential("gmailOAuth2", CredentialRef::bound("7", "Team Gmail"));
        assert!(node.credentials["gmailOAuth2"].is_bound());
    }
}
