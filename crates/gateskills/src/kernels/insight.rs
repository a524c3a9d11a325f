//! Static analysis of workflow structure and run statistics.

use super::N8N;
use crate::support::*;
use futures::FutureExt;
use gatecore::{ExecutionQuery, ExecutionRecord, ExecutionStatus, NodeSpec, WorkflowGraph};
use gateruntime::{Kernel, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("valid regex"));
static FIELD_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:json|input\.item\.json)\.(\w+)").expect("valid regex"));
static RETURN_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"return\s*\{([^}]+)\}").expect("valid regex"));
static OBJECT_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)\s*:").expect("valid regex"));
static URL_HOST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://([^/:?#\s]+)").expect("valid regex"));
static LOOP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(for|while)\s*\(").expect("valid regex"));

const MAX_FAN_OUT: usize = 5;
const MAX_CHAIN_DEPTH: usize = 10;

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::InsightExpert;
    builder.skill(k, "explain_impact", N8N, "Explain what a workflow or node touches and affects", |ctx, p| {
        explain_impact(ctx, p).boxed()
    })?;
    builder.skill(k, "generate_diagram", N8N, "Mermaid flowchart of a workflow", |ctx, p| {
        generate_diagram(ctx, p).boxed()
    })?;
    builder.skill(k, "semantic_search", N8N, "Rank workflows against a free-text query", |ctx, p| {
        semantic_search(ctx, p).boxed()
    })?;
    builder.skill(k, "map_data_flow", N8N, "Fields each node reads and produces", |ctx, p| {
        map_data_flow(ctx, p).boxed()
    })?;
    builder.skill(k, "identify_bottlenecks", N8N, "Flag slow or fragile patterns in a workflow", |ctx, p| {
        identify_bottlenecks(ctx, p).boxed()
    })?;
    builder.skill(k, "ab_test_workflow", N8N, "Create an inactive variant of a workflow for A/B testing", |ctx, p| {
        ab_test_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "compare_performance", N8N, "Compare success rate and duration of two workflows", |ctx, p| {
        compare_performance(ctx, p).boxed()
    })?;
    builder.skill(k, "suggest_optimizations", N8N, "Suggest structural improvements", |ctx, p| {
        suggest_optimizations(ctx, p).boxed()
    })?;
    builder.skill(k, "analyze_complexity", N8N, "Complexity score of a workflow", |ctx, p| {
        analyze_complexity(ctx, p).boxed()
    })?;
    Ok(())
}

fn kind(node: &NodeSpec) -> String {
    node.node_type.to_ascii_lowercase()
}

/// Last segment of the node type (`n8n-nodes-base.httpRequest` -> `httprequest`).
fn short_kind(node: &NodeSpec) -> String {
    let kind = kind(node);
    kind.rsplit('.').next().unwrap_or(&kind).to_string()
}

pub(crate) fn is_branch(node: &NodeSpec) -> bool {
    matches!(short_kind(node).as_str(), "if" | "switch" | "filter")
}

fn is_code(node: &NodeSpec) -> bool {
    let kind = kind(node);
    kind.contains("code") || kind.contains("function")
}

fn is_http(node: &NodeSpec) -> bool {
    kind(node).contains("http")
}

fn is_database(node: &NodeSpec) -> bool {
    let kind = kind(node);
    ["postgres", "mysql", "mongo", "mssql", "redis"].iter().any(|db| kind.contains(db))
}

fn code_of(node: &NodeSpec) -> String {
    node.parameter("jsCode")
        .or_else(|| node.parameter("functionCode"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Item fields referenced from expressions in the node's parameters.
pub(crate) fn referenced_fields(node: &NodeSpec) -> BTreeSet<String> {
    let text = serde_json::to_string(&node.parameters).unwrap_or_default();
    EXPRESSION
        .captures_iter(&text)
        .flat_map(|expr| {
            FIELD_REFERENCE
                .captures_iter(&expr[1])
                .map(|field| field[1].to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn produced_fields(node: &NodeSpec) -> BTreeSet<String> {
    if short_kind(node) == "set" {
        return match node.parameter("values") {
            Some(Value::Object(values)) => values.keys().cloned().collect(),
            _ => BTreeSet::new(),
        };
    }
    if is_code(node) {
        let code = code_of(node);
        return RETURN_OBJECT
            .captures_iter(&code)
            .flat_map(|body| {
                OBJECT_KEY
                    .captures_iter(&body[1])
                    .map(|key| key[1].to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
    }
    BTreeSet::new()
}

fn url_host(node: &NodeSpec) -> Option<String> {
    let url = node.parameter("url")?.as_str()?;
    URL_HOST.captures(url).map(|c| c[1].to_string())
}

async fn explain_impact(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;

    let mut categories: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut services = BTreeSet::new();
    let mut fields = BTreeSet::new();
    for node in graph.nodes.values() {
        let category = if is_trigger(node) {
            "triggers"
        } else if is_http(node) {
            if let Some(host) = url_host(node) {
                services.insert(host);
            }
            "integrations"
        } else if is_code(node) || short_kind(node) == "set" {
            "transformations"
        } else if is_database(node) {
            "data_sources"
        } else {
            "actions"
        };
        categories.entry(category).or_default().push(node.id.as_str());
        fields.extend(referenced_fields(node));
    }

    let mut summary = Vec::new();
    if let Some(triggers) = categories.get("triggers") {
        summary.push(format!("Workflow starts from: {}", triggers.join(", ")));
    }
    if !services.is_empty() {
        summary.push(format!(
            "External services called: {}",
            services.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if let Some(databases) = categories.get("data_sources") {
        summary.push(format!("Database operations: {}", databases.join(", ")));
    }

    let node_detail = match optional_str(&params, "node_name") {
        Some(name) => {
            let node = graph
                .node(&name)
                .ok_or_else(|| SkillError::invalid(format!("node '{}' is not part of the workflow", name)))?;
            let affected = graph.downstream_of(&name);
            Some(json!({
                "node_name": name,
                "node_type": node.node_type,
                "receives_from": graph.predecessors(&name),
                "sends_to": graph.successors(&name),
                "data_fields_used": referenced_fields(node),
                "affected_nodes": affected,
                "impact": if affected.is_empty() {
                    "Changes to this node only affect the end of the workflow".to_string()
                } else {
                    format!("Changes to this node affect: {}", affected.join(", "))
                },
            }))
        }
        None => None,
    };

    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "node_count": graph.nodes.len(),
        "node_categories": categories,
        "external_services": services,
        "data_fields_referenced": fields.iter().take(20).collect::<Vec<_>>(),
        "connection_count": graph.connections.len(),
        "impact_summary": summary,
        "node_analysis": node_detail,
    }))
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() || c == '_' => Some(c),
            ' ' => Some('_'),
            _ => None,
        })
        .collect()
}

pub(crate) fn mermaid(graph: &WorkflowGraph) -> String {
    let mut lines = vec!["graph TD".to_string()];
    for node in graph.nodes.values() {
        let label = truncate(&node.id, 30).replace('"', "'");
        let shape = if is_trigger(node) {
            format!("([\"{}\"])", label)
        } else if is_branch(node) {
            format!("{{\"{}\"}}", label)
        } else if is_code(node) || short_kind(node) == "set" {
            format!("[/\"{}\"/]", label)
        } else {
            format!("[\"{}\"]", label)
        };
        lines.push(format!("    {}{}", mermaid_id(&node.id), shape));
    }
    for conn in &graph.connections {
        let label = if conn.kind != "main" {
            format!("|{}|", conn.kind)
        } else if conn.source_output > 0 {
            format!("|output {}|", conn.source_output)
        } else {
            String::new()
        };
        lines.push(format!("    {} -->{} {}", mermaid_id(&conn.source), label, mermaid_id(&conn.target)));
    }
    lines.join("\n")
}

async fn generate_diagram(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let format = optional_str(&params, "format").unwrap_or_else(|| "mermaid".to_string());
    if format != "mermaid" {
        return Err(SkillError::invalid(format!("unsupported diagram format '{}'", format)));
    }
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "format": format,
        "node_count": graph.nodes.len(),
        "connection_count": graph.connections.len(),
        "diagram": mermaid(&graph),
    }))
}

/// Lower-cased text a workflow can be found by.
fn searchable_text(graph: &WorkflowGraph) -> String {
    let mut parts = vec![graph.name.to_lowercase()];
    parts.extend(graph.tags.iter().map(|t| t.to_lowercase()));
    for node in graph.nodes.values() {
        parts.push(node.id.to_lowercase());
        parts.push(kind(node));
        parts.extend(
            node.parameters
                .values()
                .filter_map(Value::as_str)
                .map(str::to_lowercase),
        );
    }
    parts.join(" ")
}

/// One point per matched term, two more when the term is in the name.
pub(crate) fn relevance(graph: &WorkflowGraph, terms: &[String]) -> (usize, Vec<String>) {
    let text = searchable_text(graph);
    let name = graph.name.to_lowercase();
    let mut score = 0;
    let mut matched = Vec::new();
    for term in terms {
        if text.contains(term.as_str()) {
            score += 1;
            if name.contains(term.as_str()) {
                score += 2;
            }
            matched.push(term.clone());
        }
    }
    (score, matched)
}

async fn semantic_search(ctx: &SkillContext, params: Params) -> SkillResult {
    let query = required_str(&params, "query")?;
    let limit = u64_or(&params, "limit", 10)? as usize;
    let terms: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();

    let workflows = ctx.engine.list_workflows(None).await?;
    let mut results: Vec<(usize, Value)> = workflows
        .iter()
        .filter_map(|graph| {
            let (score, matched) = relevance(graph, &terms);
            if score == 0 {
                return None;
            }
            let node_types: BTreeSet<&str> = graph.nodes.values().map(|n| n.node_type.as_str()).collect();
            Some((
                score,
                json!({
                    "workflow_id": graph.id,
                    "workflow_name": graph.name,
                    "active": graph.active,
                    "relevance_score": score,
                    "matched_terms": matched,
                    "node_count": graph.nodes.len(),
                    "node_types": node_types.into_iter().take(5).collect::<Vec<_>>(),
                }),
            ))
        })
        .collect();
    // Stable: equal scores keep listing order
    results.sort_by(|a, b| b.0.cmp(&a.0));
    let total = results.len();
    Ok(json!({
        "query": query,
        "results_count": total,
        "results": results.into_iter().take(limit).map(|(_, r)| r).collect::<Vec<_>>(),
    }))
}

async fn map_data_flow(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let map: BTreeMap<&str, Value> = graph
        .nodes
        .values()
        .map(|node| {
            (
                node.id.as_str(),
                json!({
                    "node_type": node.node_type,
                    "input_fields_used": referenced_fields(node),
                    "output_fields_produced": produced_fields(node),
                    "receives_from": graph.predecessors(&node.id),
                    "sends_to": graph.successors(&node.id),
                }),
            )
        })
        .collect();
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "node_count": graph.nodes.len(),
        "data_map": map,
    }))
}

/// Longest simple path starting at `id`, counted in edges.
fn chain_depth(graph: &WorkflowGraph, id: &str, visiting: &mut HashSet<String>) -> usize {
    if !visiting.insert(id.to_string()) {
        return 0;
    }
    let depth = graph
        .successors(id)
        .into_iter()
        .map(|next| chain_depth(graph, next, visiting) + 1)
        .max()
        .unwrap_or(0);
    visiting.remove(id);
    depth
}

pub(crate) fn bottlenecks(graph: &WorkflowGraph) -> (Vec<Value>, Vec<String>) {
    let mut found = Vec::new();
    let mut recommendations = Vec::new();

    for node in graph.nodes.values() {
        if is_http(node) && node.parameter("timeout").is_none() && node.parameter("options.timeout").is_none() {
            found.push(json!({ "node": node.id, "issue": "HTTP request without explicit timeout", "severity": "medium" }));
            recommendations.push(format!("Add a timeout to HTTP node '{}'", node.id));
        }
        if is_code(node) && LOOP.is_match(&code_of(node)) {
            found.push(json!({ "node": node.id, "issue": "Loop detected in code node", "severity": "low" }));
        }
        if is_database(node) {
            let query = node.parameter("query").and_then(Value::as_str).unwrap_or("").to_lowercase();
            if query.contains("select") && !query.contains("limit") {
                found.push(json!({ "node": node.id, "issue": "SELECT query without LIMIT clause", "severity": "high" }));
                recommendations.push(format!("Add LIMIT to the query in '{}'", node.id));
            }
        }
        let fan_out = graph.connections.iter().filter(|c| c.source == node.id).count();
        if fan_out > MAX_FAN_OUT {
            found.push(json!({ "node": node.id, "issue": format!("High fan-out: sends to {} nodes", fan_out), "severity": "medium" }));
        }
    }

    for node in graph.nodes.values().filter(|n| is_trigger(n)) {
        let depth = chain_depth(graph, &node.id, &mut HashSet::new());
        if depth > MAX_CHAIN_DEPTH {
            found.push(json!({ "node": node.id, "issue": format!("Long execution chain: {} nodes deep", depth), "severity": "medium" }));
            recommendations.push("Consider breaking the workflow into sub-workflows".to_string());
        }
    }
    (found, recommendations)
}

async fn identify_bottlenecks(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let (found, recommendations) = bottlenecks(&graph);
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "node_count": graph.nodes.len(),
        "bottlenecks_found": found.len(),
        "bottlenecks": found,
        "recommendations": recommendations,
    }))
}

async fn ab_test_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let variant_name = optional_str(&params, "variant_name").unwrap_or_else(|| "Variant_B".to_string());
    let original = ctx.engine.get_workflow(&workflow_id).await?;

    let mut variant = original.clone();
    variant.id = None;
    variant.name = format!("{} [{}]", original.name, variant_name);
    variant.active = false;
    variant.version = 0;
    variant.revision = None;
    let created = ctx.engine.create_workflow(&variant).await?;
    tracing::info!(%workflow_id, variant_id = created.id.as_deref().unwrap_or("-"), "created A/B variant");

    Ok(json!({
        "original_id": workflow_id,
        "variant_id": created.id,
        "variant_name": created.name,
        "instructions": "Modify the variant, activate both, then compare_performance",
    }))
}

/// Success rate and mean duration over listed executions
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub avg_duration_ms: Option<f64>,
}

impl RunStats {
    pub fn from_executions(executions: &[Value]) -> Self {
        let mut stats = RunStats {
            total: executions.len(),
            successes: 0,
            failures: 0,
            avg_duration_ms: None,
        };
        let mut durations = Vec::new();
        for raw in executions {
            let Ok(record) = ExecutionRecord::from_engine(raw) else { continue };
            match record.status {
                ExecutionStatus::Success => stats.successes += 1,
                s if s.is_failure() => stats.failures += 1,
                _ => {}
            }
            if let Some(ms) = record.duration_ms() {
                durations.push(ms as f64);
            }
        }
        if !durations.is_empty() {
            stats.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 / self.total as f64 * 100.0
        }
    }

    fn to_json(&self, id: &str) -> Value {
        json!({
            "id": id,
            "total": self.total,
            "success": self.successes,
            "errors": self.failures,
            "success_rate": (self.success_rate() * 10.0).round() / 10.0,
            "avg_duration_ms": self.avg_duration_ms.map(f64::round),
        })
    }
}

async fn compare_performance(ctx: &SkillContext, params: Params) -> SkillResult {
    let a = required_str(&params, "workflow_a_id")?;
    let b = required_str(&params, "workflow_b_id")?;
    let runs_a = ctx.engine.list_executions(&ExecutionQuery::recent(50).for_workflow(a.clone())).await?;
    let runs_b = ctx.engine.list_executions(&ExecutionQuery::recent(50).for_workflow(b.clone())).await?;
    let stats_a = RunStats::from_executions(&runs_a);
    let stats_b = RunStats::from_executions(&runs_b);

    let winner = if stats_a.success_rate() > stats_b.success_rate() {
        Some(a.clone())
    } else if stats_b.success_rate() > stats_a.success_rate() {
        Some(b.clone())
    } else {
        None
    };
    Ok(json!({
        "workflow_a": stats_a.to_json(&a),
        "workflow_b": stats_b.to_json(&b),
        "recommendation": match &winner {
            Some(id) => format!("Workflow {} performs better", id),
            None => "No clear winner".to_string(),
        },
        "winner": winner,
    }))
}

pub(crate) fn optimizations(graph: &WorkflowGraph) -> Vec<Value> {
    let mut suggestions = Vec::new();

    let http_nodes = graph.nodes.values().filter(|n| is_http(n)).count();
    if http_nodes > 3 {
        suggestions.push(json!({
            "type": "performance",
            "issue": format!("Multiple HTTP nodes ({})", http_nodes),
            "suggestion": "Consider batching requests or using a sub-workflow",
        }));
    }
    for node in graph.nodes.values().filter(|n| is_code(n)) {
        let code = code_of(node);
        if code.len() > 500 && !code.contains("await") {
            suggestions.push(json!({
                "type": "code_quality",
                "node": node.id,
                "suggestion": "Large synchronous code block; consider splitting it or using async calls",
            }));
        }
    }
    if graph.nodes.len() > 20 {
        suggestions.push(json!({
            "type": "complexity",
            "issue": format!("High node count ({})", graph.nodes.len()),
            "suggestion": "Consider splitting into sub-workflows",
        }));
    }
    let orphans: Vec<&str> = graph
        .nodes
        .values()
        .filter(|n| !is_trigger(n) && !graph.connections.iter().any(|c| c.touches(&n.id)))
        .map(|n| n.id.as_str())
        .collect();
    if !orphans.is_empty() {
        suggestions.push(json!({
            "type": "cleanup",
            "issue": "Disconnected nodes found",
            "nodes": orphans,
            "suggestion": "Remove or connect these nodes",
        }));
    }
    suggestions
}

async fn suggest_optimizations(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let suggestions = optimizations(&graph);
    Ok(json!({
        "workflow_id": workflow_id,
        "node_count": graph.nodes.len(),
        "suggestions_count": suggestions.len(),
        "suggestions": suggestions,
    }))
}

/// `nodes + 2 * branches + 0.5 * connections`
pub(crate) fn complexity(graph: &WorkflowGraph) -> (f64, &'static str) {
    let branches = graph.nodes.values().filter(|n| is_branch(n)).count();
    let score = graph.nodes.len() as f64 + 2.0 * branches as f64 + 0.5 * graph.connections.len() as f64;
    let level = if score < 20.0 {
        "low"
    } else if score < 50.0 {
        "medium"
    } else {
        "high"
    };
    (score, level)
}

async fn analyze_complexity(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let (score, level) = complexity(&graph);
    let unique_types: BTreeSet<&str> = graph.nodes.values().map(|n| n.node_type.as_str()).collect();
    Ok(json!({
        "workflow_id": workflow_id,
        "metrics": {
            "node_count": graph.nodes.len(),
            "connection_count": graph.connections.len(),
            "branch_count": graph.nodes.values().filter(|n| is_branch(n)).count(),
            "unique_node_types": unique_types.len(),
        },
        "complexity_score": (score * 10.0).round() / 10.0,
        "complexity_level": level,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("Invoice Sync");
        graph.add_node(NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
        graph.add_node(
            NodeSpec::new("Fetch", "n8n-nodes-base.httpRequest")
                .with_parameter("url", "https://billing.example.com/v1/invoices?id={{ $json.invoiceId }}"),
        );
        graph.add_node(NodeSpec::new("Paid?", "n8n-nodes-base.if"));
        graph.add_node(
            NodeSpec::new("Shape", "n8n-nodes-base.code")
                .with_parameter("jsCode", "for (const i of items) {}\nreturn { total: 1, currency: 'EUR' };"),
        );
        graph.connect("Webhook", "Fetch");
        graph.connect("Fetch", "Paid?");
        graph.connect("Paid?", "Shape");
        graph
    }

    #[test]
    fn test_complexity_score_counts_branches_double() {
        // 4 nodes + 2 * 1 branch + 0.5 * 3 connections
        let (score, level) = complexity(&pipeline());
        assert_eq!(score, 7.5);
        assert_eq!(level, "low");
    }

    #[test]
    fn test_field_extraction() {
        let graph = pipeline();
        let fetch = graph.node("Fetch").unwrap();
        assert_eq!(referenced_fields(fetch).into_iter().collect::<Vec<_>>(), vec!["invoiceId"]);
        assert_eq!(url_host(fetch).as_deref(), Some("billing.example.com"));
        let shape = graph.node("Shape").unwrap();
        assert_eq!(produced_fields(shape).into_iter().collect::<Vec<_>>(), vec!["currency", "total"]);
    }

    #[test]
    fn test_bottlenecks_flag_missing_timeout_and_loops() {
        let (found, recommendations) = bottlenecks(&pipeline());
        let issues: Vec<&str> = found.iter().filter_map(|f| f["issue"].as_str()).collect();
        assert!(issues.contains(&"HTTP request without explicit timeout"));
        assert!(issues.contains(&"Loop detected in code node"));
        assert_eq!(recommendations.len(), 1);
    }

    #[test]
    fn test_relevance_rewards_name_matches() {
        let graph = pipeline();
        let (score, matched) = relevance(&graph, &["invoice".to_string(), "billing".to_string(), "slack".to_string()]);
        // invoice: 1 + 2 for the name, billing: 1 from the url
        assert_eq!(score, 4);
        assert_eq!(matched, vec!["invoice", "billing"]);
    }

    #[test]
    fn test_mermaid_shapes() {
        let diagram = mermaid(&pipeline());
        assert!(diagram.starts_with("graph TD"));
        assert!(diagram.contains("Webhook([\"Webhook\"])"));
        assert!(diagram.contains("Paid{\"Paid?\"}"));
        assert!(diagram.contains("Fetch --> Paid"));
    }

    #[test]
    fn test_run_stats() {
        let runs = vec![
            json!({"id": "1", "status": "success", "startedAt": "2024-01-01T00:00:00Z", "stoppedAt": "2024-01-01T00:00:02Z"}),
            json!({"id": "2", "status": "error", "startedAt": "2024-01-01T00:00:00Z", "stoppedAt": "2024-01-01T00:00:04Z"}),
        ];
        let stats = RunStats::from_executions(&runs);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.success_rate(), 50.0);
        assert_eq!(stats.avg_duration_ms, Some(3000.0));
    }
}
