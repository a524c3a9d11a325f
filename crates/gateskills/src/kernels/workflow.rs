//! Workflow CRUD and structural tooling.

use super::N8N;
use crate::support::*;
use futures::FutureExt;
use gatecore::{diff, WorkflowGraph};
use gateruntime::{deploy, Kernel, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use serde_json::{json, Map, Value};

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::WorkflowExpert;
    builder.skill(k, "list_workflows", N8N, "List workflows, optionally filtered by tags", |ctx, p| {
        list_workflows(ctx, p).boxed()
    })?;
    builder.skill(k, "toggle_workflow", N8N, "Activate or deactivate a workflow", |ctx, p| {
        toggle_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "delete_workflow", N8N, "Permanently delete a workflow", |ctx, p| {
        delete_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "get_workflow_tags", N8N, "List all workflow tags", |ctx, p| {
        get_workflow_tags(ctx, p).boxed()
    })?;
    builder.skill(k, "read_workflow", N8N, "Full structure (nodes and connections) of a workflow", |ctx, p| {
        read_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "deploy_workflow", N8N, "Create or update a workflow by name (smart upsert)", |ctx, p| {
        deploy_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "clone_workflow", N8N, "Copy a workflow under a new name", |ctx, p| {
        clone_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "validate_workflow", N8N, "Structural validation of a workflow definition", |ctx, p| {
        validate_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "diff_workflows", N8N, "Structural diff between two workflows", |ctx, p| {
        diff_workflows(ctx, p).boxed()
    })?;
    Ok(())
}

async fn list_workflows(ctx: &SkillContext, params: Params) -> SkillResult {
    let tags = string_list(&params, "tags");
    let filter = if tags.is_empty() { None } else { Some(tags.as_slice()) };
    let workflows = ctx.engine.list_workflows(filter).await?;
    tracing::info!(count = workflows.len(), "listed workflows");
    Ok(json!({
        "count": workflows.len(),
        "workflows": workflows.iter().map(workflow_summary).collect::<Vec<_>>(),
    }))
}

async fn toggle_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let id = required_str(&params, "workflow_id")?;
    let active = bool_or(&params, "active", true)?;
    let graph = ctx.engine.set_workflow_active(&id, active).await?;
    Ok(json!({
        "workflow_id": id,
        "action": if active { "activate" } else { "deactivate" },
        "is_active": graph.active,
    }))
}

async fn delete_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let id = required_str(&params, "workflow_id")?;
    ctx.engine.delete_workflow(&id).await?;
    tracing::info!(workflow_id = %id, "deleted workflow");
    Ok(json!({ "workflow_id": id, "message": format!("Workflow {} deleted", id) }))
}

async fn get_workflow_tags(ctx: &SkillContext, _params: Params) -> SkillResult {
    let tags = ctx.engine.list_tags().await?;
    Ok(json!({ "count": tags.len(), "tags": tags }))
}

async fn read_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&id).await?;
    let mut body = graph.to_engine_json();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".into(), json!(graph.id));
        obj.insert("active".into(), json!(graph.active));
        obj.insert("tags".into(), json!(graph.tags));
        obj.insert("version".into(), json!(graph.version));
    }
    Ok(body)
}

/// Build a graph from the `name`, `nodes` and `connections` parameters.
fn graph_from_parts(params: &Params) -> Result<WorkflowGraph, SkillError> {
    let name = required_str(params, "name")?;
    let nodes = required_json(params, "nodes")?;
    match nodes.as_array() {
        Some(list) if !list.is_empty() => {}
        _ => return Err(SkillError::invalid("'nodes' must be a non-empty list of node definitions")),
    }
    let connections = json_param(params, "connections")?.unwrap_or_else(|| json!({}));
    let mut raw = Map::new();
    raw.insert("name".into(), Value::String(name));
    raw.insert("nodes".into(), nodes);
    raw.insert("connections".into(), connections);
    if let Some(settings) = json_param(params, "settings")? {
        raw.insert("settings".into(), settings);
    }
    Ok(WorkflowGraph::load(&Value::Object(raw))?)
}

async fn publish(ctx: &SkillContext, graph: &WorkflowGraph, activate: bool) -> SkillResult {
    let deployment = deploy(ctx.engine.as_ref(), graph).await?;
    let mut workflow = deployment.workflow;
    let id = workflow
        .id
        .clone()
        .ok_or_else(|| SkillError::Failed("engine returned a workflow without an id".into()))?;
    if activate {
        workflow = ctx.engine.set_workflow_active(&id, true).await?;
    }
    let editor_url = ctx.config.engine.editor_link(&id);
    tracing::info!(workflow_id = %id, action = ?deployment.action, %editor_url, "workflow deployed");
    Ok(json!({
        "action": deployment.action,
        "id": id,
        "name": workflow.name,
        "active": workflow.active,
        "version": workflow.version,
        "editor_url": editor_url,
        "node_count": workflow.nodes.len(),
    }))
}

async fn deploy_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let graph = graph_from_parts(&params)?;
    let activate = bool_or(&params, "activate", false)?;
    publish(ctx, &graph, activate).await
}

async fn clone_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let source_id = required_str(&params, "source_id")?;
    let new_name = required_str(&params, "new_name")?;
    let activate = bool_or(&params, "activate", false)?;

    let mut graph = ctx.engine.get_workflow(&source_id).await?;
    if graph.name == new_name {
        return Err(SkillError::invalid("'new_name' must differ from the source workflow name"));
    }
    graph.id = None;
    graph.name = new_name;
    graph.active = false;
    graph.version = 0;
    graph.revision = None;
    publish(ctx, &graph, activate).await
}

/// Findings of a structural check, split by severity.
pub(crate) fn structural_findings(graph: &WorkflowGraph) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if graph.nodes.is_empty() {
        errors.push("workflow has no nodes".to_string());
    }
    if !graph.nodes.is_empty() && !graph.nodes.values().any(is_trigger) {
        warnings.push("workflow has no trigger node and can only run manually".to_string());
    }
    for node in graph.nodes.values() {
        let connected = graph.connections.iter().any(|c| c.touches(&node.id));
        if !connected && graph.nodes.len() > 1 {
            warnings.push(format!("node '{}' is not connected", node.id));
        }
        for credential in node.unbound_credentials() {
            errors.push(format!("node '{}' has no '{}' credential bound", node.id, credential));
        }
        if node.disabled {
            warnings.push(format!("node '{}' is disabled", node.id));
        }
    }
    (errors, warnings)
}

async fn validate_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let key = if params.contains_key("workflow") { "workflow" } else { "workflow_id" };
    let graph = match graph_param(ctx, &params, key).await {
        Ok(graph) => graph,
        Err(SkillError::Workflow(e)) => {
            return Ok(json!({ "valid": false, "errors": [e.to_string()], "warnings": [] }));
        }
        Err(e) => return Err(e),
    };
    let (errors, warnings) = structural_findings(&graph);
    Ok(json!({
        "name": graph.name,
        "valid": errors.is_empty(),
        "node_count": graph.nodes.len(),
        "connection_count": graph.connections.len(),
        "errors": errors,
        "warnings": warnings,
    }))
}

async fn diff_workflows(ctx: &SkillContext, params: Params) -> SkillResult {
    let before = graph_param(ctx, &params, "before").await?;
    let after = graph_param(ctx, &params, "after").await?;
    let changes = diff(&before, &after);
    Ok(json!({
        "before": before.name,
        "after": after.name,
        "identical": changes.is_empty(),
        "summary": changes.iter().map(|c| c.describe()).collect::<Vec<_>>(),
        "changes": changes,
    }))
}
