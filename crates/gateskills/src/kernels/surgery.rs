//! Live intervention on running and finished executions.

use super::N8N;
use crate::support::*;
use futures::FutureExt;
use gatecore::{ErrorClass, ExecutionQuery, ExecutionRecord, ExecutionStatus, Patch, PatchOperation};
use gateruntime::{Approval, Kernel, RemediationState, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use serde_json::{json, Value};

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::SurgeryExpert;
    builder.skill(k, "get_waiting_executions", N8N, "Executions paused and waiting for input", |ctx, p| {
        get_waiting_executions(ctx, p).boxed()
    })?;
    builder.skill(k, "trigger_now", N8N, "Run a workflow immediately with an optional payload", |ctx, p| {
        trigger_now(ctx, p).boxed()
    })?;
    builder.skill(k, "inject_execution_data", N8N, "Resume a waiting execution with data for a node", |ctx, p| {
        inject_execution_data(ctx, p).boxed()
    })?;
    builder.skill(k, "rerun_with_patch", N8N, "Optionally patch a node, then re-run with corrected input", |ctx, p| {
        rerun_with_patch(ctx, p).boxed()
    })?;
    builder.skill(k, "get_execution_data", N8N, "Per-node input and output summaries of an execution", |ctx, p| {
        get_execution_data(ctx, p).boxed()
    })?;
    builder.skill(k, "retry_failed_execution", N8N, "Retry a failed execution", |ctx, p| {
        retry_failed_execution(ctx, p).boxed()
    })?;
    Ok(())
}

fn new_execution_id(result: &Value) -> Option<String> {
    result
        .get("executionId")
        .or_else(|| result.get("id"))
        .and_then(gatecore::id_string)
}

async fn get_waiting_executions(ctx: &SkillContext, params: Params) -> SkillResult {
    let mut query = ExecutionQuery::recent(u64_or(&params, "limit", 50)? as usize).with_status(ExecutionStatus::Waiting);
    if let Some(workflow_id) = optional_str(&params, "workflow_id") {
        query = query.for_workflow(workflow_id);
    }
    let executions = ctx.engine.list_executions(&query).await?;
    Ok(json!({
        "count": executions.len(),
        "executions": executions.iter().map(execution_summary).collect::<Vec<_>>(),
    }))
}

async fn trigger_now(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let payload = json_param(&params, "payload")?.unwrap_or_else(|| json!({}));
    let graph = ctx.engine.get_workflow(&workflow_id).await?;

    let result = ctx.engine.run_workflow(&workflow_id, &payload).await?;
    let execution_id = new_execution_id(&result);
    tracing::info!(%workflow_id, execution_id = execution_id.as_deref().unwrap_or("-"), "triggered workflow");

    let webhook_path = graph
        .nodes
        .values()
        .find(|node| node.node_type.to_ascii_lowercase().contains("webhook"))
        .and_then(|node| node.parameter("path").cloned());
    Ok(json!({
        "action": "triggered",
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "execution_id": execution_id,
        "webhook_path": webhook_path,
        "payload_sent": payload,
    }))
}

async fn inject_execution_data(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let node_name = required_str(&params, "node_name")?;
    let data = required_json(&params, "data")?;

    let raw = ctx.engine.get_execution(&execution_id).await?;
    let status = raw.get("status").and_then(Value::as_str).and_then(ExecutionStatus::from_engine);
    if !matches!(status, Some(ExecutionStatus::Waiting | ExecutionStatus::Running)) {
        return Err(SkillError::Failed(format!(
            "execution {} is not waiting (status: {})",
            execution_id,
            status.map(|s| s.as_str()).unwrap_or("unknown")
        )));
    }

    // Report the resume outcome only, never the injected data.
    let result = ctx.engine.inject_execution_data(&execution_id, &node_name, &data).await?;
    let status = result.get("status").and_then(Value::as_str).unwrap_or("resumed");
    tracing::info!(%execution_id, node = %node_name, %status, "injected execution data");
    Ok(json!({
        "action": "data_injected",
        "execution_id": execution_id,
        "node_name": node_name,
        "status": status,
    }))
}

/// Apply an optional parameter patch to the failing node, then re-run the
/// workflow with corrected input. The run only happens once the patch (if
/// any) is applied.
async fn rerun_with_patch(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let node_name = required_str(&params, "node_name")?;
    let input = json_param(&params, "patched_input")?.unwrap_or_else(|| json!({}));

    let raw = ctx.engine.get_execution(&execution_id).await?;
    let record = ExecutionRecord::from_engine(&raw)?;
    let workflow_id = record
        .workflow_id
        .clone()
        .ok_or_else(|| SkillError::Failed(format!("execution {} has no workflow", execution_id)))?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    if graph.node(&node_name).is_none() {
        return Err(SkillError::invalid(format!("node '{}' is not part of workflow {}", node_name, workflow_id)));
    }

    let mut patch_outcome = None;
    if let Some(set) = json_param(&params, "parameters")? {
        let set = set
            .as_object()
            .ok_or_else(|| SkillError::invalid("'parameters' must be an object of dotted paths"))?;
        let operation = PatchOperation::ModifyParameters {
            set: set.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            unset: string_list(&params, "unset"),
        };
        let rationale = optional_str(&params, "rationale")
            .unwrap_or_else(|| format!("manual correction of '{}' after execution {}", node_name, execution_id));
        let class = ctx
            .remediator
            .parser()
            .parse_record(&record, Some(&graph))
            .map(|report| report.error_class)
            .unwrap_or(ErrorClass::Unknown);
        let patch = Patch::new(class, node_name.clone(), operation, rationale, 1.0, graph.version).requiring_confirmation();
        let approval = Approval::from_token(optional_str(&params, "confirmation_token"));

        let outcome = ctx.remediator.apply_manual_patch(&workflow_id, patch, approval).await?;
        if outcome.state != RemediationState::Applied {
            return Ok(json!({
                "action": "patch_pending",
                "original_execution_id": execution_id,
                "remediation": outcome,
            }));
        }
        patch_outcome = Some(outcome);
    }

    let result = ctx.engine.run_workflow(&workflow_id, &input).await?;
    Ok(json!({
        "action": "rerun_with_patch",
        "original_execution_id": execution_id,
        "new_execution_id": new_execution_id(&result),
        "workflow_id": workflow_id,
        "node_name": node_name,
        "patched_input": input,
        "remediation": patch_outcome,
    }))
}

async fn get_execution_data(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let raw = ctx.engine.get_execution(&execution_id).await?;
    let record = ExecutionRecord::from_engine(&raw)?;

    let nodes: Vec<Value> = record
        .node_runs
        .iter()
        .map(|run| {
            json!({
                "node": run.node_id,
                "run_index": run.run_index,
                "status": if run.success { "success" } else { "error" },
                "execution_time_ms": run.execution_time_ms,
                "source_node": run.source_node,
                "input": run.input,
                "output": run.output,
                "error": run.error.as_ref().map(|e| e.full_text()),
            })
        })
        .collect();

    Ok(json!({
        "execution_id": record.execution_id,
        "workflow_id": record.workflow_id,
        "workflow_name": record.workflow_name,
        "execution_status": record.status.as_str(),
        "started_at": record.started_at,
        "stopped_at": record.stopped_at,
        "mode": record.mode,
        "last_node_executed": record.last_node_executed,
        "node_runs": nodes,
    }))
}

async fn retry_failed_execution(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let raw = ctx.engine.get_execution(&execution_id).await?;
    let status = raw.get("status").and_then(Value::as_str).unwrap_or("unknown").to_string();
    let warning = match ExecutionStatus::from_engine(&status) {
        Some(s) if s.is_failure() => None,
        _ => Some(format!("execution status is '{}', not 'error'; retried anyway", status)),
    };

    let result = ctx.engine.retry_execution(&execution_id).await?;
    tracing::info!(%execution_id, "retried execution");
    Ok(json!({
        "action": "retried",
        "original_execution_id": execution_id,
        "new_execution_id": new_execution_id(&result),
        "warning": warning,
    }))
}
