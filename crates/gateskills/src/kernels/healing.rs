//! Proactive maintenance of the engine.

use super::N8N;
use crate::support::*;
use chrono::Utc;
use futures::FutureExt;
use gatecore::{ExecutionQuery, ExecutionRecord, ExecutionStatus};
use gateruntime::{Kernel, RouterError, SkillContext, SkillRegistryBuilder};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const CRITICAL_ERROR_RATE: f64 = 50.0;
const WARNING_ERROR_RATE: f64 = 20.0;
/// Workflows failing more often than this are left alone by auto-restart
const MAX_RESTARTABLE_ERRORS: usize = 2;

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::HealingExpert;
    builder.skill(k, "health_check_all", N8N, "Health of the engine API, workflows, credentials and recent runs", |ctx, p| {
        health_check_all(ctx, p).boxed()
    })?;
    builder.skill(k, "prune_history", N8N, "Delete old execution records (dry run by default)", |ctx, p| {
        prune_history(ctx, p).boxed()
    })?;
    builder.skill(k, "verify_credentials", N8N, "Cross-check stored credentials against workflow usage", |ctx, p| {
        verify_credentials(ctx, p).boxed()
    })?;
    builder.skill(k, "auto_restart_failed", N8N, "Re-run workflows with isolated recent failures (dry run by default)", |ctx, p| {
        auto_restart_failed(ctx, p).boxed()
    })?;
    builder.skill(k, "get_system_metrics", N8N, "Workflow, credential and execution statistics", |ctx, p| {
        get_system_metrics(ctx, p).boxed()
    })?;
    Ok(())
}

fn status_of(raw: &Value) -> Option<ExecutionStatus> {
    raw.get("status").and_then(Value::as_str).and_then(ExecutionStatus::from_engine)
}

fn error_rate(executions: &[Value]) -> f64 {
    if executions.is_empty() {
        return 0.0;
    }
    let errors = executions
        .iter()
        .filter(|raw| status_of(raw).map(|s| s.is_failure()).unwrap_or(false))
        .count();
    errors as f64 / executions.len() as f64 * 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

async fn health_check_all(ctx: &SkillContext, _params: Params) -> SkillResult {
    let mut components = serde_json::Map::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut overall = "healthy";

    match ctx.engine.list_workflows(None).await {
        Ok(workflows) => {
            let active = workflows.iter().filter(|w| w.active).count();
            components.insert("n8n_api".into(), json!({ "status": "healthy" }));
            components.insert(
                "workflows".into(),
                json!({ "status": "healthy", "total": workflows.len(), "active": active, "inactive": workflows.len() - active }),
            );
        }
        Err(e) => {
            components.insert("n8n_api".into(), json!({ "status": "error", "message": e.to_string() }));
            errors.push("n8n API not reachable".to_string());
            overall = "critical";
        }
    }

    match ctx.engine.list_credentials().await {
        Ok(credentials) => {
            components.insert("credentials".into(), json!({ "status": "healthy", "total": credentials.len() }));
        }
        Err(e) => {
            components.insert("credentials".into(), json!({ "status": "error", "message": e.to_string() }));
        }
    }

    match ctx.engine.list_executions(&ExecutionQuery::recent(50)).await {
        Ok(executions) => {
            let rate = error_rate(&executions);
            let status = if rate > CRITICAL_ERROR_RATE {
                errors.push(format!("High error rate: {:.1}%", rate));
                overall = "critical";
                "critical"
            } else if rate > WARNING_ERROR_RATE {
                warnings.push(format!("Elevated error rate: {:.1}%", rate));
                if overall == "healthy" {
                    overall = "warning";
                }
                "warning"
            } else {
                "healthy"
            };
            components.insert(
                "executions".into(),
                json!({ "status": status, "recent_total": executions.len(), "error_rate_percent": round1(rate) }),
            );
        }
        Err(e) => {
            components.insert("executions".into(), json!({ "status": "error", "message": e.to_string() }));
        }
    }

    tracing::info!(status = overall, "health check complete");
    Ok(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "health": overall,
        "components": components,
        "warnings": warnings,
        "errors": errors,
    }))
}

async fn prune_history(ctx: &SkillContext, params: Params) -> SkillResult {
    let days_to_keep = u64_or(&params, "days_to_keep", 3)?;
    let keep_errors = bool_or(&params, "keep_errors", true)?;
    let dry_run = bool_or(&params, "dry_run", true)?;
    let cutoff = Utc::now() - chrono::Duration::days(days_to_keep as i64);

    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(1000)).await?;
    let mut to_delete = Vec::new();
    let mut kept = 0usize;
    for raw in &executions {
        let Some(started) = parse_time(raw.get("startedAt")) else {
            kept += 1;
            continue;
        };
        let is_error = status_of(raw).map(|s| s.is_failure()).unwrap_or(false);
        if started < cutoff && !(keep_errors && is_error) {
            to_delete.push(raw);
        } else {
            kept += 1;
        }
    }

    let mut deleted = 0usize;
    if !dry_run {
        for raw in &to_delete {
            let Some(id) = raw.get("id").and_then(gatecore::id_string) else { continue };
            match ctx.engine.delete_execution(&id).await {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(execution_id = %id, error = %e, "failed to delete execution"),
            }
        }
    }
    tracing::info!(candidates = to_delete.len(), deleted, dry_run, "prune complete");

    Ok(json!({
        "mode": if dry_run { "dry_run" } else { "executed" },
        "cutoff": cutoff.to_rfc3339(),
        "total_executions": executions.len(),
        "to_delete": to_delete.len(),
        "to_keep": kept,
        "deleted": deleted,
        "sample": if dry_run {
            to_delete.iter().take(20).map(|raw| execution_summary(raw)).collect::<Vec<_>>()
        } else {
            Vec::new()
        },
    }))
}

async fn verify_credentials(ctx: &SkillContext, _params: Params) -> SkillResult {
    let credentials = ctx.engine.list_credentials().await?;
    let workflows = ctx.engine.list_workflows(None).await?;

    let mut usage: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut dangling = Vec::new();
    let mut unbound = Vec::new();
    for graph in &workflows {
        for node in graph.nodes.values() {
            for (credential_type, reference) in &node.credentials {
                match &reference.id {
                    Some(id) if credentials.iter().any(|c| &c.id == id) => {
                        usage.entry(id.clone()).or_default().push(graph.name.clone());
                    }
                    Some(id) => dangling.push(json!({
                        "workflow": graph.name,
                        "node": node.id,
                        "credential_id": id,
                        "credential_type": credential_type,
                    })),
                    None => unbound.push(json!({
                        "workflow": graph.name,
                        "node": node.id,
                        "credential_type": credential_type,
                    })),
                }
            }
        }
    }

    let mut warnings = Vec::new();
    let report: Vec<Value> = credentials
        .iter()
        .map(|credential| {
            let mut used_by = usage.get(&credential.id).cloned().unwrap_or_default();
            used_by.sort();
            used_by.dedup();
            let status = if used_by.is_empty() {
                warnings.push(format!("Credential '{}' is not used by any workflow", credential.name));
                "unused"
            } else {
                "in_use"
            };
            json!({
                "id": credential.id,
                "name": credential.name,
                "type": credential.credential_type,
                "status": status,
                "used_by": used_by,
            })
        })
        .collect();
    if !dangling.is_empty() {
        warnings.push(format!("{} node(s) reference credentials that no longer exist", dangling.len()));
    }

    let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for credential in &credentials {
        by_type
            .entry(credential.credential_type.as_str())
            .or_default()
            .push(credential.name.as_str());
    }

    Ok(json!({
        "total_credentials": credentials.len(),
        "warnings": warnings,
        "credentials": report,
        "dangling_references": dangling,
        "unbound_slots": unbound,
        "by_type": by_type,
    }))
}

async fn auto_restart_failed(ctx: &SkillContext, params: Params) -> SkillResult {
    let max_restarts = u64_or(&params, "max_restarts", 3)? as usize;
    let dry_run = bool_or(&params, "dry_run", true)?;

    let query = ExecutionQuery::recent(50).with_status(ExecutionStatus::Error);
    let executions = ctx.engine.list_executions(&query).await?;

    // Keep first-seen (newest) order per workflow
    let mut order = Vec::new();
    let mut failures: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for raw in &executions {
        let Some(workflow_id) = raw.get("workflowId").and_then(gatecore::id_string) else { continue };
        if !failures.contains_key(&workflow_id) {
            order.push(workflow_id.clone());
        }
        failures.entry(workflow_id).or_default().push(raw);
    }

    let candidates: Vec<Value> = order
        .iter()
        .filter(|id| failures[*id].len() <= MAX_RESTARTABLE_ERRORS)
        .take(max_restarts)
        .map(|id| {
            json!({
                "workflow_id": id,
                "recent_errors": failures[id].len(),
                "last_error_id": failures[id].first().and_then(|raw| raw.get("id")),
            })
        })
        .collect();

    let mut restarted = Vec::new();
    if !dry_run {
        for candidate in &candidates {
            let Some(id) = candidate["workflow_id"].as_str() else { continue };
            match ctx.engine.run_workflow(id, &json!({})).await {
                Ok(run) => restarted.push(json!({
                    "workflow_id": id,
                    "new_execution_id": run.get("executionId").or_else(|| run.get("id")),
                    "status": "triggered",
                })),
                Err(e) => restarted.push(json!({ "workflow_id": id, "status": "failed", "error": e.to_string() })),
            }
        }
    }
    tracing::info!(candidates = candidates.len(), restarted = restarted.len(), dry_run, "auto-restart pass");

    Ok(json!({
        "mode": if dry_run { "dry_run" } else { "executed" },
        "total_failed_workflows": order.len(),
        "restart_candidates": candidates.len(),
        "candidates": candidates,
        "restarted": restarted,
    }))
}

async fn get_system_metrics(ctx: &SkillContext, _params: Params) -> SkillResult {
    let workflows = ctx.engine.list_workflows(None).await?;
    let credentials = ctx.engine.list_credentials().await?;
    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(100)).await?;

    let active = workflows.iter().filter(|w| w.active).count();
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut durations = Vec::new();
    for raw in &executions {
        let status = raw.get("status").and_then(Value::as_str).unwrap_or("unknown");
        *by_status.entry(status.to_string()).or_default() += 1;
        if let Some(ms) = ExecutionRecord::from_engine(raw).ok().and_then(|r| r.duration_ms()) {
            durations.push(ms as f64);
        }
    }
    let successes = executions
        .iter()
        .filter(|raw| status_of(raw) == Some(ExecutionStatus::Success))
        .count();
    let success_rate = if executions.is_empty() {
        0.0
    } else {
        successes as f64 / executions.len() as f64 * 100.0
    };
    let avg_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    Ok(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "workflows": { "total": workflows.len(), "active": active, "inactive": workflows.len() - active },
        "credentials": { "total": credentials.len() },
        "executions": {
            "sampled": executions.len(),
            "by_status": by_status,
            "success_rate_percent": round1(success_rate),
            "avg_execution_time_ms": avg_ms.round(),
        },
    }))
}
