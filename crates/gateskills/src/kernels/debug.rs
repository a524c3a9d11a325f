//! Diagnosis and self-healing of failed executions.

use super::N8N;
use crate::support::*;
use futures::FutureExt;
use gatecore::{ErrorClass, ExecutionQuery, ExecutionStatus, FailureReport};
use gateruntime::{Approval, Kernel, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::DebugExpert;
    builder.skill(k, "diagnose_execution", N8N, "Locate the failing node of an execution and classify the failure", |ctx, p| {
        diagnose_execution(ctx, p).boxed()
    })?;
    builder.skill(k, "analyze_failures", N8N, "Diagnose the most recent failed executions", |ctx, p| {
        analyze_failures(ctx, p).boxed()
    })?;
    builder.skill(k, "get_execution_history", N8N, "Recent executions, optionally by workflow and status", |ctx, p| {
        get_execution_history(ctx, p).boxed()
    })?;
    builder.skill(k, "auto_fix", N8N, "Diagnose, patch and apply a fix for a failed execution", |ctx, p| {
        auto_fix(ctx, p).boxed()
    })?;
    builder.skill(k, "shadow_simulate", N8N, "Preview the fix for a failed execution without applying it", |ctx, p| {
        shadow_simulate(ctx, p).boxed()
    })?;
    builder.skill(k, "get_error_patterns", N8N, "Group recent failures by recurring error message", |ctx, p| {
        get_error_patterns(ctx, p).boxed()
    })?;
    Ok(())
}

pub(crate) fn recommendation(report: &FailureReport) -> String {
    let node = &report.failing_node_id;
    match report.error_class {
        ErrorClass::AuthError => format!("Authentication failed in node '{}'. Re-authorise its credential.", node),
        ErrorClass::CredentialMissing => format!("Node '{}' has no credential bound. Select one in the editor.", node),
        ErrorClass::TypeMismatch => format!(
            "Node '{}' received data of an unexpected shape. Check the output of '{}'.",
            node, report.symptom_node_id
        ),
        ErrorClass::RateLimited => format!("Node '{}' was rate limited. Enable retries with a longer wait.", node),
        ErrorClass::Timeout => format!("Node '{}' timed out. Raise its timeout or check the endpoint.", node),
        ErrorClass::Unknown => format!("Review the configuration and input data of node '{}'.", node),
    }
}

async fn diagnose_execution(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let diagnosis = ctx.remediator.diagnose(&execution_id).await?;
    let record = &diagnosis.record;

    let recommendation = diagnosis.report.as_ref().map(recommendation);
    Ok(json!({
        "execution_id": record.execution_id,
        "workflow": {
            "id": record.workflow_id,
            "name": record.workflow_name,
            "status": record.status.as_str(),
            "mode": record.mode,
            "started_at": record.started_at,
            "stopped_at": record.stopped_at,
        },
        "failed": record.status.is_failure(),
        "report": diagnosis.report,
        "proposed_patch": diagnosis.patch,
        "recommendation": recommendation,
    }))
}

async fn analyze_failures(ctx: &SkillContext, params: Params) -> SkillResult {
    let limit = u64_or(&params, "limit", 5)? as usize;
    let mut query = ExecutionQuery::recent(limit).with_status(ExecutionStatus::Error).with_data();
    if let Some(workflow_id) = optional_str(&params, "workflow_id") {
        query = query.for_workflow(workflow_id);
    }

    let executions = ctx.engine.list_executions(&query).await?;
    let parser = ctx.remediator.parser();
    let mut analyses = Vec::new();
    for raw in &executions {
        match parser.parse(raw, None) {
            Ok(Some(report)) => analyses.push(json!({
                "execution_id": report.execution_id,
                "workflow_id": report.workflow_id,
                "failed_node": report.failing_node_id,
                "error_class": report.error_class,
                "error_message": report.error_message,
                "recommendation": recommendation(&report),
            })),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable execution");
            }
        }
    }
    tracing::info!(analyzed = analyses.len(), "analyzed failed executions");
    Ok(json!({ "count": analyses.len(), "failures": analyses }))
}

async fn get_execution_history(ctx: &SkillContext, params: Params) -> SkillResult {
    let limit = u64_or(&params, "limit", 10)? as usize;
    let mut query = ExecutionQuery::recent(limit);
    if let Some(workflow_id) = optional_str(&params, "workflow_id") {
        query = query.for_workflow(workflow_id);
    }
    if let Some(status) = optional_str(&params, "status") {
        let status = ExecutionStatus::from_engine(&status)
            .ok_or_else(|| SkillError::invalid(format!("unknown execution status '{}'", status)))?;
        query = query.with_status(status);
    }
    let executions = ctx.engine.list_executions(&query).await?;
    Ok(json!({
        "count": executions.len(),
        "executions": executions.iter().map(execution_summary).collect::<Vec<_>>(),
    }))
}

async fn auto_fix(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let approval = Approval::from_token(optional_str(&params, "confirmation_token"));
    let outcome = ctx.remediator.auto_fix(&execution_id, approval).await?;
    Ok(serde_json::to_value(outcome)?)
}

async fn shadow_simulate(ctx: &SkillContext, params: Params) -> SkillResult {
    let execution_id = required_str(&params, "execution_id")?;
    let outcome = ctx.remediator.shadow_simulate(&execution_id).await?;
    Ok(serde_json::to_value(outcome)?)
}

#[derive(Default)]
struct Pattern {
    occurrences: usize,
    class: Option<ErrorClass>,
    workflows: BTreeSet<String>,
    nodes: BTreeSet<String>,
    first_seen: Option<Value>,
    last_seen: Option<Value>,
}

async fn get_error_patterns(ctx: &SkillContext, params: Params) -> SkillResult {
    let hours = u64_or(&params, "hours", 24)?;
    let min_occurrences = u64_or(&params, "min_occurrences", 2)? as usize;
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);

    let query = ExecutionQuery::recent(200).with_status(ExecutionStatus::Error).with_data();
    let executions = ctx.engine.list_executions(&query).await?;
    let parser = ctx.remediator.parser();

    let mut patterns: BTreeMap<String, Pattern> = BTreeMap::new();
    let mut analyzed = 0;
    for raw in &executions {
        match parse_time(raw.get("startedAt")) {
            Some(started) if started >= cutoff => {}
            _ => continue,
        }
        let report = match parser.parse(raw, None) {
            Ok(Some(report)) => report,
            _ => continue,
        };
        analyzed += 1;
        let key = truncate(&report.error_message, 100);
        let pattern = patterns.entry(key).or_default();
        pattern.occurrences += 1;
        pattern.class = Some(report.error_class);
        if let Some(workflow_id) = report.workflow_id {
            pattern.workflows.insert(workflow_id);
        }
        pattern.nodes.insert(report.failing_node_id);
        // Listings are newest first
        if pattern.last_seen.is_none() {
            pattern.last_seen = raw.get("startedAt").cloned();
        }
        pattern.first_seen = raw.get("startedAt").cloned();
    }

    let mut list: Vec<(String, Pattern)> = patterns
        .into_iter()
        .filter(|(_, p)| p.occurrences >= min_occurrences)
        .collect();
    list.sort_by(|a, b| b.1.occurrences.cmp(&a.1.occurrences));

    Ok(json!({
        "analysis_period_hours": hours,
        "total_errors_analyzed": analyzed,
        "unique_patterns": list.len(),
        "patterns": list
            .into_iter()
            .map(|(message, p)| json!({
                "error_pattern": message,
                "error_class": p.class,
                "occurrences": p.occurrences,
                "affected_workflows": p.workflows,
                "affected_nodes": p.nodes,
                "first_seen": p.first_seen,
                "last_seen": p.last_seen,
            }))
            .collect::<Vec<_>>(),
    }))
}
