//! Trend analysis over execution history.

use super::N8N;
use crate::support::*;
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use gatecore::{ExecutionQuery, ExecutionStatus, WorkflowGraph};
use gateruntime::{Kernel, RouterError, SkillContext, SkillRegistryBuilder};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

const AI_NODE_MARKERS: [&str; 4] = ["openai", "anthropic", "langchain", "chat"];
const TOKENS_PER_EXECUTION: f64 = 1500.0;
/// Minimum runs before a workflow's error rate is trusted
const MIN_RUNS_FOR_PREDICTION: usize = 5;
const AT_RISK_ERROR_RATE: f64 = 0.2;

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::ForecastExpert;
    builder.skill(k, "detect_anomaly", N8N, "Hours whose execution count deviates from the mean", |ctx, p| {
        detect_anomaly(ctx, p).boxed()
    })?;
    builder.skill(k, "predict_burn_rate", N8N, "Estimate daily and monthly LLM token spend", |ctx, p| {
        predict_burn_rate(ctx, p).boxed()
    })?;
    builder.skill(k, "predict_failures", N8N, "Workflows whose error rate puts them at risk", |ctx, p| {
        predict_failures(ctx, p).boxed()
    })?;
    builder.skill(k, "compute_reliability", N8N, "Overall reliability score and grade", |ctx, p| {
        compute_reliability(ctx, p).boxed()
    })?;
    builder.skill(k, "detect_silence", N8N, "Alert when nothing has run for too long", |ctx, p| {
        detect_silence(ctx, p).boxed()
    })?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TrafficProfile {
    pub mean: f64,
    pub std_dev: f64,
    pub anomalies: Vec<(String, usize, f64)>,
}

/// Z-score of each hourly bucket against the sample mean and deviation.
/// `None` when fewer than three hours carry traffic.
pub(crate) fn traffic_profile(hourly: &BTreeMap<String, usize>, threshold: f64) -> Option<TrafficProfile> {
    if hourly.len() < 3 {
        return None;
    }
    let n = hourly.len() as f64;
    let mean = hourly.values().sum::<usize>() as f64 / n;
    let variance = hourly.values().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    let mut anomalies = Vec::new();
    if std_dev > 0.0 {
        for (hour, &count) in hourly {
            let z = (count as f64 - mean) / std_dev;
            if z.abs() > threshold {
                anomalies.push((hour.clone(), count, z));
            }
        }
    }
    Some(TrafficProfile { mean, std_dev, anomalies })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn detect_anomaly(ctx: &SkillContext, params: Params) -> SkillResult {
    let hours = u64_or(&params, "hours", 24)?;
    let threshold = f64_or(&params, "threshold_std", 2.0)?;
    let cutoff = Utc::now() - Duration::hours(hours as i64);

    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(500)).await?;
    let mut hourly: BTreeMap<String, usize> = BTreeMap::new();
    for raw in &executions {
        match parse_time(raw.get("startedAt")) {
            Some(started) if started >= cutoff => {
                *hourly.entry(started.format("%Y-%m-%d %H:00").to_string()).or_default() += 1;
            }
            _ => {}
        }
    }

    let Some(profile) = traffic_profile(&hourly, threshold) else {
        return Ok(json!({ "status": "insufficient_data", "hours_analyzed": hourly.len() }));
    };
    if !profile.anomalies.is_empty() {
        tracing::warn!(count = profile.anomalies.len(), "traffic anomalies detected");
    }
    Ok(json!({
        "status": "success",
        "hours_analyzed": hourly.len(),
        "mean_hourly": round2(profile.mean),
        "std_deviation": round2(profile.std_dev),
        "threshold_std": threshold,
        "anomalies": profile
            .anomalies
            .iter()
            .take(10)
            .map(|(hour, count, z)| json!({ "hour": hour, "count": count, "z_score": round2(*z) }))
            .collect::<Vec<_>>(),
    }))
}

fn uses_ai(graph: &WorkflowGraph) -> bool {
    graph.nodes.values().any(|node| {
        let kind = node.node_type.to_ascii_lowercase();
        AI_NODE_MARKERS.iter().any(|marker| kind.contains(marker))
    })
}

async fn predict_burn_rate(ctx: &SkillContext, params: Params) -> SkillResult {
    let cost_per_1k = f64_or(&params, "model_cost_per_1k", 0.002)?;
    let since = Utc::now() - Duration::hours(24);

    let ai_workflows: BTreeSet<String> = ctx
        .engine
        .list_workflows(None)
        .await?
        .into_iter()
        .filter(uses_ai)
        .filter_map(|graph| graph.id)
        .collect();

    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(200)).await?;
    let ai_executions = executions
        .iter()
        .filter(|raw| {
            raw.get("workflowId")
                .and_then(gatecore::id_string)
                .map(|id| ai_workflows.contains(&id))
                .unwrap_or(false)
        })
        .filter(|raw| parse_time(raw.get("startedAt")).map(|t| t >= since).unwrap_or(true))
        .count();

    let daily_tokens = ai_executions as f64 * TOKENS_PER_EXECUTION;
    let daily_cost = daily_tokens / 1000.0 * cost_per_1k;
    Ok(json!({
        "status": "success",
        "ai_workflows": ai_workflows.len(),
        "ai_executions_24h": ai_executions,
        "tokens_per_execution": TOKENS_PER_EXECUTION,
        "daily_tokens_estimate": daily_tokens.round(),
        "daily_cost_usd": round2(daily_cost),
        "monthly_cost_usd": round2(daily_cost * 30.0),
    }))
}

/// Workflows with enough runs and an error rate above the risk threshold,
/// worst first.
pub(crate) fn at_risk(executions: &[Value]) -> Vec<(String, usize, f64)> {
    let mut stats: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for raw in executions {
        let Some(workflow_id) = raw.get("workflowId").and_then(gatecore::id_string) else { continue };
        let entry = stats.entry(workflow_id).or_default();
        entry.0 += 1;
        let failed = raw
            .get("status")
            .and_then(Value::as_str)
            .and_then(ExecutionStatus::from_engine)
            .map(|s| s.is_failure())
            .unwrap_or(false);
        if failed {
            entry.1 += 1;
        }
    }
    let mut risky: Vec<(String, usize, f64)> = stats
        .into_iter()
        .filter(|(_, (total, _))| *total >= MIN_RUNS_FOR_PREDICTION)
        .map(|(id, (total, errors))| (id, total, errors as f64 / total as f64))
        .filter(|(_, _, rate)| *rate > AT_RISK_ERROR_RATE)
        .collect();
    risky.sort_by(|a, b| b.2.total_cmp(&a.2));
    risky
}

async fn predict_failures(ctx: &SkillContext, _params: Params) -> SkillResult {
    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(500)).await?;
    let risky = at_risk(&executions);
    Ok(json!({
        "status": "success",
        "executions_analyzed": executions.len(),
        "at_risk": risky
            .iter()
            .take(10)
            .map(|(id, total, rate)| json!({
                "workflow_id": id,
                "runs": total,
                "error_rate": (rate * 1000.0).round() / 10.0,
            }))
            .collect::<Vec<_>>(),
    }))
}

pub(crate) fn grade(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 70.0 {
        "C"
    } else {
        "D"
    }
}

async fn compute_reliability(ctx: &SkillContext, _params: Params) -> SkillResult {
    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(200)).await?;
    let successes = executions
        .iter()
        .filter(|raw| raw.get("status").and_then(Value::as_str).and_then(ExecutionStatus::from_engine) == Some(ExecutionStatus::Success))
        .count();
    // No history counts as fully reliable
    let score = if executions.is_empty() {
        100.0
    } else {
        successes as f64 / executions.len() as f64 * 100.0
    };
    Ok(json!({
        "status": "success",
        "reliability_score": (score * 10.0).round() / 10.0,
        "grade": grade(score),
        "total_analyzed": executions.len(),
        "successful": successes,
    }))
}

fn most_recent(executions: &[Value]) -> Option<DateTime<Utc>> {
    executions.iter().filter_map(|raw| parse_time(raw.get("startedAt"))).max()
}

async fn detect_silence(ctx: &SkillContext, params: Params) -> SkillResult {
    let tolerance = u64_or(&params, "tolerance_minutes", 30)?;
    let executions = ctx.engine.list_executions(&ExecutionQuery::recent(10)).await?;
    if executions.is_empty() {
        tracing::warn!("no executions recorded");
        return Ok(json!({ "status": "alert", "message": "No executions found", "is_unusual": true }));
    }

    let last = most_recent(&executions);
    let silence_minutes = last
        .map(|t| (Utc::now() - t).num_seconds() as f64 / 60.0)
        .unwrap_or(f64::INFINITY);
    let silent = silence_minutes > tolerance as f64;
    if silent {
        tracing::warn!(silence_minutes, tolerance, "unusual silence");
    }
    Ok(json!({
        "status": if silent { "silence_alert" } else { "normal" },
        "last_execution_at": last.map(|t| t.to_rfc3339()),
        "silence_minutes": if silence_minutes.is_finite() { Some((silence_minutes * 10.0).round() / 10.0) } else { None },
        "tolerance_minutes": tolerance,
        "is_unusual": silent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_profile_needs_three_hours() {
        let hourly: BTreeMap<String, usize> = [("a".to_string(), 1), ("b".to_string(), 2)].into_iter().collect();
        assert!(traffic_profile(&hourly, 2.0).is_none());
    }

    #[test]
    fn test_traffic_profile_flags_spike() {
        let mut hourly: BTreeMap<String, usize> = (0..9).map(|h| (format!("2024-01-01 0{}:00", h), 10)).collect();
        hourly.insert("2024-01-01 10:00".to_string(), 100);
        let profile = traffic_profile(&hourly, 2.0).unwrap();
        assert_eq!(profile.mean, 19.0);
        assert_eq!(profile.anomalies.len(), 1);
        assert_eq!(profile.anomalies[0].0, "2024-01-01 10:00");
        assert!(profile.anomalies[0].2 > 2.0);
    }

    #[test]
    fn test_flat_traffic_has_no_anomalies() {
        let hourly: BTreeMap<String, usize> = (0..5).map(|h| (h.to_string(), 4)).collect();
        let profile = traffic_profile(&hourly, 2.0).unwrap();
        assert_eq!(profile.std_dev, 0.0);
        assert!(profile.anomalies.is_empty());
    }

    #[test]
    fn test_at_risk_requires_minimum_runs() {
        let mut runs = Vec::new();
        for i in 0..6 {
            let status = if i < 3 { "error" } else { "success" };
            runs.push(json!({ "id": i, "workflowId": "busy", "status": status }));
        }
        for _ in 0..4 {
            runs.push(json!({ "id": 9, "workflowId": "quiet", "status": "error" }));
        }
        let risky = at_risk(&runs);
        assert_eq!(risky.len(), 1);
        assert_eq!(risky[0].0, "busy");
        assert_eq!(risky[0].2, 0.5);
    }

    #[test]
    fn test_grades() {
        assert_eq!(grade(95.0), "A");
        assert_eq!(grade(80.0), "B");
        assert_eq!(grade(70.0), "C");
        assert_eq!(grade(12.0), "D");
    }
}
