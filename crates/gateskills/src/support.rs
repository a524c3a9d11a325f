//! Parameter extraction and helpers shared by the kernels.

use chrono::{DateTime, Utc};
use gatecore::{CommandOutput, ExecutionRecord, NodeSpec, WorkflowGraph};
use gateruntime::{SkillContext, SkillError};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

pub type Params = Map<String, Value>;
pub type SkillResult = Result<Value, SkillError>;

pub fn required_str(params: &Params, key: &str) -> Result<String, SkillError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(SkillError::invalid(format!("'{}' must be a non-empty string", key))),
        None => Err(SkillError::invalid(format!("missing required parameter '{}'", key))),
    }
}

pub fn optional_str(params: &Params, key: &str) -> Option<String> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn bool_or(params: &Params, key: &str, default: bool) -> Result<bool, SkillError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(SkillError::invalid(format!("'{}' must be a boolean", key))),
        },
        Some(_) => Err(SkillError::invalid(format!("'{}' must be a boolean", key))),
    }
}

pub fn u64_or(params: &Params, key: &str, default: u64) -> Result<u64, SkillError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| SkillError::invalid(format!("'{}' must be a non-negative integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| SkillError::invalid(format!("'{}' must be a non-negative integer", key))),
        Some(_) => Err(SkillError::invalid(format!("'{}' must be a non-negative integer", key))),
    }
}

pub fn f64_or(params: &Params, key: &str, default: f64) -> Result<f64, SkillError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| SkillError::invalid(format!("'{}' must be a number", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| SkillError::invalid(format!("'{}' must be a number", key))),
        Some(_) => Err(SkillError::invalid(format!("'{}' must be a number", key))),
    }
}

/// A JSON parameter given either inline or as a JSON-encoded string.
pub fn json_param(params: &Params, key: &str) -> Result<Option<Value>, SkillError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => serde_json::from_str(text).map(Some).map_err(|e| {
            SkillError::invalid(format!(
                "invalid JSON in '{}': {} at line {}, column {}",
                key,
                e,
                e.line(),
                e.column()
            ))
        }),
        Some(value) => Ok(Some(value.clone())),
    }
}

pub fn required_json(params: &Params, key: &str) -> Result<Value, SkillError> {
    json_param(params, key)?.ok_or_else(|| SkillError::invalid(format!("missing required parameter '{}'", key)))
}

/// List of strings given as an array or a comma-separated string.
pub fn string_list(params: &Params, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Names safe to use as file names: alphanumerics kept, everything else `_`.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Reject paths that could escape a managed directory.
pub fn plain_file_name(params: &Params, key: &str) -> Result<String, SkillError> {
    let name = required_str(params, key)?;
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(SkillError::invalid(format!("'{}' must be a plain file name", key)));
    }
    Ok(name)
}

pub fn data_dir(ctx: &SkillContext, sub: &str) -> PathBuf {
    ctx.config.engine.data_dir.join(sub)
}

pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push('…');
        cut
    }
}

/// Last `limit` characters of command output.
pub fn tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(limit)).collect()
}

pub fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Run a command and turn a non-zero exit into a reported failure.
pub async fn run_checked(ctx: &SkillContext, program: &str, args: Vec<String>) -> Result<CommandOutput, SkillError> {
    let output = ctx.containers.run(program, &args).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(SkillError::CommandFailed {
            exit_code: output.exit_code,
            message: truncate(output.failure_text(), 500),
        })
    }
}

pub async fn docker(ctx: &SkillContext, args: &[&str]) -> Result<CommandOutput, SkillError> {
    run_checked(
        ctx,
        &ctx.config.docker.binary,
        args.iter().map(|a| a.to_string()).collect(),
    )
    .await
}

/// One JSON document per line, as printed by `--format '{{json .}}'`.
pub fn json_lines(text: &str) -> Vec<Value> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// A workflow given inline (object or JSON string) or by id/name.
pub async fn graph_param(ctx: &SkillContext, params: &Params, key: &str) -> Result<WorkflowGraph, SkillError> {
    match params.get(key) {
        Some(Value::Object(_)) => Ok(WorkflowGraph::load(&params[key])?),
        Some(Value::String(text)) if text.trim_start().starts_with('{') => {
            let raw = required_json(params, key)?;
            Ok(WorkflowGraph::load(&raw)?)
        }
        _ => {
            let id = required_str(params, key)?;
            Ok(ctx.engine.get_workflow(&id).await?)
        }
    }
}

pub fn is_trigger(node: &NodeSpec) -> bool {
    let kind = node.node_type.to_ascii_lowercase();
    kind.ends_with("trigger") || kind.contains("webhook") || kind.ends_with(".cron")
}

/// Compact listing entry for a workflow.
pub fn workflow_summary(graph: &WorkflowGraph) -> Value {
    json!({
        "id": graph.id,
        "name": graph.name,
        "active": graph.active,
        "tags": graph.tags,
        "node_count": graph.nodes.len(),
        "version": graph.version,
    })
}

/// Compact listing entry for an execution; never the raw engine payload.
pub fn execution_summary(raw: &Value) -> Value {
    match ExecutionRecord::from_engine(raw) {
        Ok(record) => json!({
            "id": record.execution_id,
            "workflow_id": record.workflow_id,
            "workflow_name": record.workflow_name,
            "status": record.status.as_str(),
            "mode": record.mode,
            "started_at": record.started_at,
            "stopped_at": record.stopped_at,
            "duration_ms": record.duration_ms(),
        }),
        Err(_) => json!({ "id": raw.get("id"), "status": raw.get("status") }),
    }
}

/// JSON items of the last run of `node`, first output, from a raw execution.
pub fn run_output(raw: &Value, node: &str) -> Option<Vec<Value>> {
    let runs = raw.pointer("/data/resultData/runData")?.get(node)?.as_array()?;
    let first_output = runs.last()?.pointer("/data/main/0")?.as_array()?;
    Some(
        first_output
            .iter()
            .map(|item| item.get("json").cloned().unwrap_or_else(|| item.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_required_str_accepts_numeric_ids() {
        let p = params(json!({"workflow_id": 42, "empty": " "}));
        assert_eq!(required_str(&p, "workflow_id").unwrap(), "42");
        assert_eq!(required_str(&p, "empty").unwrap_err().error_class(), "InvalidParams");
        assert!(required_str(&p, "missing").is_err());
    }

    #[test]
    fn test_json_param_accepts_strings_and_values() {
        let p = params(json!({"inline": {"a": 1}, "encoded": "{\"a\": 1}", "broken": "{nope"}));
        assert_eq!(json_param(&p, "inline").unwrap(), Some(json!({"a": 1})));
        assert_eq!(json_param(&p, "encoded").unwrap(), Some(json!({"a": 1})));
        assert!(json_param(&p, "broken").unwrap_err().to_string().contains("broken"));
        assert_eq!(json_param(&p, "absent").unwrap(), None);
    }

    #[test]
    fn test_scalar_coercions() {
        let p = params(json!({"flag": "yes", "n": "12", "f": 0.5, "bad": [1]}));
        assert!(bool_or(&p, "flag", false).unwrap());
        assert!(bool_or(&p, "other", true).unwrap());
        assert_eq!(u64_or(&p, "n", 0).unwrap(), 12);
        assert_eq!(f64_or(&p, "f", 1.0).unwrap(), 0.5);
        assert!(u64_or(&p, "bad", 0).is_err());
    }

    #[test]
    fn test_file_name_helpers() {
        assert_eq!(safe_file_name("Invoice Sync!"), "Invoice_Sync_");
        let p = params(json!({"ok": "a.json", "escape": "../etc/passwd"}));
        assert!(plain_file_name(&p, "ok").is_ok());
        assert!(plain_file_name(&p, "escape").is_err());
    }

    #[test]
    fn test_text_helpers() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(tail("abcdef", 2), "ef");
        assert_eq!(string_list(&params(json!({"t": "a, b,,c"})), "t"), vec!["a", "b", "c"]);
        assert_eq!(json_lines("{\"a\":1}\n\nnot json\n{\"b\":2}").len(), 2);
    }

    #[test]
    fn test_run_output_reads_last_run_items() {
        let raw = json!({"data": {"resultData": {"runData": {"Fetch": [
            {"data": {"main": [[{"json": {"n": 1}}]]}},
            {"data": {"main": [[{"json": {"n": 2}}, {"json": {"n": 3}}]]}}
        ]}}}});
        assert_eq!(run_output(&raw, "Fetch"), Some(vec![json!({"n": 2}), json!({"n": 3})]));
        assert_eq!(run_output(&raw, "Missing"), None);
    }
}
