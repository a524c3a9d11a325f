//! Execution records as fetched from the engine.
//!
//! The raw payload differs across engine versions and is often partial
//! (executions fetched without data, runs missing their error object).
//! Everything except the execution id is optional here.

use crate::workflow::{id_string, NodeId, WorkflowGraph};
use crate::WorkflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Running,
    Waiting,
    Crashed,
}

impl ExecutionStatus {
    /// Map an engine status string. Cancelled and failed runs count as errors.
    pub fn from_engine(status: &str) -> Option<Self> {
        match status {
            "success" => Some(ExecutionStatus::Success),
            "error" | "failed" | "canceled" | "cancelled" => Some(ExecutionStatus::Error),
            "running" | "new" => Some(ExecutionStatus::Running),
            "waiting" => Some(ExecutionStatus::Waiting),
            "crashed" => Some(ExecutionStatus::Crashed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Crashed => "crashed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Error | ExecutionStatus::Crashed)
    }
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_id: Option<String>,
    pub workflow_name: Option<String>,
    pub status: ExecutionStatus,
    pub mode: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Per-node runs in execution order
    pub node_runs: Vec<NodeRun>,
    pub last_node_executed: Option<NodeId>,
    /// Workflow-level error, when the engine recorded one
    pub error: Option<RunError>,
    /// Graph as it was when the execution ran
    pub workflow_snapshot: Option<WorkflowGraph>,
}

/// Result of running one node once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRun {
    pub node_id: NodeId,
    pub run_index: usize,
    pub success: bool,
    pub started_at_ms: Option<i64>,
    pub execution_time_ms: Option<u64>,
    /// Node that fed this run its input
    pub source_node: Option<NodeId>,
    pub error: Option<RunError>,
    pub input: Option<DataSummary>,
    pub output: Option<DataSummary>,
}

/// Error payload attached to a node run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunError {
    pub message: String,
    pub description: Option<String>,
    pub name: Option<String>,
    pub http_code: Option<u16>,
    pub node_type: Option<String>,
}

/// Item count plus the first item, for context snippets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSummary {
    pub items: usize,
    pub sample: Option<Value>,
}

impl ExecutionRecord {
    pub fn from_engine(raw: &Value) -> Result<Self, WorkflowError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| WorkflowError::parse("execution must be a JSON object"))?;
        let execution_id = obj
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| WorkflowError::parse("execution is missing 'id'"))?;

        let result_data = obj
            .get("data")
            .and_then(|data| data.get("resultData"))
            .and_then(Value::as_object);

        let error = result_data
            .and_then(|result| result.get("error"))
            .and_then(RunError::from_engine);

        let node_runs = result_data
            .and_then(|result| result.get("runData"))
            .and_then(Value::as_object)
            .map(collect_runs)
            .unwrap_or_default();

        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .and_then(ExecutionStatus::from_engine)
            .unwrap_or_else(|| infer_status(obj, error.is_some(), &node_runs));

        let workflow_snapshot = obj
            .get("workflowData")
            .and_then(|data| WorkflowGraph::load(data).ok());

        Ok(Self {
            execution_id,
            workflow_id: obj.get("workflowId").and_then(id_string),
            workflow_name: obj
                .get("workflowData")
                .and_then(|data| data.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            status,
            mode: obj.get("mode").and_then(Value::as_str).map(str::to_string),
            started_at: obj.get("startedAt").and_then(parse_timestamp),
            stopped_at: obj.get("stoppedAt").and_then(parse_timestamp),
            node_runs,
            last_node_executed: result_data
                .and_then(|result| result.get("lastNodeExecuted"))
                .and_then(Value::as_str)
                .map(str::to_string),
            error,
            workflow_snapshot,
        })
    }

    /// First run marked failed, in execution order.
    pub fn first_failed_run(&self) -> Option<&NodeRun> {
        self.node_runs.iter().find(|run| !run.success)
    }

    /// Latest run of a node that happened before position `before`.
    pub fn last_run_of(&self, node_id: &str, before: usize) -> Option<&NodeRun> {
        self.node_runs[..before.min(self.node_runs.len())]
            .iter()
            .rev()
            .find(|run| run.node_id == node_id)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => Some((stop - start).num_milliseconds()),
            _ => None,
        }
    }
}

impl RunError {
    /// Accepts an error object or a bare message string.
    pub fn from_engine(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(message) => Some(Self {
                message: message.clone(),
                ..Self::default()
            }),
            Value::Object(obj) => {
                let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
                let http_code = obj
                    .get("httpCode")
                    .or_else(|| obj.get("statusCode"))
                    .and_then(|code| match code {
                        Value::Number(n) => n.as_u64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    })
                    .and_then(|code| u16::try_from(code).ok());
                Some(Self {
                    message: text("message").unwrap_or_default(),
                    description: text("description"),
                    name: text("name"),
                    http_code,
                    node_type: obj
                        .get("node")
                        .and_then(|node| node.get("type"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            }
            _ => None,
        }
    }

    /// Message and description joined, for signature matching.
    pub fn full_text(&self) -> String {
        match &self.description {
            Some(description) if !description.is_empty() => format!("{} {}", self.message, description),
            _ => self.message.clone(),
        }
    }
}

impl DataSummary {
    /// Summarize `{ main: [[{json: ...}, ...], ...] }`.
    fn from_engine(raw: &Value) -> Option<Self> {
        let outputs = raw.get("main")?.as_array()?;
        let items: Vec<&Value> = outputs
            .iter()
            .filter_map(Value::as_array)
            .flatten()
            .collect();
        Some(Self {
            items: items.len(),
            sample: items.first().map(|item| item.get("json").cloned().unwrap_or_else(|| (*item).clone())),
        })
    }
}

fn collect_runs(run_data: &Map<String, Value>) -> Vec<NodeRun> {
    let mut keyed = Vec::new();
    for (node_id, runs) in run_data {
        let Some(runs) = runs.as_array() else {
            continue;
        };
        for (run_index, run) in runs.iter().enumerate() {
            let order = run.get("executionIndex").and_then(Value::as_u64);
            keyed.push((order, parse_run(node_id, run_index, run)));
        }
    }
    // Engine-assigned index first, then start time; missing keys sort last
    keyed.sort_by_key(|(order, run)| {
        (
            order.unwrap_or(u64::MAX),
            run.started_at_ms.unwrap_or(i64::MAX),
        )
    });
    keyed.into_iter().map(|(_, run)| run).collect()
}

fn parse_run(node_id: &str, run_index: usize, raw: &Value) -> NodeRun {
    let error = raw.get("error").and_then(RunError::from_engine);
    let status = raw.get("executionStatus").and_then(Value::as_str);
    let success = error.is_none() && !matches!(status, Some("error") | Some("crashed"));

    NodeRun {
        node_id: node_id.to_string(),
        run_index,
        success,
        started_at_ms: raw.get("startTime").and_then(Value::as_i64),
        execution_time_ms: raw.get("executionTime").and_then(Value::as_u64),
        source_node: raw
            .get("source")
            .and_then(Value::as_array)
            .and_then(|sources| sources.iter().find_map(|s| s.get("previousNode")))
            .and_then(Value::as_str)
            .map(str::to_string),
        error,
        input: raw.get("inputOverride").and_then(DataSummary::from_engine),
        output: raw.get("data").and_then(DataSummary::from_engine),
    }
}

fn infer_status(obj: &Map<String, Value>, has_error: bool, runs: &[NodeRun]) -> ExecutionStatus {
    if has_error || runs.iter().any(|run| !run.success) {
        ExecutionStatus::Error
    } else if obj.get("finished").and_then(Value::as_bool).unwrap_or(false) {
        ExecutionStatus::Success
    } else if obj.get("waitTill").is_some_and(|wait| !wait.is_null()) {
        ExecutionStatus::Waiting
    } else {
        ExecutionStatus::Running
    }
}

fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    raw.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
