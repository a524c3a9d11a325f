//! In-memory workflow engine that counts every call it receives.

use async_trait::async_trait;
use gatecore::{
    ClientError, CredentialSummary, EngineClient, ExecutionQuery, ExecutionStatus, WorkflowGraph,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Calls received per engine operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallCounts {
    pub get_workflow: usize,
    pub create_workflow: usize,
    pub update_workflow: usize,
    pub get_execution: usize,
    pub list_workflows: usize,
    pub other: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.get_workflow
            + self.create_workflow
            + self.update_workflow
            + self.get_execution
            + self.list_workflows
            + self.other
    }
}

#[derive(Default)]
struct EngineState {
    workflows: BTreeMap<String, WorkflowGraph>,
    executions: BTreeMap<String, Value>,
    credentials: Vec<CredentialSummary>,
    runs: Vec<(String, Value)>,
    next_id: u64,
    calls: CallCounts,
}

impl EngineState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a workflow. Assigns an id and version 1 when missing.
    pub fn with_workflow(self, mut graph: WorkflowGraph) -> Self {
        {
            let mut state = self.lock();
            let id = match graph.id.clone() {
                Some(id) => id,
                None => state.allocate_id(),
            };
            graph.id = Some(id.clone());
            if graph.version == 0 {
                graph.version = 1;
            }
            state.workflows.insert(id, graph);
        }
        self
    }

    pub fn with_execution(self, raw: Value) -> Self {
        if let Some(id) = raw.get("id").and_then(id_of) {
            self.lock().executions.insert(id, raw);
        }
        self
    }

    pub fn with_credential(self, credential: CredentialSummary) -> Self {
        self.lock().credentials.push(credential);
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    pub fn workflow(&self, id: &str) -> Option<WorkflowGraph> {
        self.lock().workflows.get(id).cloned()
    }

    pub fn workflows(&self) -> Vec<WorkflowGraph> {
        self.lock().workflows.values().cloned().collect()
    }

    /// Workflow runs started through `run_workflow`.
    pub fn runs(&self) -> Vec<(String, Value)> {
        self.lock().runs.clone()
    }

    /// Simulate a concurrent edit made by someone else.
    pub fn touch_workflow(&self, id: &str) {
        if let Some(graph) = self.lock().workflows.get_mut(id) {
            graph.version += 1;
            graph.revision = Some(uuid::Uuid::new_v4().to_string());
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn get_workflow(&self, id_or_name: &str) -> Result<WorkflowGraph, ClientError> {
        let mut state = self.lock();
        state.calls.get_workflow += 1;
        if let Some(graph) = state.workflows.get(id_or_name) {
            return Ok(graph.clone());
        }
        let named: Vec<&WorkflowGraph> = state.workflows.values().filter(|g| g.name == id_or_name).collect();
        match named.as_slice() {
            [graph] => Ok((*graph).clone()),
            _ => Err(ClientError::NotFound(format!("workflow '{}'", id_or_name))),
        }
    }

    async fn create_workflow(&self, graph: &WorkflowGraph) -> Result<WorkflowGraph, ClientError> {
        let mut state = self.lock();
        state.calls.create_workflow += 1;
        let id = state.allocate_id();
        let mut stored = graph.clone();
        stored.id = Some(id.clone());
        stored.version = 1;
        stored.active = false;
        stored.revision = Some(uuid::Uuid::new_v4().to_string());
        state.workflows.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_workflow(
        &self,
        id: &str,
        graph: &WorkflowGraph,
        expected_version: u64,
    ) -> Result<WorkflowGraph, ClientError> {
        let mut state = self.lock();
        state.calls.update_workflow += 1;
        let existing = state
            .workflows
            .get(id)
            .ok_or_else(|| ClientError::NotFound(format!("workflow '{}'", id)))?;
        if existing.version != expected_version {
            return Err(ClientError::Conflict {
                id: id.to_string(),
                expected: expected_version,
                actual: existing.version,
            });
        }
        let mut stored = graph.clone();
        stored.id = Some(id.to_string());
        stored.active = existing.active;
        stored.version = expected_version + 1;
        stored.revision = Some(uuid::Uuid::new_v4().to_string());
        state.workflows.insert(id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.calls.get_execution += 1;
        state
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("execution '{}'", execution_id)))
    }

    async fn list_workflows(&self, tag_filter: Option<&[String]>) -> Result<Vec<WorkflowGraph>, ClientError> {
        let mut state = self.lock();
        state.calls.list_workflows += 1;
        Ok(state
            .workflows
            .values()
            .filter(|graph| match tag_filter {
                Some(tags) if !tags.is_empty() => tags.iter().any(|tag| graph.tags.contains(tag)),
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn set_workflow_active(&self, id: &str, active: bool) -> Result<WorkflowGraph, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        let graph = state
            .workflows
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("workflow '{}'", id)))?;
        graph.active = active;
        Ok(graph.clone())
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        state
            .workflows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("workflow '{}'", id)))
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Value>, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        let mut matching: Vec<Value> = state
            .executions
            .values()
            .filter(|raw| match &query.workflow_id {
                Some(id) => raw.get("workflowId").and_then(id_of).as_deref() == Some(id.as_str()),
                None => true,
            })
            .filter(|raw| match query.status {
                Some(status) => {
                    raw.get("status")
                        .and_then(Value::as_str)
                        .and_then(ExecutionStatus::from_engine)
                        == Some(status)
                }
                None => true,
            })
            .cloned()
            .collect();
        // Newest first, like the engine
        matching.sort_by_key(|raw| {
            std::cmp::Reverse(raw.get("id").and_then(id_of).and_then(|id| id.parse::<u64>().ok()).unwrap_or(0))
        });
        if query.limit > 0 {
            matching.truncate(query.limit);
        }
        if !query.include_data {
            for raw in &mut matching {
                if let Some(obj) = raw.as_object_mut() {
                    obj.remove("data");
                }
            }
        }
        Ok(matching)
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        state
            .executions
            .remove(execution_id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("execution '{}'", execution_id)))
    }

    async fn retry_execution(&self, execution_id: &str) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        if !state.executions.contains_key(execution_id) {
            return Err(ClientError::NotFound(format!("execution '{}'", execution_id)));
        }
        let id = state.allocate_id();
        Ok(json!({"id": id, "retryOf": execution_id, "status": "running"}))
    }

    async fn run_workflow(&self, id: &str, payload: &Value) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        if !state.workflows.contains_key(id) {
            return Err(ClientError::NotFound(format!("workflow '{}'", id)));
        }
        state.runs.push((id.to_string(), payload.clone()));
        let execution_id = state.allocate_id();
        Ok(json!({"executionId": execution_id, "workflowId": id}))
    }

    async fn inject_execution_data(&self, execution_id: &str, node: &str, data: &Value) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        let raw = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| ClientError::NotFound(format!("execution '{}'", execution_id)))?;
        if raw.get("status").and_then(Value::as_str) != Some("waiting") {
            return Err(ClientError::InvalidResponse(format!(
                "execution '{}' is not waiting",
                execution_id
            )));
        }
        raw["status"] = json!("running");
        Ok(json!({"id": execution_id, "resumedAt": node, "data": data}))
    }

    async fn list_tags(&self) -> Result<Vec<String>, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        let mut tags: Vec<String> = state.workflows.values().flat_map(|g| g.tags.iter().cloned()).collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn list_credentials(&self) -> Result<Vec<CredentialSummary>, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        Ok(state.credentials.clone())
    }

    async fn create_credential(
        &self,
        name: &str,
        credential_type: &str,
        _data: &Value,
    ) -> Result<CredentialSummary, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        let credential = CredentialSummary {
            id: state.allocate_id(),
            name: name.to_string(),
            credential_type: credential_type.to_string(),
        };
        state.credentials.push(credential.clone());
        Ok(credential)
    }

    async fn credential_schema(&self, credential_type: &str) -> Result<Value, ClientError> {
        let mut state = self.lock();
        state.calls.other += 1;
        Ok(json!({"type": "object", "credentialType": credential_type, "properties": {}}))
    }
}
