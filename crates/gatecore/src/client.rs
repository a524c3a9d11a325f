//! Collaborator seams: the workflow engine API and host command execution.

use crate::execution::ExecutionStatus;
use crate::workflow::WorkflowGraph;
use crate::{ClientError, CommandError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter for execution listings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionQuery {
    pub workflow_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: usize,
    pub include_data: bool,
}

impl ExecutionQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn for_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_data(mut self) -> Self {
        self.include_data = true;
        self
    }
}

/// Stored credential, without its secret data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub credential_type: String,
}

/// Workflow engine REST client.
///
/// Implementations retry transient failures themselves; callers only ever
/// see the final outcome.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Fetch by id, falling back to an exact name match.
    async fn get_workflow(&self, id_or_name: &str) -> Result<WorkflowGraph, ClientError>;

    async fn create_workflow(&self, graph: &WorkflowGraph) -> Result<WorkflowGraph, ClientError>;

    /// Replace a workflow. Fails with `Conflict` when the remote version is
    /// no longer `expected_version`.
    async fn update_workflow(
        &self,
        id: &str,
        graph: &WorkflowGraph,
        expected_version: u64,
    ) -> Result<WorkflowGraph, ClientError>;

    async fn get_execution(&self, execution_id: &str) -> Result<Value, ClientError>;

    async fn list_workflows(&self, tag_filter: Option<&[String]>) -> Result<Vec<WorkflowGraph>, ClientError>;

    async fn set_workflow_active(&self, id: &str, active: bool) -> Result<WorkflowGraph, ClientError>;

    async fn delete_workflow(&self, id: &str) -> Result<(), ClientError>;

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Value>, ClientError>;

    async fn delete_execution(&self, execution_id: &str) -> Result<(), ClientError>;

    async fn retry_execution(&self, execution_id: &str) -> Result<Value, ClientError>;

    /// Start a workflow run with an input payload.
    async fn run_workflow(&self, id: &str, payload: &Value) -> Result<Value, ClientError>;

    /// Resume a waiting execution with data for the given node.
    async fn inject_execution_data(&self, execution_id: &str, node: &str, data: &Value) -> Result<Value, ClientError>;

    async fn list_tags(&self) -> Result<Vec<String>, ClientError>;

    async fn list_credentials(&self) -> Result<Vec<CredentialSummary>, ClientError>;

    async fn create_credential(
        &self,
        name: &str,
        credential_type: &str,
        data: &Value,
    ) -> Result<CredentialSummary, ClientError>;

    async fn credential_schema(&self, credential_type: &str) -> Result<Value, ClientError>;
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr when present, stdout otherwise.
    pub fn failure_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Opaque host command execution (docker, git, npm).
///
/// A non-zero exit is reported through `CommandOutput`, never as an error.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError>;
}
