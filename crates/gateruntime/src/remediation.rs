//! Diagnose → simulate → (await confirmation | apply | reject).
//!
//! Nothing remote is mutated before the `Applied` transition, and the graph is
//! re-fetched right before mutating so concurrent edits surface as rejections.

use crate::error::RemediationError;
use crate::parser::ExecutionParser;
use crate::patcher::PatchGenerator;
use gatecore::{
    apply_patch, diff, ClientError, EngineClient, ExecutionRecord, FailureReport, GatewayConfig, GraphChange, Patch,
    WorkflowError, WorkflowGraph,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    Diagnosing,
    Simulated,
    AwaitingConfirmation,
    Applied,
    Rejected,
}

/// Caller's stance on applying a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    /// Apply low-risk patches, stop for confirmation otherwise
    Auto,
    /// Re-invocation carrying the rationale hash of the patch to apply
    Confirm(String),
    Decline,
}

impl Approval {
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if token.eq_ignore_ascii_case("decline") => Approval::Decline,
            Some(token) if !token.is_empty() => Approval::Confirm(token),
            _ => Approval::Auto,
        }
    }
}

/// Everything a diagnosis produced
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub record: ExecutionRecord,
    /// Live workflow graph, when it could be fetched
    pub graph: Option<WorkflowGraph>,
    pub report: Option<FailureReport>,
    pub patch: Option<Patch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub execution_id: Option<String>,
    pub workflow_id: Option<String>,
    pub state: RemediationState,
    pub report: Option<FailureReport>,
    pub patch: Option<Patch>,
    /// Preview diff while simulated, the applied diff once applied
    pub changes: Vec<GraphChange>,
    pub confirmation_token: Option<String>,
    pub workflow_version: Option<u64>,
    pub reason: Option<String>,
}

impl RemediationOutcome {
    fn new(execution_id: Option<String>, workflow_id: Option<String>) -> Self {
        Self {
            execution_id,
            workflow_id,
            state: RemediationState::Diagnosing,
            report: None,
            patch: None,
            changes: Vec::new(),
            confirmation_token: None,
            workflow_version: None,
            reason: None,
        }
    }

    fn transition(&mut self, state: RemediationState, reason: Option<String>) {
        tracing::info!(
            execution_id = self.execution_id.as_deref().unwrap_or("-"),
            workflow_id = self.workflow_id.as_deref().unwrap_or("-"),
            from = ?self.state,
            to = ?state,
            reason = reason.as_deref().unwrap_or(""),
            "remediation state transition"
        );
        self.state = state;
        if reason.is_some() {
            self.reason = reason;
        }
    }
}

pub struct Remediator {
    engine: Arc<dyn EngineClient>,
    parser: ExecutionParser,
    generator: PatchGenerator,
    risk_threshold: f64,
    shutdown: CancellationToken,
}

impl Remediator {
    pub fn new(engine: Arc<dyn EngineClient>, config: &GatewayConfig) -> Self {
        Self {
            engine,
            parser: ExecutionParser::new(&config.diagnosis),
            generator: PatchGenerator::new(&config.remediation),
            risk_threshold: config.remediation.risk_threshold,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn parser(&self) -> &ExecutionParser {
        &self.parser
    }

    pub fn generator(&self) -> &PatchGenerator {
        &self.generator
    }

    pub fn risk_threshold(&self) -> f64 {
        self.risk_threshold
    }

    /// Token cancelled on shutdown; in-flight diagnoses observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn needs_confirmation(&self, patch: &Patch) -> bool {
        patch.requires_confirmation || patch.risk_score >= self.risk_threshold
    }

    pub async fn diagnose(&self, execution_id: &str) -> Result<Diagnosis, RemediationError> {
        self.diagnose_until(execution_id, &self.shutdown.child_token()).await
    }

    /// Fetch, parse, classify and generate at most one patch.
    pub async fn diagnose_until(
        &self,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Diagnosis, RemediationError> {
        let raw = guarded(cancel, self.engine.get_execution(execution_id)).await?;
        let record = ExecutionRecord::from_engine(&raw)?;

        let graph = match &record.workflow_id {
            Some(workflow_id) => match guarded(cancel, self.engine.get_workflow(workflow_id)).await {
                Ok(graph) => Some(graph),
                Err(RemediationError::Client(ClientError::NotFound(_))) => {
                    tracing::warn!(%workflow_id, "workflow of execution no longer exists");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let report = self.parser.parse_record(&record, graph.as_ref());
        let patch = match (&report, &graph) {
            (Some(report), Some(graph)) => Some(self.generator.generate(graph, report)),
            _ => None,
        };

        if let Some(report) = &report {
            tracing::info!(
                execution_id,
                failing_node = %report.failing_node_id,
                class = %report.error_class,
                shifted = report.shifted(),
                "diagnosed execution"
            );
        }

        Ok(Diagnosis {
            record,
            graph,
            report,
            patch,
        })
    }

    /// Diagnose and preview the patch without touching remote state.
    pub async fn shadow_simulate(&self, execution_id: &str) -> Result<RemediationOutcome, RemediationError> {
        let cancel = self.shutdown.child_token();
        let diagnosis = self.diagnose_until(execution_id, &cancel).await?;
        let mut outcome = RemediationOutcome::new(Some(execution_id.to_string()), diagnosis.record.workflow_id.clone());
        self.simulate(&mut outcome, diagnosis.graph.as_ref(), diagnosis.report, diagnosis.patch);
        Ok(outcome)
    }

    pub async fn auto_fix(&self, execution_id: &str, approval: Approval) -> Result<RemediationOutcome, RemediationError> {
        self.auto_fix_until(execution_id, approval, &self.shutdown.child_token()).await
    }

    /// Full chain in one call. Low-risk patches are applied; anything at or
    /// above the risk threshold stops for confirmation.
    pub async fn auto_fix_until(
        &self,
        execution_id: &str,
        approval: Approval,
        cancel: &CancellationToken,
    ) -> Result<RemediationOutcome, RemediationError> {
        let diagnosis = self.diagnose_until(execution_id, cancel).await?;
        let mut outcome = RemediationOutcome::new(Some(execution_id.to_string()), diagnosis.record.workflow_id.clone());

        if diagnosis.report.is_some() && diagnosis.graph.is_none() {
            return Err(RemediationError::MissingWorkflow(execution_id.to_string()));
        }
        let graph = diagnosis.graph;
        self.simulate(&mut outcome, graph.as_ref(), diagnosis.report, diagnosis.patch);

        match (graph, outcome.patch.clone()) {
            (Some(graph), Some(patch)) if !patch.is_empty() && !outcome.changes.is_empty() => {
                self.decide(outcome, &graph, patch, approval, cancel).await
            }
            _ => Ok(outcome),
        }
    }

    /// Apply a caller-supplied patch to a workflow, under the same confirmation rules.
    pub async fn apply_manual_patch(
        &self,
        workflow_id: &str,
        patch: Patch,
        approval: Approval,
    ) -> Result<RemediationOutcome, RemediationError> {
        let cancel = self.shutdown.child_token();
        let graph = guarded(&cancel, self.engine.get_workflow(workflow_id)).await?;
        let mut outcome = RemediationOutcome::new(None, graph.id.clone());
        self.simulate(&mut outcome, Some(&graph), None, Some(patch.clone()));
        if patch.is_empty() || outcome.changes.is_empty() {
            return Ok(outcome);
        }
        self.decide(outcome, &graph, patch, approval, &cancel).await
    }

    fn simulate(
        &self,
        outcome: &mut RemediationOutcome,
        graph: Option<&WorkflowGraph>,
        report: Option<FailureReport>,
        patch: Option<Patch>,
    ) {
        let reason = match (&report, &patch, graph) {
            (None, None, _) if outcome.execution_id.is_some() => Some("execution did not fail".to_string()),
            (_, Some(patch), _) if patch.is_empty() => Some(patch.rationale.clone()),
            (_, Some(patch), Some(graph)) => match apply_patch(graph, patch) {
                Ok(next) => {
                    outcome.changes = diff(graph, &next);
                    None
                }
                Err(e) => Some(e.to_string()),
            },
            _ => None,
        };
        outcome.report = report;
        outcome.patch = patch;
        outcome.transition(RemediationState::Simulated, reason);
    }

    async fn decide(
        &self,
        mut outcome: RemediationOutcome,
        graph: &WorkflowGraph,
        patch: Patch,
        approval: Approval,
        cancel: &CancellationToken,
    ) -> Result<RemediationOutcome, RemediationError> {
        let token = patch.rationale_hash();
        match approval {
            Approval::Decline => {
                outcome.transition(RemediationState::Rejected, Some("declined by caller".into()));
                Ok(outcome)
            }
            Approval::Confirm(given) if given != token => {
                outcome.transition(
                    RemediationState::Rejected,
                    Some("confirmation token does not match the current patch".into()),
                );
                Ok(outcome)
            }
            Approval::Auto if self.needs_confirmation(&patch) => {
                outcome.confirmation_token = Some(token);
                outcome.transition(
                    RemediationState::AwaitingConfirmation,
                    Some(format!(
                        "risk {:.2} (threshold {:.2}) requires explicit confirmation",
                        patch.risk_score, self.risk_threshold
                    )),
                );
                Ok(outcome)
            }
            Approval::Auto | Approval::Confirm(_) => self.apply(outcome, graph, patch, cancel).await,
        }
    }

    async fn apply(
        &self,
        mut outcome: RemediationOutcome,
        graph: &WorkflowGraph,
        mut patch: Patch,
        cancel: &CancellationToken,
    ) -> Result<RemediationOutcome, RemediationError> {
        let workflow_id = graph
            .id
            .clone()
            .ok_or_else(|| RemediationError::MissingWorkflow(outcome.execution_id.clone().unwrap_or_default()))?;

        let fresh = guarded(cancel, self.engine.get_workflow(&workflow_id)).await?;
        if fresh.version != graph.version || fresh.revision != graph.revision {
            tracing::warn!(
                %workflow_id,
                diagnosed = graph.version,
                current = fresh.version,
                "workflow changed since diagnosis"
            );
            outcome.transition(
                RemediationState::Rejected,
                Some(format!(
                    "workflow moved from version {} to {} since diagnosis",
                    graph.version, fresh.version
                )),
            );
            return Ok(outcome);
        }

        let next = match apply_patch(&fresh, &patch) {
            Ok(next) => next,
            Err(e @ WorkflowError::PatchConflict { .. }) | Err(e @ WorkflowError::PatchNoEffect(_)) => {
                outcome.transition(RemediationState::Rejected, Some(e.to_string()));
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        // Last point at which cancellation is honoured
        if cancel.is_cancelled() {
            return Err(RemediationError::Cancelled);
        }

        let stored = match self.engine.update_workflow(&workflow_id, &next, fresh.version).await {
            Ok(stored) => stored,
            Err(e @ ClientError::Conflict { .. }) => {
                tracing::warn!(%workflow_id, error = %e, "optimistic concurrency check failed");
                outcome.transition(RemediationState::Rejected, Some(e.to_string()));
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        let changes = diff(&fresh, &next);
        for change in &changes {
            tracing::info!(target: "audit", %workflow_id, change = %change.describe(), "workflow changed");
        }

        patch.simulated = false;
        outcome.patch = Some(patch);
        outcome.changes = changes;
        outcome.workflow_version = Some(stored.version);
        outcome.transition(RemediationState::Applied, None);
        Ok(outcome)
    }
}

async fn guarded<T, F>(cancel: &CancellationToken, call: F) -> Result<T, RemediationError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RemediationError::Cancelled),
        result = call => result.map_err(RemediationError::from),
    }
}
