use crate::registry::{Kernel, SkillContext, SkillRegistry, SkillSummary};
use crate::remediation::Remediator;
use gatecore::{ContainerRunner, EngineClient, GatewayConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Ok,
    Error,
}

/// Structured answer of a kernel invocation. Engine payloads are always
/// reshaped by the skill before they land in `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelReport {
    pub status: ReportStatus,
    pub kernel: String,
    pub skill: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_skills: Vec<String>,
}

impl KernelReport {
    fn ok(kernel: &str, skill: &str, data: Value) -> Self {
        Self {
            status: ReportStatus::Ok,
            kernel: kernel.to_string(),
            skill: skill.to_string(),
            data: Some(data),
            error_class: None,
            message: None,
            available_skills: Vec::new(),
        }
    }

    fn error(kernel: &str, skill: &str, error_class: &str, message: String) -> Self {
        Self {
            status: ReportStatus::Error,
            kernel: kernel.to_string(),
            skill: skill.to_string(),
            data: None,
            error_class: Some(error_class.to_string()),
            message: Some(message),
            available_skills: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReportStatus::Ok
    }
}

/// Main entry point: owns the sealed registry and the collaborators skills run against
pub struct Gateway {
    registry: Arc<SkillRegistry>,
    context: SkillContext,
}

impl Gateway {
    /// Create a gateway with a pre-built registry
    pub fn with_registry(
        registry: Arc<SkillRegistry>,
        engine: Arc<dyn EngineClient>,
        containers: Arc<dyn ContainerRunner>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        let remediator = Arc::new(Remediator::new(engine.clone(), &config));
        Self {
            registry,
            context: SkillContext {
                engine,
                containers,
                config,
                remediator,
            },
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &SkillContext {
        &self.context
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.context.config
    }

    pub fn remediator(&self) -> &Arc<Remediator> {
        &self.context.remediator
    }

    pub fn skills(&self, kernel: Option<Kernel>) -> Vec<SkillSummary> {
        self.registry.list_expert_skills(kernel).map(|entry| entry.summary()).collect()
    }

    /// Cancel in-flight diagnoses and remediations.
    pub fn shutdown(&self) {
        self.context.remediator.shutdown_token().cancel();
    }

    /// Dispatch one skill. Never fails: every outcome is folded into the report.
    pub async fn invoke(&self, kernel: &str, skill: &str, params: Value) -> KernelReport {
        let params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return KernelReport::error(
                    kernel,
                    skill,
                    "InvalidParams",
                    format!("params must be an object, got {}", json_kind(&other)),
                )
            }
        };

        let invocation = match self
            .registry
            .resolve(kernel, skill, params, &self.context.config.features)
        {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::warn!(kernel, skill, error = %e, "kernel dispatch refused");
                let mut report = KernelReport::error(kernel, skill, e.error_class(), e.to_string());
                if let crate::RouterError::UnknownSkill { available, .. } = e {
                    report.available_skills = available;
                }
                return report;
            }
        };

        tracing::info!(kernel, skill, "dispatching skill");
        match invocation.run(&self.context).await {
            Ok(data) => KernelReport::ok(kernel, skill, data),
            Err(e) => {
                tracing::error!(kernel, skill, class = e.error_class(), error = %e, "skill failed");
                KernelReport::error(kernel, skill, e.error_class(), e.to_string())
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
