use crate::error::{RouterError, SkillError};
use crate::remediation::Remediator;
use async_trait::async_trait;
use futures::future::BoxFuture;
use gatecore::{Capability, ContainerRunner, EngineClient, FeatureFlags, GatewayConfig};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Coarse tool groupings exposed to the calling agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    WorkflowExpert,
    DebugExpert,
    SurgeryExpert,
    CicdExpert,
    HealingExpert,
    InsightExpert,
    ForecastExpert,
    SecurityExpert,
    BuilderExpert,
    DockerExpert,
}

impl Kernel {
    pub const ALL: [Kernel; 10] = [
        Kernel::WorkflowExpert,
        Kernel::DebugExpert,
        Kernel::SurgeryExpert,
        Kernel::CicdExpert,
        Kernel::HealingExpert,
        Kernel::InsightExpert,
        Kernel::ForecastExpert,
        Kernel::SecurityExpert,
        Kernel::BuilderExpert,
        Kernel::DockerExpert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kernel::WorkflowExpert => "workflow_expert",
            Kernel::DebugExpert => "debug_expert",
            Kernel::SurgeryExpert => "surgery_expert",
            Kernel::CicdExpert => "cicd_expert",
            Kernel::HealingExpert => "healing_expert",
            Kernel::InsightExpert => "insight_expert",
            Kernel::ForecastExpert => "forecast_expert",
            Kernel::SecurityExpert => "security_expert",
            Kernel::BuilderExpert => "builder_expert",
            Kernel::DockerExpert => "docker_expert",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Kernel::WorkflowExpert => "Workflow lifecycle: list, read, deploy, clone, validate, diff",
            Kernel::DebugExpert => "Execution diagnosis and auto-remediation",
            Kernel::SurgeryExpert => "Live execution intervention: trigger, inject, retry, rerun",
            Kernel::CicdExpert => "Snapshots, git sync and workflow testing",
            Kernel::HealingExpert => "Health checks, pruning and self-healing",
            Kernel::InsightExpert => "Impact analysis, diagrams, search and optimisation hints",
            Kernel::ForecastExpert => "Anomaly detection and failure forecasting",
            Kernel::SecurityExpert => "Audits, PII scanning and the kill switch",
            Kernel::BuilderExpert => "Community nodes, credentials, custom node scaffolding and docs",
            Kernel::DockerExpert => "Container inspection, logs and maintenance",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kernel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kernel::ALL
            .into_iter()
            .find(|kernel| kernel.as_str() == s)
            .ok_or_else(|| format!("unknown kernel '{}'", s))
    }
}

/// Everything a skill may talk to
#[derive(Clone)]
pub struct SkillContext {
    pub engine: Arc<dyn EngineClient>,
    pub containers: Arc<dyn ContainerRunner>,
    pub config: Arc<GatewayConfig>,
    pub remediator: Arc<Remediator>,
}

/// A single fine-grained operation
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn call(&self, ctx: &SkillContext, params: Map<String, Value>) -> Result<Value, SkillError>;
}

/// Adapter registering a plain async function as a skill
pub struct FnSkill<F>(pub F);

#[async_trait]
impl<F> SkillHandler for FnSkill<F>
where
    F: for<'a> Fn(&'a SkillContext, Map<String, Value>) -> BoxFuture<'a, Result<Value, SkillError>> + Send + Sync,
{
    async fn call(&self, ctx: &SkillContext, params: Map<String, Value>) -> Result<Value, SkillError> {
        (self.0)(ctx, params).await
    }
}

#[derive(Clone)]
pub struct SkillEntry {
    pub kernel: Kernel,
    pub skill_id: String,
    pub capabilities: Vec<Capability>,
    pub description: String,
    handler: Arc<dyn SkillHandler>,
}

impl SkillEntry {
    pub fn new(
        kernel: Kernel,
        skill_id: impl Into<String>,
        capabilities: &[Capability],
        description: impl Into<String>,
        handler: Arc<dyn SkillHandler>,
    ) -> Self {
        let mut capabilities = capabilities.to_vec();
        capabilities.sort();
        capabilities.dedup();
        Self {
            kernel,
            skill_id: skill_id.into(),
            capabilities,
            description: description.into(),
            handler,
        }
    }

    pub fn summary(&self) -> SkillSummary {
        SkillSummary {
            kernel: self.kernel,
            skill: self.skill_id.clone(),
            capabilities: self.capabilities.clone(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for SkillEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillEntry")
            .field("kernel", &self.kernel)
            .field("skill_id", &self.skill_id)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Serializable view of a registry entry
#[derive(Debug, Clone, Serialize)]
pub struct SkillSummary {
    pub kernel: Kernel,
    pub skill: String,
    pub capabilities: Vec<Capability>,
    pub description: String,
}

/// A resolved, gated invocation ready to run
pub struct Invocation<'r> {
    pub entry: &'r SkillEntry,
    pub params: Map<String, Value>,
}

impl Invocation<'_> {
    pub async fn run(self, ctx: &SkillContext) -> Result<Value, SkillError> {
        self.entry.handler.call(ctx, self.params).await
    }
}

#[derive(Default)]
pub struct SkillRegistryBuilder {
    entries: BTreeMap<(Kernel, String), SkillEntry>,
}

impl SkillRegistryBuilder {
    /// Register a skill. Skill ids are unique across all kernels.
    pub fn register(&mut self, entry: SkillEntry) -> Result<(), RouterError> {
        if self.entries.keys().any(|(_, skill)| skill == &entry.skill_id) {
            return Err(RouterError::DuplicateSkill(entry.skill_id));
        }
        tracing::debug!(kernel = %entry.kernel, skill = %entry.skill_id, "registering skill");
        self.entries.insert((entry.kernel, entry.skill_id.clone()), entry);
        Ok(())
    }

    /// Register an async function as a skill.
    pub fn skill<F>(
        &mut self,
        kernel: Kernel,
        skill_id: &str,
        capabilities: &[Capability],
        description: &str,
        handler: F,
    ) -> Result<(), RouterError>
    where
        F: for<'a> Fn(&'a SkillContext, Map<String, Value>) -> BoxFuture<'a, Result<Value, SkillError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(SkillEntry::new(
            kernel,
            skill_id,
            capabilities,
            description,
            Arc::new(FnSkill(handler)),
        ))
    }

    pub fn build(self) -> SkillRegistry {
        tracing::info!(skills = self.entries.len(), "skill registry sealed");
        SkillRegistry { entries: self.entries }
    }
}

/// Read-only mapping from `(kernel, skill)` to handler, populated once at startup
pub struct SkillRegistry {
    entries: BTreeMap<(Kernel, String), SkillEntry>,
}

impl SkillRegistry {
    pub fn builder() -> SkillRegistryBuilder {
        SkillRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve and gate. No collaborator is touched here.
    pub fn resolve(
        &self,
        kernel: &str,
        skill: &str,
        params: Map<String, Value>,
        features: &FeatureFlags,
    ) -> Result<Invocation<'_>, RouterError> {
        let unknown = |available: Vec<String>| RouterError::UnknownSkill {
            kernel: kernel.to_string(),
            skill: skill.to_string(),
            available,
        };

        let Ok(parsed) = kernel.parse::<Kernel>() else {
            return Err(unknown(Kernel::ALL.iter().map(|k| k.as_str().to_string()).collect()));
        };
        let Some(entry) = self.entries.get(&(parsed, skill.to_string())) else {
            return Err(unknown(
                self.list_expert_skills(Some(parsed)).map(|e| e.skill_id.clone()).collect(),
            ));
        };

        if let Some(missing) = entry.capabilities.iter().find(|cap| !features.enabled(**cap)) {
            return Err(RouterError::CapabilityDisabled {
                skill: entry.skill_id.clone(),
                capability: *missing,
            });
        }

        Ok(Invocation { entry, params })
    }

    /// Lazy, restartable enumeration of entries, optionally for one kernel.
    pub fn list_expert_skills(&self, kernel: Option<Kernel>) -> impl Iterator<Item = &SkillEntry> + Clone + '_ {
        self.entries
            .values()
            .filter(move |entry| kernel.map_or(true, |k| entry.kernel == k))
    }

    /// Skill count per kernel, in kernel order.
    pub fn kernel_sizes(&self) -> Vec<(Kernel, usize)> {
        Kernel::ALL
            .into_iter()
            .map(|kernel| (kernel, self.list_expert_skills(Some(kernel)).count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    async fn echo(_ctx: &SkillContext, params: Map<String, Value>) -> Result<Value, SkillError> {
        Ok(Value::Object(params))
    }

    fn registry() -> SkillRegistry {
        let mut builder = SkillRegistry::builder();
        builder
            .skill(Kernel::WorkflowExpert, "list_workflows", &[Capability::N8n], "List", |ctx, p| echo(ctx, p).boxed())
            .unwrap();
        builder
            .skill(Kernel::DockerExpert, "get_logs", &[Capability::Docker], "Logs", |ctx, p| echo(ctx, p).boxed())
            .unwrap();
        builder
            .skill(Kernel::CicdExpert, "sync_to_git", &[Capability::N8n, Capability::Git], "Sync", |ctx, p| {
                echo(ctx, p).boxed()
            })
            .unwrap();
        builder.build()
    }

    fn flags(n8n: bool, docker: bool, git: bool) -> FeatureFlags {
        FeatureFlags { n8n, docker, git }
    }

    #[test]
    fn test_resolve_known_skill() {
        let registry = registry();
        let invocation = registry
            .resolve("workflow_expert", "list_workflows", Map::new(), &flags(true, false, false))
            .unwrap();
        assert_eq!(invocation.entry.skill_id, "list_workflows");
    }

    #[test]
    fn test_unknown_skill_lists_kernel_skills() {
        let registry = registry();
        let err = registry
            .resolve("docker_expert", "list_workflows", Map::new(), &flags(true, true, true))
            .err()
            .unwrap();
        assert_eq!(err.error_class(), "UnknownSkillError");
        assert!(matches!(err, RouterError::UnknownSkill { ref available, .. } if available == &vec!["get_logs".to_string()]));

        let err = registry.resolve("nope", "x", Map::new(), &flags(true, true, true)).err().unwrap();
        assert!(matches!(err, RouterError::UnknownSkill { ref available, .. } if available.len() == 10));
    }

    #[test]
    fn test_capability_gating() {
        let registry = registry();
        let err = registry
            .resolve("docker_expert", "get_logs", Map::new(), &flags(true, false, true))
            .err()
            .unwrap();
        assert_eq!(
            err,
            RouterError::CapabilityDisabled {
                skill: "get_logs".into(),
                capability: Capability::Docker
            }
        );
        assert!(err.to_string().contains("ENABLE_DOCKER_TOOLS"));

        let err = registry
            .resolve("cicd_expert", "sync_to_git", Map::new(), &flags(true, true, false))
            .err()
            .unwrap();
        assert_eq!(err.error_class(), "CapabilityDisabledError");
    }

    #[test]
    fn test_duplicate_skill_ids_are_rejected_across_kernels() {
        let mut builder = SkillRegistry::builder();
        builder
            .skill(Kernel::DebugExpert, "auto_fix", &[], "Fix", |ctx, p| echo(ctx, p).boxed())
            .unwrap();
        let err = builder
            .skill(Kernel::SurgeryExpert, "auto_fix", &[], "Fix again", |ctx, p| echo(ctx, p).boxed())
            .unwrap_err();
        assert_eq!(err, RouterError::DuplicateSkill("auto_fix".into()));
    }

    #[test]
    fn test_listing_is_restartable() {
        let registry = registry();
        let listing = registry.list_expert_skills(None);
        let first: Vec<_> = listing.clone().map(|e| e.skill_id.clone()).collect();
        let second: Vec<_> = listing.map(|e| e.skill_id.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(registry.list_expert_skills(Some(Kernel::DockerExpert)).count(), 1);
        assert_eq!(json!(registry.kernel_sizes()[0].0), json!("workflow_expert"));
    }
}
