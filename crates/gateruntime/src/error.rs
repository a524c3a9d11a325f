use gatecore::{Capability, ClientError, CommandError, WorkflowError};
use thiserror::Error;

/// Kernel dispatch failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("Unknown skill '{skill}' for kernel '{kernel}'")]
    UnknownSkill {
        kernel: String,
        skill: String,
        available: Vec<String>,
    },

    #[error("Skill '{skill}' requires the '{capability}' capability; enable it with {}=true", .capability.env_flag())]
    CapabilityDisabled { skill: String, capability: Capability },

    #[error("Skill '{0}' is already registered")]
    DuplicateSkill(String),
}

impl RouterError {
    pub fn error_class(&self) -> &'static str {
        match self {
            RouterError::UnknownSkill { .. } => "UnknownSkillError",
            RouterError::CapabilityDisabled { .. } => "CapabilityDisabledError",
            RouterError::DuplicateSkill(_) => "DuplicateSkill",
        }
    }
}

#[derive(Error, Debug)]
pub enum RemediationError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Execution {0} is not linked to a workflow that can be remediated")]
    MissingWorkflow(String),

    #[error("Remediation cancelled before any change was applied")]
    Cancelled,
}

impl RemediationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            RemediationError::Client(e) => e.error_class(),
            RemediationError::Workflow(e) => e.error_class(),
            RemediationError::MissingWorkflow(_) => "NotFound",
            RemediationError::Cancelled => "Cancelled",
        }
    }
}

#[derive(Error, Debug)]
pub enum UpsertError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Workflow name '{name}' is shared by {} remote workflows ({})", .ids.len(), .ids.join(", "))]
    NameCollision { name: String, ids: Vec<String> },
}

impl UpsertError {
    pub fn error_class(&self) -> &'static str {
        match self {
            UpsertError::Client(e) => e.error_class(),
            UpsertError::NameCollision { .. } => "NameCollision",
        }
    }
}

/// Failure of a single skill invocation
#[derive(Error, Debug)]
pub enum SkillError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Remediation(#[from] RemediationError),

    #[error(transparent)]
    Upsert(#[from] UpsertError),

    #[error("Command exited with status {exit_code}: {message}")]
    CommandFailed { exit_code: i32, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Failed(String),
}

impl SkillError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SkillError::InvalidParams(message.into())
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            SkillError::InvalidParams(_) => "InvalidParams",
            SkillError::Client(e) => e.error_class(),
            SkillError::Workflow(e) => e.error_class(),
            SkillError::Command(e) => e.error_class(),
            SkillError::Remediation(e) => e.error_class(),
            SkillError::Upsert(e) => e.error_class(),
            SkillError::CommandFailed { .. } => "CommandFailed",
            SkillError::Io(_) => "IoError",
            SkillError::Failed(_) => "SkillFailed",
        }
    }
}

impl From<std::io::Error> for SkillError {
    fn from(err: std::io::Error) -> Self {
        SkillError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SkillError {
    fn from(err: serde_json::Error) -> Self {
        SkillError::Failed(format!("JSON error: {}", err))
    }
}
