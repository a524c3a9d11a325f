use thiserror::Error;

/// Errors raised by the workflow graph model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Patch conflict on node '{target}': {reason}")]
    PatchConflict { target: String, reason: String },

    #[error("Patch on node '{0}' would not change the workflow")]
    PatchNoEffect(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),
}

impl WorkflowError {
    pub fn parse(message: impl Into<String>) -> Self {
        WorkflowError::Parse(message.into())
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            WorkflowError::Parse(_) => "ParseError",
            WorkflowError::PatchConflict { .. } => "PatchConflictError",
            WorkflowError::PatchNoEffect(_) => "PatchNoEffect",
            WorkflowError::NodeNotFound(_) => "NotFound",
        }
    }
}

/// Errors surfaced by the workflow engine client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Authentication rejected by engine (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on workflow {id}: expected version {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("Upstream call '{operation}' timed out after {after_ms}ms")]
    UpstreamTimeout { operation: String, after_ms: u64 },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid response from engine: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Transient failures are retried at the client boundary; everything else surfaces at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::UpstreamTimeout { .. } | ClientError::UpstreamUnavailable(_)
        )
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            ClientError::Auth { .. } => "AuthError",
            ClientError::NotFound(_) => "NotFound",
            ClientError::Conflict { .. } => "PatchConflictError",
            ClientError::UpstreamTimeout { .. } => "UpstreamTimeout",
            ClientError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            ClientError::InvalidResponse(_) => "UpstreamUnavailable",
        }
    }
}

/// The command collaborator could not run a command at all.
///
/// A command that ran and exited non-zero is not an error; see `CommandOutput`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("Command '{program}' timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("I/O error while running '{program}': {message}")]
    Io { program: String, message: String },
}

impl CommandError {
    pub fn error_class(&self) -> &'static str {
        match self {
            CommandError::Timeout { .. } => "UpstreamTimeout",
            CommandError::Spawn { .. } | CommandError::Io { .. } => "UpstreamUnavailable",
        }
    }
}

/// Configuration could not be assembled at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
