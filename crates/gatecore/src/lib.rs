//! Core model for the n8n control-plane gateway
//!
//! Workflow graphs, execution records, patches and the collaborator traits
//! the rest of the gateway is written against. Nothing in here performs I/O.

pub mod client;
pub mod config;
pub mod diff;
mod error;
pub mod execution;
pub mod patch;
pub mod report;
pub mod workflow;

pub use client::{CommandOutput, ContainerRunner, CredentialSummary, EngineClient, ExecutionQuery};
pub use config::{Capability, FeatureFlags, GatewayConfig};
pub use diff::{apply_changes, diff, invert, structurally_eq, GraphChange};
pub use error::{ClientError, CommandError, ConfigError, WorkflowError};
pub use execution::{DataSummary, ExecutionRecord, ExecutionStatus, NodeRun, RunError};
pub use patch::{apply_patch, ErrorClass, Patch, PatchOperation};
pub use report::{FailureReport, FailureSignals};
pub use workflow::{id_string, Connection, CredentialRef, NodeId, NodeSpec, Position, WorkflowGraph, WorkflowId};

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
