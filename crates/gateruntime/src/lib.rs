//! Diagnosis, remediation and kernel dispatch
//!
//! This crate turns raw execution records into classified failure reports,
//! proposes and applies patches under optimistic concurrency, and routes
//! kernel invocations to the registered skills.

mod classifier;
mod error;
pub mod memory;
mod parser;
mod patcher;
mod registry;
mod remediation;
mod runtime;
mod upsert;

pub use classifier::Classifier;
pub use error::{RemediationError, RouterError, SkillError, UpsertError};
pub use memory::{CallCounts, MemoryEngine};
pub use parser::{ExecutionParser, CONTEXT_SNIPPET_LIMIT, MAX_UPSTREAM_HOPS};
pub use patcher::{type_mismatch_risk, PatchGenerator, CREDENTIAL_RISK, RATE_LIMIT_RISK, TIMEOUT_RISK};
pub use registry::{FnSkill, Invocation, Kernel, SkillContext, SkillEntry, SkillHandler, SkillRegistry, SkillRegistryBuilder, SkillSummary};
pub use remediation::{Approval, Diagnosis, RemediationOutcome, RemediationState, Remediator};
pub use runtime::{Gateway, KernelReport, ReportStatus};
pub use upsert::{deploy, Deployment, UpsertAction};
