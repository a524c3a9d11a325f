//! Skill catalogue, one module per kernel.

pub mod builder;
pub mod cicd;
pub mod containers;
pub mod debug;
pub mod forecast;
pub mod healing;
pub mod insight;
pub mod security;
pub mod surgery;
pub mod workflow;

use gatecore::Capability;

pub(crate) const N8N: &[Capability] = &[Capability::N8n];
pub(crate) const DOCKER: &[Capability] = &[Capability::Docker];
pub(crate) const N8N_DOCKER: &[Capability] = &[Capability::N8n, Capability::Docker];
pub(crate) const N8N_GIT: &[Capability] = &[Capability::N8n, Capability::Git];
/// Local-only skills that never call a collaborator
pub(crate) const NONE: &[Capability] = &[];
