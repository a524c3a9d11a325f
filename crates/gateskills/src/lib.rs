//! Skill catalogue and host adapters
//!
//! The ten kernels' skills, plus the production collaborators they run
//! against: the n8n REST client and the host command runner.

mod docker;
mod http;
pub mod kernels;
mod support;

pub use docker::DockerCli;
pub use http::N8nClient;
pub use support::{Params, SkillResult};

use gateruntime::{RouterError, SkillRegistry, SkillRegistryBuilder};

/// Register every kernel's skills with a builder
pub fn register_all(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    kernels::workflow::register(builder)?;
    kernels::debug::register(builder)?;
    kernels::surgery::register(builder)?;
    kernels::cicd::register(builder)?;
    kernels::healing::register(builder)?;
    kernels::insight::register(builder)?;
    kernels::forecast::register(builder)?;
    kernels::security::register(builder)?;
    kernels::builder::register(builder)?;
    kernels::containers::register(builder)?;
    Ok(())
}

/// The full catalogue in a fresh registry
pub fn registry() -> Result<SkillRegistry, RouterError> {
    let mut builder = SkillRegistry::builder();
    register_all(&mut builder)?;
    Ok(builder.build())
}
