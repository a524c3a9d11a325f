use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gatecore::{diff, GatewayConfig, WorkflowGraph};
use gateruntime::{Gateway, Kernel, KernelReport, MemoryEngine, SkillRegistry};
use gateskills::{DockerCli, N8nClient};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gate")]
#[command(about = "n8n control-plane gateway CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered skills
    Skills {
        /// Only this kernel, e.g. docker_expert
        #[arg(short, long)]
        kernel: Option<String>,
    },

    /// Invoke one skill of a kernel against the live engine
    Invoke {
        kernel: String,
        skill: String,

        /// Parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },

    /// Diagnose a failed execution
    Diagnose { execution_id: String },

    /// Diagnose and patch a failed execution
    AutoFix {
        execution_id: String,

        /// Rationale hash of a previously proposed patch, or "decline"
        #[arg(short, long)]
        confirm: Option<String>,

        /// Stop after simulation, never touch the live workflow
        #[arg(long)]
        shadow: bool,
    },

    /// Validate a workflow export offline
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Structural diff of two workflow exports
    Diff { before: PathBuf, after: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Skills { kernel } => list_skills(kernel.as_deref())?,
        Commands::Invoke { kernel, skill, params } => {
            let params = match params {
                Some(text) => serde_json::from_str(&text).context("--params must be valid JSON")?,
                None => Value::Null,
            };
            let report = live_gateway()?.invoke(&kernel, &skill, params).await;
            print_report(&report)?;
        }
        Commands::Diagnose { execution_id } => {
            let report = live_gateway()?
                .invoke("debug_expert", "diagnose_execution", json!({ "execution_id": execution_id }))
                .await;
            print_report(&report)?;
        }
        Commands::AutoFix { execution_id, confirm, shadow } => {
            let report = if shadow {
                live_gateway()?
                    .invoke("debug_expert", "shadow_simulate", json!({ "execution_id": execution_id }))
                    .await
            } else {
                live_gateway()?
                    .invoke(
                        "debug_expert",
                        "auto_fix",
                        json!({ "execution_id": execution_id, "confirmation_token": confirm }),
                    )
                    .await
            };
            print_report(&report)?;
        }
        Commands::Validate { file } => validate_workflow(&file).await?,
        Commands::Diff { before, after } => diff_workflows(&before, &after)?,
    }

    Ok(())
}

fn registry() -> Result<Arc<SkillRegistry>> {
    Ok(Arc::new(gateskills::registry()?))
}

/// Gateway wired to the engine and docker host named by the environment
fn live_gateway() -> Result<Gateway> {
    let config = Arc::new(GatewayConfig::from_env()?);
    let engine = Arc::new(N8nClient::new(&config.engine)?);
    let runner = Arc::new(DockerCli::new(&config.docker));
    Ok(Gateway::with_registry(registry()?, engine, runner, config))
}

fn print_report(report: &KernelReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if !report.is_ok() {
        bail!(
            "{}: {}",
            report.error_class.as_deref().unwrap_or("Error"),
            report.message.as_deref().unwrap_or("skill failed")
        );
    }
    Ok(())
}

fn list_skills(kernel: Option<&str>) -> Result<()> {
    let kernel = match kernel {
        Some(name) => Some(name.parse::<Kernel>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let registry = registry()?;

    for (current, count) in registry.kernel_sizes() {
        if kernel.is_some_and(|k| k != current) {
            continue;
        }
        println!("{} ({} skills) - {}", current, count, current.description());
        for entry in registry.list_expert_skills(Some(current)) {
            let caps: Vec<&str> = entry.capabilities.iter().map(|c| c.as_str()).collect();
            if caps.is_empty() {
                println!("  {:<28} {}", entry.skill_id, entry.description);
            } else {
                println!("  {:<28} {} [{}]", entry.skill_id, entry.description, caps.join(", "));
            }
        }
    }
    Ok(())
}

fn read_workflow(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Runs the validate skill against an in-memory engine; no engine or API key needed
async fn validate_workflow(path: &Path) -> Result<()> {
    let raw = read_workflow(path)?;
    let mut config = GatewayConfig::default();
    config.features.docker = false;
    let gateway = Gateway::with_registry(
        registry()?,
        Arc::new(MemoryEngine::new()),
        Arc::new(DockerCli::new(&config.docker)),
        Arc::new(config),
    );

    let report = gateway
        .invoke("workflow_expert", "validate_workflow", json!({ "workflow": raw }))
        .await;
    print_report(&report)?;
    if report.data.as_ref().and_then(|d| d.get("valid")) == Some(&Value::Bool(false)) {
        bail!("{} is not a valid workflow", path.display());
    }
    Ok(())
}

fn diff_workflows(before: &Path, after: &Path) -> Result<()> {
    let before = WorkflowGraph::load(&read_workflow(before)?)?;
    let after = WorkflowGraph::load(&read_workflow(after)?)?;
    let changes = diff(&before, &after);

    if changes.is_empty() {
        println!("No structural changes between '{}' and '{}'", before.name, after.name);
        return Ok(());
    }
    println!("{} change(s) from '{}' to '{}':", changes.len(), before.name, after.name);
    for change in &changes {
        println!("  {}", change.describe());
    }
    Ok(())
}
