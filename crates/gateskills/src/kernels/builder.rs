//! Community packages, credentials, custom node scaffolding and
//! workflow documentation.

use super::{N8N, N8N_DOCKER, NONE};
use crate::kernels::{insight, workflow};
use crate::support::*;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use gatecore::WorkflowGraph;
use gateruntime::{Kernel, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Community package directory inside the engine container
const CONTAINER_NODES_DIR: &str = "/home/node/.n8n/nodes";
const CUSTOM_NODES_DIR: &str = "custom_nodes_dev";
const DOCS_DIR: &str = "workflow_docs";

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$").expect("valid regex")
});
static PACKAGE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z.^~<>=*+-]+$").expect("valid regex"));

const HTTP_TEMPLATE: &str = r#"async execute(this: IExecuteFunctions): Promise<INodeExecutionData[][]> {
    const items = this.getInputData();
    const returnData: INodeExecutionData[] = [];

    for (let i = 0; i < items.length; i++) {
        const url = this.getNodeParameter('url', i) as string;
        const response = await this.helpers.httpRequest({ method: 'GET', url });
        returnData.push({ json: response });
    }
    return [returnData];
}"#;

const TRANSFORM_TEMPLATE: &str = r#"async execute(this: IExecuteFunctions): Promise<INodeExecutionData[][]> {
    const items = this.getInputData();
    return [items.map(item => ({
        json: {
            ...item.json,
            transformed: true,
            processedAt: new Date().toISOString(),
        },
    }))];
}"#;

const FILTER_TEMPLATE: &str = r#"async execute(this: IExecuteFunctions): Promise<INodeExecutionData[][]> {
    const items = this.getInputData();
    const field = this.getNodeParameter('field', 0) as string;
    const value = this.getNodeParameter('value', 0) as string;
    return [items.filter(item => item.json[field] === value)];
}"#;

const TEMPLATES: [(&str, &str); 3] = [
    ("http", HTTP_TEMPLATE),
    ("transform", TRANSFORM_TEMPLATE),
    ("filter", FILTER_TEMPLATE),
];

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::BuilderExpert;
    builder.skill(k, "install_community_node", N8N_DOCKER, "Install a community node package into the engine", |ctx, p| {
        install_community_node(ctx, p).boxed()
    })?;
    builder.skill(k, "uninstall_community_node", N8N_DOCKER, "Remove a community node package", |ctx, p| {
        uninstall_community_node(ctx, p).boxed()
    })?;
    builder.skill(k, "list_installed_nodes", N8N, "Community packages installed in the engine data directory", |ctx, p| {
        list_installed_nodes(ctx, p).boxed()
    })?;
    builder.skill(k, "get_info", NONE, "Engine endpoints, directories and enabled features", |ctx, p| {
        get_info(ctx, p).boxed()
    })?;
    builder.skill(k, "create_credential", N8N, "Store a new credential", |ctx, p| {
        create_credential(ctx, p).boxed()
    })?;
    builder.skill(k, "list_credentials", N8N, "Stored credentials (names and types only)", |ctx, p| {
        list_credentials(ctx, p).boxed()
    })?;
    builder.skill(k, "get_credential_schema", N8N, "Field schema of a credential type", |ctx, p| {
        get_credential_schema(ctx, p).boxed()
    })?;
    builder.skill(k, "scaffold_node", NONE, "Create a TypeScript custom node project", |ctx, p| {
        scaffold_node(ctx, p).boxed()
    })?;
    builder.skill(k, "build_node", NONE, "Install dependencies and compile a scaffolded node", |ctx, p| {
        build_node(ctx, p).boxed()
    })?;
    builder.skill(k, "list_custom_nodes", NONE, "Scaffolded custom node projects", |ctx, p| {
        list_custom_nodes(ctx, p).boxed()
    })?;
    builder.skill(k, "get_node_template", NONE, "Code template for a common node pattern", |ctx, p| {
        get_node_template(ctx, p).boxed()
    })?;
    builder.skill(k, "lint_workflow", N8N, "Check a workflow against structural and naming rules", |ctx, p| {
        lint_workflow(ctx, p).boxed()
    })?;
    builder.skill(k, "generate_docs", N8N, "Write Markdown documentation for a workflow", |ctx, p| {
        generate_docs(ctx, p).boxed()
    })?;
    builder.skill(k, "export_docs", N8N, "Document every workflow and write an index", |ctx, p| {
        export_docs(ctx, p).boxed()
    })?;
    builder.skill(k, "get_dependencies", N8N, "Credentials, sub-workflows and services a workflow depends on", |ctx, p| {
        get_dependencies(ctx, p).boxed()
    })?;
    Ok(())
}

fn package_name(params: &Params) -> Result<String, SkillError> {
    let name = required_str(params, "package_name")?;
    if !PACKAGE_NAME.is_match(&name) {
        return Err(SkillError::invalid(format!("'{}' is not a valid npm package name", name)));
    }
    Ok(name)
}

async fn npm_in_engine(ctx: &SkillContext, args: &[&str]) -> Result<String, SkillError> {
    let container = ctx.config.docker.n8n_container.as_str();
    docker(ctx, &["exec", container, "mkdir", "-p", CONTAINER_NODES_DIR]).await?;
    let mut full = vec!["exec", "-w", CONTAINER_NODES_DIR, container, "npm"];
    full.extend_from_slice(args);
    let output = docker(ctx, &full).await?;
    Ok(tail(&output.stdout, 500))
}

async fn install_community_node(ctx: &SkillContext, params: Params) -> SkillResult {
    let name = package_name(&params)?;
    let spec = match optional_str(&params, "version") {
        Some(version) if PACKAGE_VERSION.is_match(&version) => format!("{}@{}", name, version),
        Some(version) => return Err(SkillError::invalid(format!("'{}' is not a valid version", version))),
        None => name.clone(),
    };
    tracing::info!(package = %spec, container = %ctx.config.docker.n8n_container, "installing community node");
    let output = npm_in_engine(ctx, &["install", &spec, "--save"]).await?;
    Ok(json!({
        "action": "installed",
        "package": name,
        "version": optional_str(&params, "version").unwrap_or_else(|| "latest".to_string()),
        "install_path": CONTAINER_NODES_DIR,
        "output": output,
        "restart_required": true,
        "restart_message": "Restart the engine container to load the new node",
    }))
}

async fn uninstall_community_node(ctx: &SkillContext, params: Params) -> SkillResult {
    let name = package_name(&params)?;
    tracing::info!(package = %name, "uninstalling community node");
    let output = npm_in_engine(ctx, &["uninstall", &name, "--save"]).await?;
    Ok(json!({
        "action": "uninstalled",
        "package": name,
        "output": output,
        "restart_required": true,
    }))
}

async fn list_installed_nodes(ctx: &SkillContext, _params: Params) -> SkillResult {
    let dir = data_dir(ctx, "nodes");
    let manifest = match tokio::fs::read_to_string(dir.join("package.json")).await {
        Ok(text) => serde_json::from_str::<Value>(&text)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(json!({ "packages": [], "install_path": dir.display().to_string(), "message": "No packages installed" }));
        }
        Err(e) => return Err(e.into()),
    };
    let packages: Vec<Value> = manifest
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .map(|(name, version)| json!({ "name": name, "version": version }))
                .collect()
        })
        .unwrap_or_default();
    Ok(json!({
        "count": packages.len(),
        "packages": packages,
        "install_path": dir.display().to_string(),
    }))
}

async fn get_info(ctx: &SkillContext, _params: Params) -> SkillResult {
    let config = &ctx.config;
    let exists = |path: &Path| path.exists();
    Ok(json!({
        "base_url": config.engine.base_url,
        "api_url": config.engine.api_url(),
        "editor_url": config.engine.editor_url,
        "data_dir": config.engine.data_dir.display().to_string(),
        "data_dir_exists": exists(&config.engine.data_dir),
        "custom_nodes_dir": data_dir(ctx, CUSTOM_NODES_DIR).display().to_string(),
        "custom_nodes_dir_exists": exists(&data_dir(ctx, CUSTOM_NODES_DIR)),
        "snapshot_dir": config.snapshot_dir.display().to_string(),
        "n8n_container": config.docker.n8n_container,
        "features": config.features,
    }))
}

async fn create_credential(ctx: &SkillContext, params: Params) -> SkillResult {
    let name = required_str(&params, "name")?;
    let credential_type = required_str(&params, "type")?;
    let data = required_json(&params, "data")?;
    if !data.is_object() {
        return Err(SkillError::invalid("'data' must be an object of credential fields"));
    }
    let created = ctx.engine.create_credential(&name, &credential_type, &data).await?;
    tracing::info!(credential = %name, credential_type = %credential_type, "created credential");
    Ok(json!({ "action": "credential_created", "credential": created }))
}

async fn list_credentials(ctx: &SkillContext, _params: Params) -> SkillResult {
    let credentials = ctx.engine.list_credentials().await?;
    Ok(json!({
        "count": credentials.len(),
        "credentials": credentials,
    }))
}

async fn get_credential_schema(ctx: &SkillContext, params: Params) -> SkillResult {
    let credential_type = required_str(&params, "credential_type")?;
    let schema = ctx.engine.credential_schema(&credential_type).await?;
    Ok(json!({ "credential_type": credential_type, "schema": schema }))
}

/// Class name for a custom node: alphanumerics only.
pub(crate) fn node_class_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn node_source(display_name: &str, class_name: &str, description: &str, category: &str) -> String {
    let display_name = display_name.replace('\'', "\\'");
    let description = description.replace('\'', "\\'");
    format!(
        r#"import {{
    IExecuteFunctions,
    INodeExecutionData,
    INodeType,
    INodeTypeDescription,
}} from 'n8n-workflow';

export class {class} implements INodeType {{
    description: INodeTypeDescription = {{
        displayName: '{display}',
        name: '{lower}',
        group: ['{group}'],
        version: 1,
        description: '{description}',
        defaults: {{
            name: '{display}',
        }},
        inputs: ['main'],
        outputs: ['main'],
        properties: [
            {{
                displayName: 'Input',
                name: 'input',
                type: 'string',
                default: '',
                description: 'Input value to process',
            }},
        ],
    }};

    async execute(this: IExecuteFunctions): Promise<INodeExecutionData[][]> {{
        const items = this.getInputData();
        const returnData: INodeExecutionData[] = [];

        for (let i = 0; i < items.length; i++) {{
            const input = this.getNodeParameter('input', i, '') as string;
            returnData.push({{ json: {{ processed: true, input, timestamp: new Date().toISOString() }} }});
        }}

        return [returnData];
    }}
}}
"#,
        class = class_name,
        display = display_name,
        lower = class_name.to_lowercase(),
        group = category.to_lowercase(),
        description = description,
    )
}

/// Write the node source, `package.json` and `tsconfig.json` under `root`.
pub(crate) async fn write_scaffold(
    root: &Path,
    display_name: &str,
    description: &str,
    category: &str,
) -> Result<(PathBuf, Vec<String>), SkillError> {
    let class_name = node_class_name(display_name);
    if class_name.is_empty() {
        return Err(SkillError::invalid("'node_name' must contain letters or digits"));
    }
    let dir = root.join(&class_name);
    tokio::fs::create_dir_all(&dir).await?;

    let source_file = format!("{}.node.ts", class_name);
    let package = json!({
        "name": format!("n8n-nodes-{}", class_name.to_lowercase()),
        "version": "0.1.0",
        "description": description,
        "main": "dist/index.js",
        "scripts": { "build": "tsc", "dev": "tsc --watch" },
        "n8n": { "nodes": [format!("dist/{}.node.js", class_name)] },
        "devDependencies": { "typescript": "^5.0.0", "n8n-workflow": "^1.0.0" },
    });
    let tsconfig = json!({
        "compilerOptions": {
            "target": "ES2020",
            "module": "commonjs",
            "outDir": "./dist",
            "strict": true,
            "esModuleInterop": true,
            "declaration": true,
        },
        "include": ["*.ts"],
    });

    tokio::fs::write(dir.join(&source_file), node_source(display_name, &class_name, description, category)).await?;
    tokio::fs::write(dir.join("package.json"), serde_json::to_vec_pretty(&package)?).await?;
    tokio::fs::write(dir.join("tsconfig.json"), serde_json::to_vec_pretty(&tsconfig)?).await?;
    Ok((dir, vec![source_file, "package.json".to_string(), "tsconfig.json".to_string()]))
}

async fn scaffold_node(ctx: &SkillContext, params: Params) -> SkillResult {
    let node_name = required_str(&params, "node_name")?;
    let description = optional_str(&params, "description").unwrap_or_else(|| "Custom n8n node".to_string());
    let category = optional_str(&params, "category").unwrap_or_else(|| "transform".to_string());

    let (dir, files) = write_scaffold(&data_dir(ctx, CUSTOM_NODES_DIR), &node_name, &description, &category).await?;
    tracing::info!(node = %node_name, dir = %dir.display(), "scaffolded custom node");
    Ok(json!({
        "action": "scaffolded",
        "node_name": node_name,
        "class_name": node_class_name(&node_name),
        "directory": dir.display().to_string(),
        "files_created": files,
        "next_steps": ["Edit the .node.ts file", "Run build_node", "Copy dist/ into the engine's custom nodes directory"],
    }))
}

async fn npm_stage(ctx: &SkillContext, dir: &Path, stage: &str, args: &[&str]) -> Result<String, SkillError> {
    let mut full = vec!["--prefix".to_string(), dir.display().to_string()];
    full.extend(args.iter().map(|a| a.to_string()));
    match run_checked(ctx, "npm", full).await {
        Ok(output) => Ok(output.stdout),
        Err(SkillError::CommandFailed { exit_code, message }) => Err(SkillError::CommandFailed {
            exit_code,
            message: format!("{}: {}", stage, message),
        }),
        Err(e) => Err(e),
    }
}

async fn build_node(ctx: &SkillContext, params: Params) -> SkillResult {
    let node_name = required_str(&params, "node_name")?;
    let dir = data_dir(ctx, CUSTOM_NODES_DIR).join(node_class_name(&node_name));
    if tokio::fs::metadata(&dir).await.is_err() {
        return Err(SkillError::invalid(format!("no scaffolded node at {}", dir.display())));
    }

    npm_stage(ctx, &dir, "npm install", &["install"]).await?;
    let output = npm_stage(ctx, &dir, "build", &["run", "build"]).await?;

    let mut dist_files = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir.join("dist")).await {
        while let Some(entry) = entries.next_entry().await? {
            dist_files.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    dist_files.sort();
    tracing::info!(node = %node_name, files = dist_files.len(), "built custom node");
    Ok(json!({
        "action": "built",
        "node_name": node_name,
        "build_output": truncate(&output, 300),
        "dist_files": dist_files,
    }))
}

pub(crate) async fn custom_nodes(root: &Path) -> Result<Vec<Value>, SkillError> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut nodes = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        let manifest = tokio::fs::read_to_string(path.join("package.json"))
            .await
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok());
        nodes.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "path": path.display().to_string(),
            "has_package_json": manifest.is_some(),
            "is_built": tokio::fs::metadata(path.join("dist")).await.is_ok(),
            "version": manifest.as_ref().and_then(|m| m.get("version")).cloned(),
            "description": manifest.as_ref().and_then(|m| m.get("description")).cloned(),
        }));
    }
    nodes.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Ok(nodes)
}

async fn list_custom_nodes(ctx: &SkillContext, _params: Params) -> SkillResult {
    let root = data_dir(ctx, CUSTOM_NODES_DIR);
    let nodes = custom_nodes(&root).await?;
    Ok(json!({
        "directory": root.display().to_string(),
        "node_count": nodes.len(),
        "nodes": nodes,
    }))
}

async fn get_node_template(_ctx: &SkillContext, params: Params) -> SkillResult {
    let requested = optional_str(&params, "template_type").unwrap_or_else(|| "http".to_string());
    let (name, template) = TEMPLATES
        .iter()
        .find(|(name, _)| *name == requested)
        .or_else(|| TEMPLATES.iter().find(|(name, _)| *name == "transform"))
        .copied()
        .unwrap_or(TEMPLATES[0]);
    Ok(json!({
        "template_type": name,
        "requested": requested,
        "available_templates": TEMPLATES.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        "template": template,
    }))
}

fn lint_issue(rule: &str, severity: &str, node: Option<&str>, message: String) -> Value {
    json!({ "rule": rule, "severity": severity, "node": node, "message": message })
}

pub(crate) fn lint(graph: &WorkflowGraph) -> Vec<Value> {
    let (errors, warnings) = workflow::structural_findings(graph);
    let mut issues: Vec<Value> = errors
        .into_iter()
        .map(|message| lint_issue("structure", "error", None, message))
        .chain(warnings.into_iter().map(|message| lint_issue("structure", "warning", None, message)))
        .collect();

    for node in graph.nodes.values() {
        let copied = node.id.starts_with("Copy of");
        let numbered = node.id.chars().rev().take(2).any(|c| c.is_ascii_digit());
        if copied || numbered {
            issues.push(lint_issue("naming", "warning", Some(node.id.as_str()), "Consider a descriptive node name".to_string()));
        }
    }
    let handles_errors = graph.nodes.values().any(|n| {
        let kind = n.node_type.to_ascii_lowercase();
        kind.contains("errortrigger") || kind.contains("stopanderror")
    }) || graph.settings.get("errorWorkflow").is_some();
    if !handles_errors && graph.nodes.len() > 3 {
        issues.push(lint_issue("error_handling", "warning", None, "No error handling configured".to_string()));
    }
    if graph.nodes.len() > 30 {
        issues.push(lint_issue(
            "complexity",
            "warning",
            None,
            format!("High node count ({}). Consider sub-workflows", graph.nodes.len()),
        ));
    }
    issues
}

async fn lint_workflow(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let issues = lint(&graph);
    let count = |severity: &str| issues.iter().filter(|i| i["severity"] == severity).count();
    let errors = count("error");
    let warnings = count("warning");
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "passed": errors == 0,
        "total_issues": issues.len(),
        "errors": errors,
        "warnings": warnings,
        "issues": issues,
    }))
}

pub(crate) fn render_docs(graph: &WorkflowGraph, generated_at: DateTime<Utc>) -> String {
    let mut lines = vec![
        format!("# {}", graph.name),
        String::new(),
        format!("**Generated**: {}", generated_at.format("%Y-%m-%d %H:%M")),
        format!("**Workflow ID**: {}", graph.id.as_deref().unwrap_or("-")),
        format!("**Status**: {}", if graph.active { "Active" } else { "Inactive" }),
    ];
    if !graph.tags.is_empty() {
        lines.push(format!("**Tags**: {}", graph.tags.iter().cloned().collect::<Vec<_>>().join(", ")));
    }
    lines.extend([
        String::new(),
        "## Overview".to_string(),
        String::new(),
        format!(
            "This workflow contains **{} nodes** and **{} connections**.",
            graph.nodes.len(),
            graph.connections.len()
        ),
        String::new(),
        "## Nodes".to_string(),
        String::new(),
    ]);
    for node in graph.nodes.values() {
        lines.push(format!("### {}", node.id));
        lines.push(format!("- **Type**: `{}`", node.node_type));
        let outgoing = graph.successors(&node.id);
        if !outgoing.is_empty() {
            lines.push(format!(
                "- **Outputs to**: {}",
                outgoing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
        if node.disabled {
            lines.push("- **Disabled**".to_string());
        }
        lines.push(String::new());
    }
    lines.extend([
        "## Data Flow".to_string(),
        String::new(),
        "```mermaid".to_string(),
        insight::mermaid(graph),
        "```".to_string(),
    ]);
    lines.join("\n")
}

async fn write_docs(ctx: &SkillContext, graph: &WorkflowGraph) -> Result<(PathBuf, String), SkillError> {
    let dir = data_dir(ctx, DOCS_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let content = render_docs(graph, Utc::now());
    let path = dir.join(format!("{}.md", safe_file_name(&graph.name)));
    tokio::fs::write(&path, &content).await?;
    Ok((path, content))
}

async fn generate_docs(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let (path, content) = write_docs(ctx, &graph).await?;
    tracing::info!(%workflow_id, path = %path.display(), "documentation written");
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "doc_path": path.display().to_string(),
        "doc_preview": truncate(&content, 500),
    }))
}

async fn export_docs(ctx: &SkillContext, _params: Params) -> SkillResult {
    let workflows = ctx.engine.list_workflows(None).await?;
    let mut generated = Vec::new();
    let mut failed = Vec::new();
    for graph in &workflows {
        match write_docs(ctx, graph).await {
            Ok((path, _)) => generated.push((graph, path)),
            Err(e) => {
                tracing::warn!(workflow = %graph.name, error = %e, "failed to document workflow");
                failed.push(json!({ "workflow": graph.name, "error": e.to_string() }));
            }
        }
    }

    let mut index = vec![
        "# Workflow Documentation Index".to_string(),
        String::new(),
        format!("Generated: {}", Utc::now().format("%Y-%m-%d %H:%M")),
        String::new(),
        "## Workflows".to_string(),
        String::new(),
    ];
    for (graph, path) in &generated {
        let file = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
        index.push(format!("- [{}]({})", graph.name, file));
    }
    let dir = data_dir(ctx, DOCS_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let index_path = dir.join("INDEX.md");
    tokio::fs::write(&index_path, index.join("\n")).await?;

    Ok(json!({
        "docs_directory": dir.display().to_string(),
        "workflows_documented": generated.len(),
        "failed": failed,
        "index_file": index_path.display().to_string(),
    }))
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?.split(':').next()?;
    (!host.is_empty() && !host.contains("{{")).then(|| host.to_string())
}

pub(crate) fn dependencies(graph: &WorkflowGraph) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
    let mut credentials = BTreeSet::new();
    let mut sub_workflows = BTreeSet::new();
    let mut services = BTreeSet::new();
    for node in graph.nodes.values() {
        for (credential_type, reference) in &node.credentials {
            let label = reference.name.clone().or_else(|| reference.id.clone()).unwrap_or_else(|| "(unbound)".to_string());
            credentials.insert(format!("{}: {}", credential_type, label));
        }
        let kind = node.node_type.to_ascii_lowercase();
        if kind.contains("executeworkflow") {
            // Newer engine versions wrap the id as a resource locator
            let target = node
                .parameter("workflowId.value")
                .or_else(|| node.parameter("workflowId"))
                .and_then(gatecore::id_string);
            if let Some(target) = target {
                sub_workflows.insert(target);
            }
        }
        if kind.contains("http") {
            if let Some(host) = node.parameter("url").and_then(Value::as_str).and_then(host_of) {
                services.insert(host);
            }
        }
    }
    (credentials, sub_workflows, services)
}

async fn get_dependencies(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let graph = ctx.engine.get_workflow(&workflow_id).await?;
    let (credentials, sub_workflows, services) = dependencies(&graph);
    Ok(json!({
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "dependencies": {
            "credentials": credentials,
            "sub_workflows": sub_workflows,
            "external_services": services,
        },
        "total_credentials": credentials.len(),
        "total_external_services": services.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecore::{CredentialRef, NodeSpec};

    #[test]
    fn test_package_names() {
        assert!(PACKAGE_NAME.is_match("n8n-nodes-browserless"));
        assert!(PACKAGE_NAME.is_match("@acme/n8n-nodes-crm"));
        assert!(!PACKAGE_NAME.is_match("pkg; rm -rf /"));
        assert!(!PACKAGE_NAME.is_match("../escape"));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://user:pw@api.example.com:8443/v1?q=1").as_deref(), Some("api.example.com"));
        assert_eq!(host_of("={{ $json.url }}"), None);
        assert_eq!(host_of("https://{{ $json.host }}/x"), None);
    }

    #[test]
    fn test_dependencies() {
        let mut graph = WorkflowGraph::new("Orchestrator");
        graph.add_node(
            NodeSpec::new("Call CRM", "n8n-nodes-base.httpRequest")
                .with_parameter("url", "https://crm.example.com/contacts")
                .with_credential("httpHeaderAuth", CredentialRef::bound("3", "CRM key")),
        );
        graph.add_node(
            NodeSpec::new("Child", "n8n-nodes-base.executeWorkflow")
                .with_parameter("workflowId", json!({ "__rl": true, "value": "wf-9", "mode": "id" })),
        );
        let (credentials, subs, services) = dependencies(&graph);
        assert_eq!(credentials.into_iter().collect::<Vec<_>>(), vec!["httpHeaderAuth: CRM key"]);
        assert_eq!(subs.into_iter().collect::<Vec<_>>(), vec!["wf-9"]);
        assert_eq!(services.into_iter().collect::<Vec<_>>(), vec!["crm.example.com"]);
    }

    #[test]
    fn test_lint_flags_naming_and_missing_error_handling() {
        let mut graph = WorkflowGraph::new("Lintable");
        graph.add_node(NodeSpec::new("Schedule", "n8n-nodes-base.scheduleTrigger"));
        graph.add_node(NodeSpec::new("Set1", "n8n-nodes-base.set"));
        graph.add_node(NodeSpec::new("Copy of Set", "n8n-nodes-base.set"));
        graph.add_node(NodeSpec::new("Notify", "n8n-nodes-base.slack"));
        graph.connect("Schedule", "Set1");
        graph.connect("Set1", "Copy of Set");
        graph.connect("Copy of Set", "Notify");

        let issues = lint(&graph);
        let rules: Vec<&str> = issues.iter().filter_map(|i| i["rule"].as_str()).collect();
        assert_eq!(rules.iter().filter(|r| **r == "naming").count(), 2);
        assert!(rules.contains(&"error_handling"));
        assert!(issues.iter().all(|i| i["severity"] != "error"));
    }

    #[test]
    fn test_render_docs() {
        let mut graph = WorkflowGraph::new("Daily Report").with_id("12");
        graph.add_node(NodeSpec::new("Cron", "n8n-nodes-base.cron"));
        graph.add_node(NodeSpec::new("Email", "n8n-nodes-base.emailSend"));
        graph.connect("Cron", "Email");
        let at = DateTime::parse_from_rfc3339("2024-05-01T08:30:00Z").unwrap().with_timezone(&Utc);

        let doc = render_docs(&graph, at);
        assert!(doc.starts_with("# Daily Report"));
        assert!(doc.contains("**Generated**: 2024-05-01 08:30"));
        assert!(doc.contains("**Workflow ID**: 12"));
        assert!(doc.contains("- **Outputs to**: Email"));
        assert!(doc.contains("Cron --> Email"));
    }

    #[test]
    fn test_node_class_name() {
        assert_eq!(node_class_name("My Cool-Node!"), "MyCoolNode");
        assert_eq!(node_class_name("???"), "");
    }
}
