//! Snapshots, git sync and test runs for workflows.

use super::{N8N, N8N_GIT};
use crate::support::*;
use chrono::Utc;
use futures::FutureExt;
use gatecore::{diff, ClientError, ExecutionQuery, ExecutionStatus, GraphChange, WorkflowGraph};
use gateruntime::{deploy, Kernel, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::CicdExpert;
    builder.skill(k, "create_workflow_snapshot", N8N, "Save a versioned JSON snapshot of a workflow", |ctx, p| {
        create_workflow_snapshot(ctx, p).boxed()
    })?;
    builder.skill(k, "list_snapshots", N8N, "List saved workflow snapshots", |ctx, p| {
        list_snapshots(ctx, p).boxed()
    })?;
    builder.skill(k, "restore_snapshot", N8N, "Recreate a workflow from a snapshot", |ctx, p| {
        restore_snapshot(ctx, p).boxed()
    })?;
    builder.skill(k, "sync_to_git", N8N_GIT, "Export every workflow into a git repository and commit", |ctx, p| {
        sync_to_git(ctx, p).boxed()
    })?;
    builder.skill(k, "import_from_git", N8N_GIT, "Deploy a workflow file from the git repository", |ctx, p| {
        import_from_git(ctx, p).boxed()
    })?;
    builder.skill(k, "unit_test", N8N, "Run a workflow with a payload and compare its output", |ctx, p| {
        unit_test(ctx, p).boxed()
    })?;
    builder.skill(k, "shadow_test", N8N, "Replay recent inputs against a shadow copy of a workflow", |ctx, p| {
        shadow_test(ctx, p).boxed()
    })?;
    builder.skill(k, "compare_versions", N8N, "Diff a workflow against one of its snapshots", |ctx, p| {
        compare_versions(ctx, p).boxed()
    })?;
    Ok(())
}

fn export_json(graph: &WorkflowGraph) -> Value {
    let mut body = graph.to_engine_json();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".into(), json!(graph.id));
        obj.insert("active".into(), json!(graph.active));
        obj.insert("tags".into(), json!(graph.tags));
    }
    body
}

async fn read_json(path: &Path) -> Result<Value, SkillError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SkillError::Client(ClientError::NotFound(format!("file '{}'", path.display())))
        } else {
            SkillError::from(e)
        }
    })?;
    Ok(serde_json::from_str(&text)?)
}

async fn load_snapshot(ctx: &SkillContext, params: &Params) -> Result<(String, WorkflowGraph), SkillError> {
    let filename = plain_file_name(params, "snapshot_filename")?;
    let snapshot = read_json(&ctx.config.snapshot_dir.join(&filename)).await?;
    let workflow = snapshot
        .get("workflow")
        .ok_or_else(|| SkillError::Failed(format!("snapshot '{}' holds no workflow", filename)))?;
    Ok((filename, WorkflowGraph::load(workflow)?))
}

async fn create_workflow_snapshot(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let description = optional_str(&params, "description").unwrap_or_else(|| "Manual snapshot".to_string());
    let graph = ctx.engine.get_workflow(&workflow_id).await?;

    let now = Utc::now();
    let filename = format!(
        "{}_{}_{}.json",
        safe_file_name(&graph.name),
        safe_file_name(&workflow_id),
        now.format("%Y%m%d_%H%M%S")
    );
    let snapshot = json!({
        "snapshot_metadata": {
            "created_at": now.to_rfc3339(),
            "description": description,
            "workflow_id": workflow_id,
            "workflow_name": graph.name,
            "version": graph.version,
        },
        "workflow": export_json(&graph),
    });

    tokio::fs::create_dir_all(&ctx.config.snapshot_dir).await?;
    let path = ctx.config.snapshot_dir.join(&filename);
    tokio::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?).await?;
    tracing::info!(%workflow_id, file = %filename, "snapshot created");

    Ok(json!({
        "action": "snapshot_created",
        "workflow_id": workflow_id,
        "workflow_name": graph.name,
        "snapshot_file": filename,
        "snapshot_path": path.display().to_string(),
        "created_at": now.to_rfc3339(),
    }))
}

async fn list_snapshots(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = optional_str(&params, "workflow_id");
    let dir = &ctx.config.snapshot_dir;
    let mut snapshots = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => Some(entries),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    if let Some(entries) = entries.as_mut() {
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().to_string();
            if !filename.ends_with(".json") {
                continue;
            }
            let Ok(data) = read_json(&entry.path()).await else {
                tracing::debug!(file = %filename, "skipping unreadable snapshot");
                continue;
            };
            let meta = data.get("snapshot_metadata").cloned().unwrap_or(Value::Null);
            let snapshot_workflow = meta.get("workflow_id").and_then(gatecore::id_string);
            if workflow_id.is_some() && snapshot_workflow != workflow_id {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            snapshots.push(json!({
                "filename": filename,
                "workflow_id": snapshot_workflow,
                "workflow_name": meta.get("workflow_name"),
                "created_at": meta.get("created_at"),
                "description": meta.get("description"),
                "size_bytes": size,
            }));
        }
    }

    // Newest first; rfc3339 strings order chronologically
    snapshots.sort_by(|a, b| {
        let key = |v: &Value| v.get("created_at").and_then(Value::as_str).unwrap_or("").to_string();
        key(b).cmp(&key(a))
    });
    Ok(json!({
        "count": snapshots.len(),
        "snapshot_directory": dir.display().to_string(),
        "snapshots": snapshots,
    }))
}

async fn restore_snapshot(ctx: &SkillContext, params: Params) -> SkillResult {
    let (filename, mut graph) = load_snapshot(ctx, &params).await?;
    if let Some(name) = optional_str(&params, "new_name") {
        graph.name = name;
    }
    graph.id = None;
    graph.active = false;
    graph.version = 0;
    graph.revision = None;

    let created = ctx.engine.create_workflow(&graph).await?;
    tracing::info!(file = %filename, id = created.id.as_deref().unwrap_or("-"), "restored snapshot");
    Ok(json!({
        "action": "restored",
        "new_workflow_id": created.id,
        "workflow_name": created.name,
        "restored_from": filename,
        "node_count": created.nodes.len(),
    }))
}

fn repo_dir(ctx: &SkillContext, params: &Params) -> PathBuf {
    optional_str(params, "repo_path")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir(ctx, "workflow_repo"))
}

fn git_args(repo: &Path, args: &[&str]) -> Vec<String> {
    let mut all = vec!["-C".to_string(), repo.display().to_string()];
    all.extend(args.iter().map(|a| a.to_string()));
    all
}

async fn sync_to_git(ctx: &SkillContext, params: Params) -> SkillResult {
    let repo = repo_dir(ctx, &params);
    let workflows_dir = repo.join("workflows");
    tokio::fs::create_dir_all(&workflows_dir).await?;

    if tokio::fs::metadata(repo.join(".git")).await.is_err() {
        run_checked(ctx, "git", git_args(&repo, &["init"])).await?;
        tracing::info!(repo = %repo.display(), "initialized git repository");
    }

    let workflows = ctx.engine.list_workflows(None).await?;
    let synced_at = Utc::now().to_rfc3339();
    let mut files = Vec::new();
    for listed in &workflows {
        let Some(id) = listed.id.as_deref() else { continue };
        let graph = ctx.engine.get_workflow(id).await?;
        let filename = format!("{}_{}.json", safe_file_name(&graph.name), safe_file_name(id));
        let mut body = export_json(&graph);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("synced_at".into(), json!(synced_at));
        }
        tokio::fs::write(workflows_dir.join(&filename), serde_json::to_vec_pretty(&body)?).await?;
        files.push(filename);
    }

    run_checked(ctx, "git", git_args(&repo, &["add", "."])).await?;
    let message = optional_str(&params, "commit_message").unwrap_or_else(|| {
        format!("Sync {} workflows - {}", files.len(), Utc::now().format("%Y-%m-%d %H:%M"))
    });
    // Nothing to commit exits non-zero
    let commit = ctx
        .containers
        .run("git", &git_args(&repo, &["commit", "-m", &message]))
        .await?;
    let committed = commit.success();
    tracing::info!(exported = files.len(), committed, "synced workflows to git");

    Ok(json!({
        "action": "synced",
        "repository_path": repo.display().to_string(),
        "workflows_exported": files.len(),
        "files": files,
        "git_status": if committed { "committed" } else { "no_changes" },
        "commit_message": if committed { Some(message) } else { None },
    }))
}

async fn import_from_git(ctx: &SkillContext, params: Params) -> SkillResult {
    let filename = plain_file_name(&params, "filename")?;
    let activate = bool_or(&params, "activate", false)?;
    let path = repo_dir(ctx, &params).join("workflows").join(&filename);

    let mut graph = WorkflowGraph::load(&read_json(&path).await?)?;
    graph.id = None;
    graph.active = false;
    graph.version = 0;
    graph.revision = None;

    let deployment = deploy(ctx.engine.as_ref(), &graph).await?;
    let mut workflow = deployment.workflow;
    if activate {
        if let Some(id) = workflow.id.clone() {
            workflow = ctx.engine.set_workflow_active(&id, true).await?;
        }
    }
    tracing::info!(file = %filename, action = ?deployment.action, "imported workflow from git");
    Ok(json!({
        "action": deployment.action,
        "workflow_id": workflow.id,
        "workflow_name": workflow.name,
        "imported_from": filename,
        "activated": workflow.active,
    }))
}

/// Output items of the node that ran last.
fn final_output(raw: &Value) -> Option<Value> {
    let node = raw
        .pointer("/data/resultData/lastNodeExecuted")
        .and_then(Value::as_str)?;
    run_output(raw, node).map(Value::Array)
}

fn output_matches(output: Option<&Value>, expected: &Value) -> bool {
    match (output, expected) {
        (Some(actual), Value::Array(_)) => actual == expected,
        (Some(Value::Array(items)), single) => items.len() == 1 && &items[0] == single,
        _ => false,
    }
}

async fn unit_test(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let payload = required_json(&params, "test_payload")?;
    let expected = json_param(&params, "expected_output")?;
    let timeout = Duration::from_secs(u64_or(&params, "timeout_seconds", 30)?);

    let started = Instant::now();
    let result = ctx.engine.run_workflow(&workflow_id, &payload).await?;
    let execution_id = result
        .get("executionId")
        .or_else(|| result.get("id"))
        .and_then(gatecore::id_string)
        .ok_or_else(|| SkillError::Failed("engine returned no execution id".into()))?;

    let finished = loop {
        match ctx.engine.get_execution(&execution_id).await {
            Ok(raw) => {
                let status = raw.get("status").and_then(Value::as_str).and_then(ExecutionStatus::from_engine);
                if matches!(status, Some(ExecutionStatus::Success | ExecutionStatus::Error | ExecutionStatus::Crashed)) {
                    break Some(raw);
                }
            }
            // Not persisted yet
            Err(ClientError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if started.elapsed() >= timeout {
            break None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    let Some(raw) = finished else {
        return Ok(json!({
            "result": "timeout",
            "execution_id": execution_id,
            "message": format!("execution did not complete within {} seconds", timeout.as_secs()),
        }));
    };

    let output = final_output(&raw);
    let passed = expected.as_ref().map(|e| output_matches(output.as_ref(), e));
    Ok(json!({
        "result": if passed == Some(false) { "failed" } else { "passed" },
        "execution_id": execution_id,
        "execution_status": raw.get("status"),
        "execution_time_ms": started.elapsed().as_millis() as u64,
        "input": payload,
        "output": output,
        "expected_output": expected,
        "test_passed": passed,
    }))
}

async fn shadow_test(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let test_count = u64_or(&params, "test_count", 5)? as usize;
    let cleanup = bool_or(&params, "cleanup", false)?;

    let original = ctx.engine.get_workflow(&workflow_id).await?;
    let mut shadow = original.clone();
    shadow.id = None;
    shadow.name = format!("[SHADOW] {}", original.name);
    shadow.active = false;
    shadow.version = 0;
    shadow.revision = None;
    let shadow = ctx.engine.create_workflow(&shadow).await?;
    let shadow_id = shadow
        .id
        .clone()
        .ok_or_else(|| SkillError::Failed("engine returned a workflow without an id".into()))?;

    let query = ExecutionQuery::recent(test_count)
        .for_workflow(workflow_id.clone())
        .with_status(ExecutionStatus::Success)
        .with_data();
    let executions = ctx.engine.list_executions(&query).await?;
    let entry = original.entry_nodes().first().map(|id| id.to_string());

    let mut results = Vec::new();
    for raw in &executions {
        let execution = raw.get("id").and_then(gatecore::id_string);
        let input = entry
            .as_deref()
            .and_then(|node| run_output(raw, node))
            .map(Value::Array)
            .unwrap_or_else(|| json!({}));
        match ctx.engine.run_workflow(&shadow_id, &input).await {
            Ok(run) => results.push(json!({
                "original_execution": execution,
                "shadow_execution": run.get("executionId").or_else(|| run.get("id")),
                "status": "triggered",
            })),
            Err(e) => results.push(json!({
                "original_execution": execution,
                "status": "error",
                "error": e.to_string(),
            })),
        }
    }

    if cleanup {
        ctx.engine.delete_workflow(&shadow_id).await?;
    }
    tracing::info!(%workflow_id, %shadow_id, replayed = results.len(), "shadow test complete");
    Ok(json!({
        "original_workflow_id": workflow_id,
        "shadow_workflow_id": shadow_id,
        "shadow_workflow_name": shadow.name,
        "shadow_deleted": cleanup,
        "tests_run": results.len(),
        "results": results,
    }))
}

async fn compare_versions(ctx: &SkillContext, params: Params) -> SkillResult {
    let workflow_id = required_str(&params, "workflow_id")?;
    let (filename, snapshot) = load_snapshot(ctx, &params).await?;
    let current = ctx.engine.get_workflow(&workflow_id).await?;

    let changes = diff(&snapshot, &current);
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut connections_changed = false;
    for change in &changes {
        match change {
            GraphChange::NodeAdded { node } => added.push(node.id.clone()),
            GraphChange::NodeRemoved { node } => removed.push(node.id.clone()),
            GraphChange::NodeModified { id, .. } => modified.push(id.clone()),
            GraphChange::ConnectionAdded { .. } | GraphChange::ConnectionRemoved { .. } => connections_changed = true,
        }
    }

    Ok(json!({
        "workflow_id": workflow_id,
        "snapshot_file": filename,
        "changes_detected": !changes.is_empty(),
        "diff": {
            "nodes_added": added,
            "nodes_removed": removed,
            "nodes_modified": modified,
            "connections_changed": connections_changed,
        },
        "summary": changes.iter().map(|c| c.describe()).collect::<Vec<_>>(),
        "current_node_count": current.nodes.len(),
        "snapshot_node_count": snapshot.nodes.len(),
    }))
}
