//! Container diagnostics and maintenance through the docker CLI.

use super::DOCKER;
use crate::support::*;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use gateruntime::{Kernel, RouterError, SkillContext, SkillError, SkillRegistryBuilder};
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;

const MIB: f64 = 1024.0 * 1024.0;
const ERROR_INDICATORS: [&str; 9] = [
    "err", "fatal", "critical", "exception", "failed", "failure", "denied", "refused", "timeout",
];
const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];
const HELPER_IMAGE: &str = "alpine:3";

static CONTAINER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex"));
static HOST_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.-]*$").expect("valid regex"));
static LOG_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S*\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?\S*\s*").expect("valid regex"));
static UUID_OR_HEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b|\b[0-9a-f]{12,}\b")
        .expect("valid regex")
});
static SQL_WRITE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"\b(insert|update|delete|merge|upsert|drop|alter|truncate|create|grant|revoke|copy|call|lock|vacuum|reindex)\b",
    )
    .case_insensitive(true)
    .build()
    .expect("valid regex")
});
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static SECRET_ENV: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(password|passwd|secret|token|api_?key|private_?key)")
        .case_insensitive(true)
        .build()
        .expect("valid regex")
});

/// Known failure signature in container logs
pub(crate) struct LogPattern {
    pub name: &'static str,
    pub severity: &'static str,
    pub recommendation: &'static str,
    regex: Regex,
}

static LOG_PATTERNS: LazyLock<Vec<LogPattern>> = LazyLock::new(|| {
    [
        ("connection_refused", r"connection refused|econnrefused", "high",
            "Service dependency not reachable. Check that the target service is running and the network is configured."),
        ("permission_denied", r"permission denied|eacces|access denied", "high",
            "File or directory permission issue. Check volume mounts and file ownership."),
        ("out_of_memory", r"out of memory|\boom(killed)?\b|\bkilled\b|cannot allocate memory", "critical",
            "Container ran out of memory. Raise the memory limit or reduce memory usage."),
        ("port_in_use", r"address already in use|eaddrinuse|port.*already.*allocated", "high",
            "Port conflict. Change the port mapping or stop the conflicting process."),
        ("database_connection", r"database.*connection|enotfound.*postgres|mysql.*denied|mongodb.*failed", "high",
            "Database connection failed. Verify database credentials, host and port."),
        ("api_error", r"\b(401|403)\b|unauthorized|forbidden|invalid.*token|authentication.*failed", "medium",
            "API authentication error. Check API keys, tokens or credentials."),
        ("timeout", r"timeout|etimedout|timed out|context deadline exceeded", "medium",
            "Operation timed out. Check network connectivity or raise timeout limits."),
        ("file_not_found", r"no such file|enoent|not found|module not found", "medium",
            "Missing file or module. Check volume mounts, paths and dependencies."),
        ("syntax_error", r"syntax ?error|parse error|unexpected token", "high",
            "Code syntax error. Review recent code changes."),
        ("configuration_error", r"invalid.*config|configuration.*error|env.*not.*set|missing.*environment", "medium",
            "Configuration or environment variable issue. Check the .env file and compose file."),
        ("ssl_certificate", r"\bssl\b|certificate|x509|\btls\b|self-signed", "medium",
            "TLS certificate issue. Check certificate validity."),
        ("dns_resolution", r"getaddrinfo|eai_again|\bdns\b|name resolution|could not resolve", "medium",
            "DNS resolution failed. Check network configuration and container DNS settings."),
        ("crash_restart", r"exited with code|fatal|panic|segfault|core dumped", "critical",
            "Container crashed. Check application logs for the root cause before restarting."),
    ]
    .into_iter()
    .map(|(name, pattern, severity, recommendation)| LogPattern {
        name,
        severity,
        recommendation,
        regex: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("valid log pattern"),
    })
    .collect()
});

pub fn register(builder: &mut SkillRegistryBuilder) -> Result<(), RouterError> {
    let k = Kernel::DockerExpert;
    builder.skill(k, "list_containers", DOCKER, "Containers with status, image and ports", |ctx, p| {
        list_containers(ctx, p).boxed()
    })?;
    builder.skill(k, "get_logs", DOCKER, "Recent logs of a container", |ctx, p| get_logs(ctx, p).boxed())?;
    builder.skill(k, "diagnose_container_errors", DOCKER, "Classify errors in a container's logs", |ctx, p| {
        diagnose_container_errors(ctx, p).boxed()
    })?;
    builder.skill(k, "get_stats", DOCKER, "CPU, memory, network and block I/O of a container", |ctx, p| {
        get_stats(ctx, p).boxed()
    })?;
    builder.skill(k, "restart_container", DOCKER, "Restart a container", |ctx, p| {
        restart_container(ctx, p).boxed()
    })?;
    builder.skill(k, "analyze_all_errors", DOCKER, "Consolidated error report across all containers", |ctx, p| {
        analyze_all_errors(ctx, p).boxed()
    })?;
    builder.skill(k, "inspect_container", DOCKER, "Configuration, state, mounts and networks of a container", |ctx, p| {
        inspect_container(ctx, p).boxed()
    })?;
    builder.skill(k, "list_files", DOCKER, "List a directory inside a container", |ctx, p| {
        list_files(ctx, p).boxed()
    })?;
    builder.skill(k, "read_file", DOCKER, "Read the head of a file inside a container", |ctx, p| {
        read_file(ctx, p).boxed()
    })?;
    builder.skill(k, "run_command", DOCKER, "Run a shell command inside a container", |ctx, p| {
        run_command(ctx, p).boxed()
    })?;
    builder.skill(k, "run_sql", DOCKER, "Run a SQL statement through a database container's client", |ctx, p| {
        run_sql(ctx, p).boxed()
    })?;
    builder.skill(k, "prune_images", DOCKER, "Remove dangling images (dry run by default)", |ctx, p| {
        prune_images(ctx, p).boxed()
    })?;
    builder.skill(k, "check_connectivity", DOCKER, "Test TCP reachability from inside a container", |ctx, p| {
        check_connectivity(ctx, p).boxed()
    })?;
    builder.skill(k, "inspect_dns", DOCKER, "Resolver configuration and lookups inside a container", |ctx, p| {
        inspect_dns(ctx, p).boxed()
    })?;
    builder.skill(k, "audit_freshness", DOCKER, "Local images older than a given age", |ctx, p| {
        audit_freshness(ctx, p).boxed()
    })?;
    builder.skill(k, "backup_volume", DOCKER, "Archive a volume to a tarball on the host", |ctx, p| {
        backup_volume(ctx, p).boxed()
    })?;
    builder.skill(k, "restore_volume", DOCKER, "Replace a volume's content from a host tarball", |ctx, p| {
        restore_volume(ctx, p).boxed()
    })?;
    builder.skill(k, "grep_logs", DOCKER, "Search the logs of every running container", |ctx, p| {
        grep_logs(ctx, p).boxed()
    })?;
    builder.skill(k, "scan_security", DOCKER, "Flag risky container configuration", |ctx, p| {
        scan_security(ctx, p).boxed()
    })?;
    builder.skill(k, "recommend_limits", DOCKER, "Suggest memory and CPU limits from current usage", |ctx, p| {
        recommend_limits(ctx, p).boxed()
    })?;
    builder.skill(k, "create_container_snapshot", DOCKER, "Commit a container's filesystem to an image", |ctx, p| {
        create_container_snapshot(ctx, p).boxed()
    })?;
    builder.skill(k, "check_port", DOCKER, "Whether a host port is free or published by a container", |ctx, p| {
        check_port(ctx, p).boxed()
    })?;
    builder.skill(k, "summarize_log_patterns", DOCKER, "Most frequent log line shapes of a container", |ctx, p| {
        summarize_log_patterns(ctx, p).boxed()
    })?;
    Ok(())
}

/// Container named in the params, or the engine container.
fn container_param(ctx: &SkillContext, params: &Params) -> Result<String, SkillError> {
    let name = optional_str(params, "container_name").unwrap_or_else(|| ctx.config.docker.n8n_container.clone());
    if !CONTAINER_NAME.is_match(&name) {
        return Err(SkillError::invalid(format!("'{}' is not a valid container name", name)));
    }
    Ok(name)
}

fn host_param(params: &Params, key: &str) -> Result<String, SkillError> {
    let host = required_str(params, key)?;
    if !HOST_NAME.is_match(&host) {
        return Err(SkillError::invalid(format!("'{}' is not a valid host name", host)));
    }
    Ok(host)
}

fn severity_rank(severity: &str) -> usize {
    SEVERITIES.iter().position(|s| *s == severity).unwrap_or(0)
}

/// Error lines of a log, matched against the known signatures.
pub(crate) fn analyze_log_errors(logs: &str) -> Vec<Value> {
    let mut detected = Vec::new();
    for (index, line) in logs.lines().enumerate() {
        let lower = line.to_lowercase();
        if line.trim().is_empty() || !ERROR_INDICATORS.iter().any(|i| lower.contains(i)) {
            continue;
        }
        let entry = match LOG_PATTERNS.iter().find(|p| p.regex.is_match(line)) {
            Some(pattern) => json!({
                "line_number": index + 1,
                "error_type": pattern.name,
                "severity": pattern.severity,
                "log_line": truncate(line.trim(), 200),
                "recommendation": pattern.recommendation,
            }),
            None => json!({
                "line_number": index + 1,
                "error_type": "generic_error",
                "severity": "low",
                "log_line": truncate(line.trim(), 200),
                "recommendation": "Review this error line for more context.",
            }),
        };
        detected.push(entry);
    }
    detected
}

async fn inspect(ctx: &SkillContext, container: &str) -> Result<Value, SkillError> {
    let output = docker(ctx, &["inspect", container]).await?;
    let parsed: Value = serde_json::from_str(&output.stdout)?;
    parsed
        .as_array()
        .and_then(|items| items.first())
        .cloned()
        .ok_or_else(|| SkillError::Failed(format!("docker inspect returned nothing for '{}'", container)))
}

/// Container logs; docker writes the container's stderr to its own stderr.
async fn logs(ctx: &SkillContext, container: &str, tail: u64, since_minutes: Option<u64>, timestamps: bool) -> Result<String, SkillError> {
    let mut args = vec!["logs".to_string(), "--tail".to_string(), tail.to_string()];
    if let Some(minutes) = since_minutes.filter(|m| *m > 0) {
        args.push("--since".to_string());
        args.push(format!("{}m", minutes));
    }
    if timestamps {
        args.push("--timestamps".to_string());
    }
    args.push(container.to_string());
    let output = run_checked(ctx, &ctx.config.docker.binary, args).await?;
    Ok(match (output.stdout.is_empty(), output.stderr.is_empty()) {
        (false, false) => format!("{}\n{}", output.stdout.trim_end(), output.stderr),
        (true, _) => output.stderr,
        (_, true) => output.stdout,
    })
}

async fn ps(ctx: &SkillContext, all: bool, extra: &[&str]) -> Result<Vec<Value>, SkillError> {
    let mut args = vec!["ps", "--no-trunc", "--format", "{{json .}}"];
    if all {
        args.push("-a");
    }
    args.extend_from_slice(extra);
    Ok(json_lines(&docker(ctx, &args).await?.stdout))
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn short_id(id: &str) -> String {
    id.trim_start_matches("sha256:").chars().take(12).collect()
}

fn with_severity<'a>(errors: &'a [Value], severity: &str) -> Vec<&'a Value> {
    errors.iter().filter(|e| e["severity"] == severity).collect()
}

async fn list_containers(ctx: &SkillContext, params: Params) -> SkillResult {
    let all = bool_or(&params, "all_containers", false)?;
    let filter = optional_str(&params, "filter_status").map(|s| format!("status={}", s));
    let extra: Vec<&str> = match &filter {
        Some(f) => vec!["--filter", f.as_str()],
        None => Vec::new(),
    };
    let rows = ps(ctx, all || filter.is_some(), &extra).await?;
    let containers: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "id": short_id(str_field(row, "ID")),
                "name": str_field(row, "Names"),
                "image": str_field(row, "Image"),
                "state": str_field(row, "State"),
                "status": str_field(row, "Status"),
                "ports": str_field(row, "Ports")
                    .split(", ")
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>(),
                "created": str_field(row, "CreatedAt"),
            })
        })
        .collect();
    tracing::info!(count = containers.len(), "listed containers");
    Ok(json!({ "count": containers.len(), "containers": containers }))
}

async fn get_logs(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let tail_lines = u64_or(&params, "tail", 100)?;
    let since = match params.get("since_minutes") {
        Some(_) => Some(u64_or(&params, "since_minutes", 0)?),
        None => None,
    };
    let timestamps = bool_or(&params, "show_timestamps", true)?;
    let text = logs(ctx, &container, tail_lines, since, timestamps).await?;
    Ok(json!({
        "container": container,
        "log_lines": text.lines().count(),
        "logs": text,
    }))
}

fn state_summary(inspected: &Value) -> Value {
    let state = inspected.get("State").cloned().unwrap_or(Value::Null);
    json!({
        "name": str_field(inspected, "Name").trim_start_matches('/'),
        "id": short_id(str_field(inspected, "Id")),
        "image": inspected.pointer("/Config/Image"),
        "status": state.get("Status"),
        "restart_count": inspected.get("RestartCount").and_then(Value::as_u64).unwrap_or(0),
        "exit_code": state.get("ExitCode").and_then(Value::as_i64),
        "oom_killed": state.get("OOMKilled").and_then(Value::as_bool).unwrap_or(false),
    })
}

async fn diagnose_container_errors(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let tail_lines = u64_or(&params, "tail", 200)?;
    let since = u64_or(&params, "since_minutes", 30)?;

    let info = state_summary(&inspect(ctx, &container).await?);
    let text = logs(ctx, &container, tail_lines, Some(since), true).await?;
    let detected = analyze_log_errors(&text);
    let critical = with_severity(&detected, "critical");
    let high = with_severity(&detected, "high");
    let medium = with_severity(&detected, "medium");
    let low = with_severity(&detected, "low");

    let exit_code = info["exit_code"].as_i64().unwrap_or(0);
    let status = info["status"].as_str().unwrap_or("unknown");
    let priority_issue = if info["oom_killed"] == true {
        Some("Container was killed for running out of memory. Raise its memory limit.".to_string())
    } else if exit_code != 0 {
        Some(format!("Container exited with error code {}.", exit_code))
    } else if let Some(first) = critical.first().or_else(|| high.first()) {
        first["recommendation"].as_str().map(str::to_string)
    } else if status != "running" {
        Some(format!("Container is not running (status: {}).", status))
    } else {
        None
    };
    tracing::info!(%container, errors = detected.len(), critical = critical.len(), "container diagnosis");

    Ok(json!({
        "container": info,
        "analysis": {
            "total_errors_found": detected.len(),
            "critical": critical.len(),
            "high": high.len(),
            "medium": medium.len(),
            "low": low.len(),
        },
        "priority_issue": priority_issue,
        "errors": {
            "critical": critical.iter().take(5).collect::<Vec<_>>(),
            "high": high.iter().take(5).collect::<Vec<_>>(),
            "medium": medium.iter().take(3).collect::<Vec<_>>(),
            "low": low.iter().take(2).collect::<Vec<_>>(),
        },
        "raw_log_sample": tail(&text, 2000),
    }))
}

/// Parse a docker size such as `45.2MiB` or `1.5kB` into bytes.
pub(crate) fn parse_size(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let factor = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "KiB" => 1024.0,
        "MB" => 1e6,
        "MiB" => MIB,
        "GB" => 1e9,
        "GiB" => 1024.0 * MIB,
        "TB" => 1e12,
        "TiB" => 1024.0 * 1024.0 * MIB,
        _ => return None,
    };
    Some(number * factor)
}

fn parse_percent(text: &str) -> Option<f64> {
    text.trim().trim_end_matches('%').parse().ok()
}

/// `used / limit` pairs as printed by `docker stats`.
fn parse_pair(text: &str) -> (Option<f64>, Option<f64>) {
    match text.split_once('/') {
        Some((a, b)) => (parse_size(a), parse_size(b)),
        None => (parse_size(text), None),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

struct Usage {
    cpu_percent: f64,
    memory_bytes: f64,
    memory_limit_bytes: Option<f64>,
    raw: Value,
}

async fn usage(ctx: &SkillContext, container: &str) -> Result<Usage, SkillError> {
    let output = docker(ctx, &["stats", "--no-stream", "--format", "{{json .}}", container]).await?;
    let raw = json_lines(&output.stdout)
        .into_iter()
        .next()
        .ok_or_else(|| SkillError::Failed(format!("no stats returned for '{}'", container)))?;
    let (memory, limit) = parse_pair(str_field(&raw, "MemUsage"));
    Ok(Usage {
        cpu_percent: parse_percent(str_field(&raw, "CPUPerc")).unwrap_or(0.0),
        memory_bytes: memory.unwrap_or(0.0),
        memory_limit_bytes: limit,
        raw,
    })
}

async fn get_stats(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let inspected = inspect(ctx, &container).await?;
    let status = inspected.pointer("/State/Status").and_then(Value::as_str).unwrap_or("unknown");
    if status != "running" {
        return Ok(json!({
            "container": container,
            "container_status": status,
            "message": format!("Container '{}' is not running", container),
        }));
    }

    let usage = usage(ctx, &container).await?;
    let (rx, tx) = parse_pair(str_field(&usage.raw, "NetIO"));
    let (read, write) = parse_pair(str_field(&usage.raw, "BlockIO"));
    let mb = |bytes: Option<f64>| bytes.map(|b| round2(b / MIB));
    tracing::debug!(%container, cpu = usage.cpu_percent, "container stats");
    Ok(json!({
        "container": container,
        "timestamp": Utc::now().to_rfc3339(),
        "cpu": { "percent": usage.cpu_percent },
        "memory": {
            "usage_mb": round2(usage.memory_bytes / MIB),
            "limit_mb": mb(usage.memory_limit_bytes),
            "percent": parse_percent(str_field(&usage.raw, "MemPerc")),
        },
        "network": { "rx_mb": mb(rx), "tx_mb": mb(tx) },
        "block_io": { "read_mb": mb(read), "write_mb": mb(write) },
        "pids": str_field(&usage.raw, "PIDs").parse::<u64>().ok(),
    }))
}

async fn restart_container(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let timeout = u64_or(&params, "timeout", 10)?.to_string();
    let before = inspect(ctx, &container).await?;
    docker(ctx, &["restart", "-t", &timeout, &container]).await?;
    let after = inspect(ctx, &container).await?;
    tracing::info!(%container, "container restarted");
    Ok(json!({
        "action": "restart",
        "container": container,
        "previous_status": before.pointer("/State/Status"),
        "current_status": after.pointer("/State/Status"),
    }))
}

/// Issues visible from `docker inspect` alone.
pub(crate) fn state_issues(inspected: &Value) -> Vec<Value> {
    let mut issues = Vec::new();
    let status = inspected.pointer("/State/Status").and_then(Value::as_str).unwrap_or("unknown");
    let exit_code = inspected.pointer("/State/ExitCode").and_then(Value::as_i64).unwrap_or(0);
    if status != "running" {
        let message = if exit_code != 0 {
            format!("Container is {} (exit code: {})", status, exit_code)
        } else {
            format!("Container is {}", status)
        };
        issues.push(json!({
            "type": "container_not_running",
            "severity": if exit_code != 0 { "high" } else { "medium" },
            "message": message,
            "recommendation": "Check container logs and restart if needed.",
        }));
    }
    if inspected.pointer("/State/OOMKilled").and_then(Value::as_bool).unwrap_or(false) {
        issues.push(json!({
            "type": "oom_killed",
            "severity": "critical",
            "message": "Container was killed for running out of memory",
            "recommendation": "Raise the container memory limit.",
        }));
    }
    let restarts = inspected.get("RestartCount").and_then(Value::as_u64).unwrap_or(0);
    if restarts > 5 {
        issues.push(json!({
            "type": "restart_loop",
            "severity": "high",
            "message": format!("Container has restarted {} times", restarts),
            "recommendation": "Container may be in a crash loop. Check application errors.",
        }));
    }
    issues
}

async fn analyze_all_errors(ctx: &SkillContext, params: Params) -> SkillResult {
    let include_healthy = bool_or(&params, "include_healthy", false)?;
    let tail_lines = u64_or(&params, "tail_per_container", 100)?;

    let names: Vec<String> = ps(ctx, true, &[])
        .await?
        .iter()
        .map(|row| str_field(row, "Names").to_string())
        .filter(|name| !name.is_empty())
        .collect();

    let mut with_issues = Vec::new();
    let mut healthy = Vec::new();
    for name in &names {
        let inspected = match inspect(ctx, name).await {
            Ok(inspected) => inspected,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "inspect failed");
                continue;
            }
        };
        let summary = json!({
            "name": name,
            "status": inspected.pointer("/State/Status"),
            "image": inspected.pointer("/Config/Image"),
        });
        let mut issues = state_issues(&inspected);

        let status = inspected.pointer("/State/Status").and_then(Value::as_str).unwrap_or("");
        if matches!(status, "running" | "exited" | "restarting") {
            match logs(ctx, name, tail_lines, None, true).await {
                Ok(text) => {
                    let mut seen = Vec::new();
                    for error in analyze_log_errors(&text).iter().take(5) {
                        let kind = error["error_type"].as_str().unwrap_or("generic_error");
                        if seen.contains(&kind.to_string()) {
                            continue;
                        }
                        seen.push(kind.to_string());
                        issues.push(json!({
                            "type": kind,
                            "severity": error["severity"],
                            "message": truncate(error["log_line"].as_str().unwrap_or(""), 100),
                            "recommendation": error["recommendation"],
                        }));
                    }
                }
                Err(e) => tracing::warn!(container = %name, error = %e, "could not read logs"),
            }
        }

        if issues.is_empty() {
            healthy.push(summary);
        } else {
            let max = issues
                .iter()
                .map(|i| severity_rank(i["severity"].as_str().unwrap_or("low")))
                .max()
                .unwrap_or(0);
            with_issues.push((max, json!({
                "container": summary,
                "issue_count": issues.len(),
                "max_severity": SEVERITIES[max],
                "issues": issues,
            })));
        }
    }
    with_issues.sort_by(|a, b| b.0.cmp(&a.0));
    let total_issues: usize = with_issues.iter().map(|(_, c)| c["issue_count"].as_u64().unwrap_or(0) as usize).sum();
    let critical = with_issues.iter().filter(|(rank, _)| *rank >= 3).count();
    tracing::info!(containers = names.len(), with_issues = with_issues.len(), total_issues, "container sweep complete");

    let mut report = json!({
        "summary": {
            "total_containers": names.len(),
            "containers_with_issues": with_issues.len(),
            "healthy_containers": healthy.len(),
            "total_issues": total_issues,
            "critical_containers": critical,
        },
        "containers_with_issues": with_issues.into_iter().map(|(_, c)| c).collect::<Vec<_>>(),
    });
    if include_healthy {
        report["healthy_containers"] = json!(healthy);
    }
    Ok(report)
}

async fn inspect_container(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let attrs = inspect(ctx, &container).await?;
    let config = attrs.get("Config").cloned().unwrap_or(Value::Null);
    let host = attrs.get("HostConfig").cloned().unwrap_or(Value::Null);
    let state = attrs.get("State").cloned().unwrap_or(Value::Null);

    let mounts: Vec<Value> = attrs
        .get("Mounts")
        .and_then(Value::as_array)
        .map(|mounts| {
            mounts
                .iter()
                .map(|m| json!({
                    "type": m.get("Type"),
                    "source": m.get("Source"),
                    "destination": m.get("Destination"),
                    "rw": m.get("RW"),
                }))
                .collect()
        })
        .unwrap_or_default();
    let networks: BTreeMap<String, Value> = attrs
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
        .map(|nets| {
            nets.iter()
                .map(|(name, net)| {
                    (name.clone(), json!({
                        "ip_address": net.get("IPAddress"),
                        "gateway": net.get("Gateway"),
                        "network_id": short_id(str_field(net, "NetworkID")),
                    }))
                })
                .collect()
        })
        .unwrap_or_default();
    let exposed: Vec<&String> = config
        .get("ExposedPorts")
        .and_then(Value::as_object)
        .map(|ports| ports.keys().collect())
        .unwrap_or_default();

    Ok(json!({
        "container": {
            "id": attrs.get("Id"),
            "name": str_field(&attrs, "Name").trim_start_matches('/'),
            "image": config.get("Image"),
            "created": attrs.get("Created"),
        },
        "state": {
            "status": state.get("Status"),
            "running": state.get("Running"),
            "restarting": state.get("Restarting"),
            "exit_code": state.get("ExitCode"),
            "error": state.get("Error"),
            "started_at": state.get("StartedAt"),
            "finished_at": state.get("FinishedAt"),
            "oom_killed": state.get("OOMKilled"),
        },
        "config": {
            "env": redact_env(&config),
            "cmd": config.get("Cmd"),
            "entrypoint": config.get("Entrypoint"),
            "working_dir": config.get("WorkingDir"),
            "exposed_ports": exposed,
            "labels": config.get("Labels"),
        },
        "host_config": {
            "memory_limit_mb": host.get("Memory").and_then(Value::as_f64).map(|m| round2(m / MIB)),
            "nano_cpus": host.get("NanoCpus"),
            "restart_policy": host.get("RestartPolicy"),
            "port_bindings": host.get("PortBindings"),
            "binds": host.get("Binds"),
            "network_mode": host.get("NetworkMode"),
        },
        "mounts": mounts,
        "networks": networks,
    }))
}

fn env_entries(config: &Value) -> Vec<&str> {
    config
        .get("Env")
        .and_then(Value::as_array)
        .map(|env| env.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Environment with secret-looking values masked.
fn redact_env(config: &Value) -> Vec<String> {
    env_entries(config)
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, _)) if SECRET_ENV.is_match(key) => format!("{}=****", key),
            _ => entry.to_string(),
        })
        .collect()
}

/// One entry of `ls -la` output.
pub(crate) fn parse_ls_line(line: &str) -> Option<Value> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 || line.starts_with("total") {
        return None;
    }
    let name = fields[8..].join(" ");
    if name == "." || name == ".." {
        return None;
    }
    let kind = match fields[0].chars().next()? {
        'd' => "directory",
        'l' => "symlink",
        '-' => "file",
        _ => "other",
    };
    Some(json!({
        "name": name,
        "type": kind,
        "permissions": fields[0],
        "owner": fields[2],
        "size": fields[4].parse::<u64>().ok(),
        "modified": fields[5..8].join(" "),
    }))
}

fn path_param(params: &Params, key: &str, default: Option<&str>) -> Result<String, SkillError> {
    let path = match default {
        Some(default) => optional_str(params, key).unwrap_or_else(|| default.to_string()),
        None => required_str(params, key)?,
    };
    if !path.starts_with('/') {
        return Err(SkillError::invalid(format!("'{}' must be an absolute path", key)));
    }
    Ok(path)
}

async fn list_files(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let path = path_param(&params, "path", Some("/"))?;
    let output = docker(ctx, &["exec", &container, "ls", "-la", &path]).await?;
    let entries: Vec<Value> = output.stdout.lines().filter_map(parse_ls_line).collect();
    Ok(json!({
        "container": container,
        "path": path,
        "count": entries.len(),
        "entries": entries,
    }))
}

async fn read_file(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let path = path_param(&params, "path", None)?;
    let max_bytes = u64_or(&params, "max_bytes", 10_000)?.to_string();
    let output = docker(ctx, &["exec", &container, "head", "-c", &max_bytes, &path]).await?;
    Ok(json!({
        "container": container,
        "path": path,
        "bytes_read": output.stdout.len(),
        "content": output.stdout,
    }))
}

async fn run_command(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let command = required_str(&params, "command")?;
    tracing::info!(%container, %command, "running command in container");
    let args: Vec<String> = ["exec", container.as_str(), "sh", "-c", command.as_str()]
        .iter()
        .map(|a| a.to_string())
        .collect();
    // A failing command is a result for the caller, not a skill error
    let output = ctx.containers.run(&ctx.config.docker.binary, &args).await?;
    Ok(json!({
        "container": container,
        "command": command,
        "exit_code": output.exit_code,
        "stdout": tail(&output.stdout, 10_000),
        "stderr": tail(&output.stderr, 2_000),
    }))
}

/// One statement, led by a reading verb, with no data-modifying keyword anywhere
/// (including inside CTEs). Errs towards refusing.
pub(crate) fn is_read_only_sql(query: &str) -> bool {
    let statement = query.trim().trim_end_matches(';');
    if statement.contains(';') || SQL_WRITE_KEYWORD.is_match(statement) {
        return false;
    }
    let first = statement.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
    matches!(first.as_str(), "select" | "show" | "explain" | "with" | "describe" | "\\d" | "\\dt")
}

async fn run_sql(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let query = required_str(&params, "query")?;
    let engine = optional_str(&params, "engine").unwrap_or_else(|| "postgres".to_string());
    let user = optional_str(&params, "user").unwrap_or_else(|| engine.clone());
    let database = optional_str(&params, "database").unwrap_or_else(|| engine.clone());
    let allow_write = bool_or(&params, "allow_write", false)?;
    if !allow_write && !is_read_only_sql(&query) {
        return Err(SkillError::invalid("statement modifies data; pass allow_write=true to run it"));
    }

    // Without allow_write the statement also runs in a read-only session.
    let mut args = vec!["exec".to_string()];
    match engine.as_str() {
        "postgres" => {
            if !allow_write {
                args.extend(["-e", "PGOPTIONS=-c default_transaction_read_only=on"].map(String::from));
            }
            args.push(container.clone());
            args.extend(
                ["psql", "-U", user.as_str(), "-d", database.as_str(), "-c", query.as_str()].map(String::from),
            );
        }
        "mysql" => {
            args.extend([container.as_str(), "mysql", "-u", user.as_str()].map(String::from));
            if !allow_write {
                args.push("--init-command=SET SESSION TRANSACTION READ ONLY".to_string());
            }
            args.extend(["-e", query.as_str(), database.as_str()].map(String::from));
        }
        other => return Err(SkillError::invalid(format!("unsupported SQL engine '{}'", other))),
    }
    let output = run_checked(ctx, &ctx.config.docker.binary, args).await?;
    tracing::info!(%container, %engine, write = allow_write, "ran SQL statement");
    Ok(json!({
        "container": container,
        "engine": engine,
        "database": database,
        "output": tail(&output.stdout, 10_000),
    }))
}

async fn prune_images(ctx: &SkillContext, params: Params) -> SkillResult {
    let dry_run = bool_or(&params, "dry_run", true)?;
    let dangling = json_lines(
        &docker(ctx, &["images", "--filter", "dangling=true", "--format", "{{json .}}"])
            .await?
            .stdout,
    );
    let candidates: Vec<Value> = dangling
        .iter()
        .map(|image| json!({ "id": image.get("ID"), "size": image.get("Size"), "created": image.get("CreatedSince") }))
        .collect();
    let estimated: f64 = dangling.iter().filter_map(|i| parse_size(str_field(i, "Size"))).sum();

    let mut reclaimed = None;
    if !dry_run {
        let output = docker(ctx, &["image", "prune", "-f"]).await?;
        reclaimed = output
            .stdout
            .lines()
            .find_map(|line| line.strip_prefix("Total reclaimed space:"))
            .map(|s| s.trim().to_string());
        tracing::info!(images = candidates.len(), "pruned dangling images");
    }
    Ok(json!({
        "mode": if dry_run { "dry_run" } else { "executed" },
        "dangling_images": candidates.len(),
        "estimated_reclaim_mb": round2(estimated / MIB),
        "reclaimed": reclaimed,
        "images": candidates,
    }))
}

async fn check_connectivity(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let host = host_param(&params, "target_host")?;
    let port = u64_or(&params, "port", 80)?;
    if port == 0 || port > 65535 {
        return Err(SkillError::invalid("'port' must be between 1 and 65535"));
    }
    let port_arg = port.to_string();
    let args: Vec<String> = ["exec", container.as_str(), "nc", "-z", "-w", "3", host.as_str(), port_arg.as_str()]
        .iter()
        .map(|a| a.to_string())
        .collect();
    let output = ctx.containers.run(&ctx.config.docker.binary, &args).await?;
    Ok(json!({
        "container": container,
        "target": format!("{}:{}", host, port),
        "reachable": output.success(),
        "detail": if output.success() { None } else { Some(truncate(output.failure_text(), 300)) },
    }))
}

async fn inspect_dns(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let resolv = docker(ctx, &["exec", &container, "cat", "/etc/resolv.conf"]).await?;
    let nameservers: Vec<&str> = resolv
        .stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("nameserver"))
        .map(str::trim)
        .collect();
    let search: Vec<&str> = resolv
        .stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("search"))
        .flat_map(str::split_whitespace)
        .collect();

    let lookup = match optional_str(&params, "hostname") {
        Some(_) => {
            let hostname = host_param(&params, "hostname")?;
            let args: Vec<String> = ["exec", container.as_str(), "getent", "hosts", hostname.as_str()]
                .iter()
                .map(|a| a.to_string())
                .collect();
            let output = ctx.containers.run(&ctx.config.docker.binary, &args).await?;
            let addresses: Vec<&str> = output.stdout.lines().filter_map(|l| l.split_whitespace().next()).collect();
            Some(json!({ "hostname": hostname, "resolved": output.success(), "addresses": addresses }))
        }
        None => None,
    };
    Ok(json!({
        "container": container,
        "nameservers": nameservers,
        "search_domains": search,
        "lookup": lookup,
    }))
}

/// `2023-11-02 10:23:45 +0000 UTC` as printed by `docker images`.
pub(crate) fn parse_image_created(text: &str) -> Option<DateTime<Utc>> {
    let stamp: Vec<&str> = text.split_whitespace().take(3).collect();
    DateTime::parse_from_str(&stamp.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

async fn audit_freshness(ctx: &SkillContext, params: Params) -> SkillResult {
    let max_age_days = u64_or(&params, "max_age_days", 90)? as i64;
    let images = json_lines(&docker(ctx, &["images", "--format", "{{json .}}"]).await?.stdout);
    let in_use: Vec<String> = ps(ctx, true, &[]).await?.iter().map(|r| str_field(r, "Image").to_string()).collect();
    let now = Utc::now();

    let mut stale = Vec::new();
    let mut fresh = 0usize;
    for image in &images {
        let reference = format!("{}:{}", str_field(image, "Repository"), str_field(image, "Tag"));
        let Some(created) = parse_image_created(str_field(image, "CreatedAt")) else { continue };
        let age = (now - created).num_days();
        if age > max_age_days {
            stale.push(json!({
                "image": reference,
                "age_days": age,
                "in_use": in_use.iter().any(|used| *used == reference || reference.starts_with(&format!("{}:", used))),
                "size": image.get("Size"),
            }));
        } else {
            fresh += 1;
        }
    }
    Ok(json!({
        "max_age_days": max_age_days,
        "total_images": images.len(),
        "fresh": fresh,
        "stale_count": stale.len(),
        "stale": stale,
    }))
}

fn backup_dir(ctx: &SkillContext, params: &Params) -> PathBuf {
    optional_str(params, "backup_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir(ctx, "volume_backups"))
}

fn volume_param(params: &Params) -> Result<String, SkillError> {
    let volume = required_str(params, "volume_name")?;
    if !CONTAINER_NAME.is_match(&volume) {
        return Err(SkillError::invalid(format!("'{}' is not a valid volume name", volume)));
    }
    Ok(volume)
}

async fn backup_volume(ctx: &SkillContext, params: Params) -> SkillResult {
    let volume = volume_param(&params)?;
    let dir = backup_dir(ctx, &params);
    tokio::fs::create_dir_all(&dir).await?;
    let dir = tokio::fs::canonicalize(&dir).await?;
    let file = format!("{}_{}.tar.gz", volume, Utc::now().format("%Y%m%d_%H%M%S"));

    docker(
        ctx,
        &[
            "run",
            "--rm",
            "-v",
            &format!("{}:/source:ro", volume),
            "-v",
            &format!("{}:/backup", dir.display()),
            HELPER_IMAGE,
            "tar",
            "czf",
            &format!("/backup/{}", file),
            "-C",
            "/source",
            ".",
        ],
    )
    .await?;
    let size = tokio::fs::metadata(dir.join(&file)).await.map(|m| m.len()).ok();
    tracing::info!(%volume, %file, "volume backed up");
    Ok(json!({
        "action": "volume_backed_up",
        "volume": volume,
        "backup_file": file,
        "backup_path": dir.join(&file).display().to_string(),
        "size_bytes": size,
    }))
}

async fn restore_volume(ctx: &SkillContext, params: Params) -> SkillResult {
    let volume = volume_param(&params)?;
    let file = plain_file_name(&params, "backup_file")?;
    let confirm = bool_or(&params, "confirm", false)?;
    let dir = backup_dir(ctx, &params);
    if tokio::fs::metadata(dir.join(&file)).await.is_err() {
        return Err(SkillError::invalid(format!("backup '{}' not found in {}", file, dir.display())));
    }
    if !confirm {
        return Ok(json!({
            "action": "restore_pending",
            "volume": volume,
            "backup_file": file,
            "message": "Restoring replaces the volume's content; pass confirm=true to proceed",
        }));
    }

    let dir = tokio::fs::canonicalize(&dir).await?;
    docker(
        ctx,
        &[
            "run",
            "--rm",
            "-v",
            &format!("{}:/target", volume),
            "-v",
            &format!("{}:/backup:ro", dir.display()),
            HELPER_IMAGE,
            "sh",
            "-c",
            &format!("find /target -mindepth 1 -delete && tar xzf /backup/{} -C /target", file),
        ],
    )
    .await?;
    tracing::warn!(%volume, %file, "volume restored from backup");
    Ok(json!({ "action": "volume_restored", "volume": volume, "backup_file": file }))
}

async fn grep_logs(ctx: &SkillContext, params: Params) -> SkillResult {
    let pattern = required_str(&params, "pattern")?;
    let tail_lines = u64_or(&params, "tail", 500)?;
    let max_matches = u64_or(&params, "max_matches", 20)? as usize;
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| SkillError::invalid(format!("invalid pattern: {}", e)))?;

    let requested = string_list(&params, "containers");
    let names: Vec<String> = if requested.is_empty() {
        ps(ctx, false, &[]).await?.iter().map(|r| str_field(r, "Names").to_string()).collect()
    } else {
        requested
    };

    let mut results = BTreeMap::new();
    let mut total = 0usize;
    for name in &names {
        if !CONTAINER_NAME.is_match(name) {
            continue;
        }
        let text = match logs(ctx, name, tail_lines, None, true).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "could not read logs");
                continue;
            }
        };
        let matches: Vec<String> = text.lines().filter(|l| regex.is_match(l)).map(|l| truncate(l.trim(), 300)).collect();
        if matches.is_empty() {
            continue;
        }
        total += matches.len();
        results.insert(name.clone(), json!({
            "match_count": matches.len(),
            "matches": matches.into_iter().rev().take(max_matches).rev().collect::<Vec<_>>(),
        }));
    }
    Ok(json!({
        "pattern": pattern,
        "containers_searched": names.len(),
        "total_matches": total,
        "results": results,
    }))
}

/// Risky settings in a container's inspect document.
pub(crate) fn security_findings(attrs: &Value) -> Vec<Value> {
    let mut findings = Vec::new();
    let mut add = |severity: &str, issue: String, recommendation: &str| {
        findings.push(json!({ "severity": severity, "issue": issue, "recommendation": recommendation }));
    };

    if attrs.pointer("/HostConfig/Privileged").and_then(Value::as_bool).unwrap_or(false) {
        add("critical", "Container runs privileged".to_string(), "Drop --privileged and grant only needed capabilities");
    }
    let user = attrs.pointer("/Config/User").and_then(Value::as_str).unwrap_or("");
    if user.is_empty() || user == "root" || user == "0" || user.starts_with("0:") {
        add("medium", "Container runs as root".to_string(), "Set a non-root user");
    }
    if let Some(caps) = attrs.pointer("/HostConfig/CapAdd").and_then(Value::as_array) {
        let caps: Vec<&str> = caps.iter().filter_map(Value::as_str).collect();
        if !caps.is_empty() {
            add("high", format!("Added capabilities: {}", caps.join(", ")), "Remove capabilities that are not required");
        }
    }
    let mounts = attrs.get("Mounts").and_then(Value::as_array).cloned().unwrap_or_default();
    if mounts.iter().any(|m| str_field(m, "Source").ends_with("docker.sock")) {
        add("critical", "Docker socket is mounted".to_string(), "Avoid exposing the docker socket to containers");
    }
    if attrs.pointer("/HostConfig/NetworkMode").and_then(Value::as_str) == Some("host") {
        add("medium", "Container uses host networking".to_string(), "Use a bridge network with explicit port mappings");
    }
    let config = attrs.get("Config").cloned().unwrap_or(Value::Null);
    let secrets: Vec<&str> = env_entries(&config)
        .into_iter()
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, value)| SECRET_ENV.is_match(key) && !value.is_empty())
        .map(|(key, _)| key)
        .collect();
    if !secrets.is_empty() {
        add(
            "medium",
            format!("Secrets in plain environment variables: {}", secrets.join(", ")),
            "Use docker secrets or a mounted file",
        );
    }
    if attrs.pointer("/HostConfig/Memory").and_then(Value::as_u64).unwrap_or(0) == 0 {
        add("low", "No memory limit".to_string(), "Set a memory limit");
    }
    findings
}

async fn scan_security(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let attrs = inspect(ctx, &container).await?;
    let findings = security_findings(&attrs);
    let worst = findings
        .iter()
        .map(|f| severity_rank(f["severity"].as_str().unwrap_or("low")))
        .max();
    Ok(json!({
        "container": container,
        "risk_level": worst.map(|r| SEVERITIES[r]).unwrap_or("none"),
        "finding_count": findings.len(),
        "findings": findings,
    }))
}

/// Memory limit in MiB: 1.5x current usage in 64 MiB steps, at least 128 MiB.
pub(crate) fn recommended_memory_mb(usage_bytes: f64) -> u64 {
    let steps = (usage_bytes * 1.5 / (64.0 * MIB)).ceil() as u64;
    (steps * 64).max(128)
}

/// CPU limit in quarter cores: 1.5x current usage, at least a quarter.
pub(crate) fn recommended_cpus(cpu_percent: f64) -> f64 {
    ((cpu_percent / 100.0 * 1.5 * 4.0).ceil() / 4.0).max(0.25)
}

async fn recommend_limits(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let attrs = inspect(ctx, &container).await?;
    let usage = usage(ctx, &container).await?;
    let memory_mb = recommended_memory_mb(usage.memory_bytes);
    let cpus = recommended_cpus(usage.cpu_percent);

    let current_memory = attrs.pointer("/HostConfig/Memory").and_then(Value::as_f64).filter(|m| *m > 0.0);
    let current_cpus = attrs
        .pointer("/HostConfig/NanoCpus")
        .and_then(Value::as_f64)
        .filter(|n| *n > 0.0)
        .map(|n| n / 1e9);
    Ok(json!({
        "container": container,
        "current": {
            "memory_usage_mb": round2(usage.memory_bytes / MIB),
            "cpu_percent": usage.cpu_percent,
            "memory_limit_mb": current_memory.map(|m| round2(m / MIB)),
            "cpu_limit": current_cpus,
        },
        "recommended": { "memory_mb": memory_mb, "cpus": cpus },
        "compose_snippet": format!(
            "deploy:\n  resources:\n    limits:\n      memory: {}M\n      cpus: '{}'",
            memory_mb, cpus
        ),
        "note": "Based on a single sample; observe under peak load before applying",
    }))
}

async fn create_container_snapshot(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let tag = optional_str(&params, "tag").unwrap_or_else(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
    if !CONTAINER_NAME.is_match(&tag) {
        return Err(SkillError::invalid(format!("'{}' is not a valid tag", tag)));
    }
    let image = format!("{}-snapshot:{}", container.to_lowercase(), tag);
    let output = docker(ctx, &["commit", &container, &image]).await?;
    tracing::info!(%container, %image, "container committed");
    Ok(json!({
        "action": "snapshot_created",
        "container": container,
        "image": image,
        "image_id": output.stdout.trim(),
    }))
}

/// Containers publishing `port`, keyed by name.
pub(crate) fn publishers(rows: &[Value], port: u64) -> Vec<String> {
    let needle = format!(":{}->", port);
    rows.iter()
        .filter(|row| str_field(row, "Ports").contains(&needle))
        .map(|row| str_field(row, "Names").to_string())
        .collect()
}

async fn check_port(ctx: &SkillContext, params: Params) -> SkillResult {
    let port = u64_or(&params, "port", 0)?;
    if port == 0 || port > 65535 {
        return Err(SkillError::invalid("'port' must be between 1 and 65535"));
    }
    let used_by = publishers(&ps(ctx, false, &[]).await?, port);
    let host_free = tokio::net::TcpListener::bind(("0.0.0.0", port as u16)).await.is_ok();
    Ok(json!({
        "port": port,
        "available": host_free && used_by.is_empty(),
        "host_bindable": host_free,
        "published_by": used_by,
    }))
}

/// Line with timestamps, ids and numbers replaced, for grouping.
pub(crate) fn normalize_line(line: &str) -> String {
    let line = LOG_TIMESTAMP.replace(line.trim(), "");
    let line = UUID_OR_HEX.replace_all(&line, "<id>");
    let line = NUMBER.replace_all(&line, "<n>");
    truncate(line.trim(), 160)
}

fn matches_level(line: &str, level: &str) -> bool {
    let lower = line.to_lowercase();
    match level {
        "all" => true,
        "error" => ERROR_INDICATORS.iter().any(|i| lower.contains(i)),
        "warn" | "warning" => lower.contains("warn"),
        other => lower.contains(other),
    }
}

pub(crate) fn log_patterns(text: &str, level: &str, top: usize) -> (usize, Vec<(String, usize)>) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut considered = 0;
    for line in text.lines().filter(|l| !l.trim().is_empty() && matches_level(l, level)) {
        considered += 1;
        *counts.entry(normalize_line(line)).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top);
    (considered, ranked)
}

async fn summarize_log_patterns(ctx: &SkillContext, params: Params) -> SkillResult {
    let container = container_param(ctx, &params)?;
    let level = optional_str(&params, "level").unwrap_or_else(|| "error".to_string()).to_lowercase();
    let minutes = u64_or(&params, "minutes", 60)?;
    let top = u64_or(&params, "top", 10)? as usize;

    let text = logs(ctx, &container, 5000, Some(minutes), false).await?;
    let (considered, ranked) = log_patterns(&text, &level, top);
    Ok(json!({
        "container": container,
        "level": level,
        "window_minutes": minutes,
        "lines_considered": considered,
        "patterns": ranked
            .into_iter()
            .map(|(pattern, count)| json!({ "pattern": pattern, "count": count }))
            .collect::<Vec<_>>(),
    }))
}
