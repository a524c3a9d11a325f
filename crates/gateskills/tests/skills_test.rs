use async_trait::async_trait;
use gatecore::{CommandError, CommandOutput, ContainerRunner, GatewayConfig, NodeSpec, WorkflowGraph};
use gateruntime::{Gateway, Kernel, MemoryEngine, ReportStatus};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// Answers host commands from a script and records every call
struct ScriptedRunner {
    respond: Responder,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    fn new(respond: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRunner for ScriptedRunner {
    async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok((self.respond)(args))
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn silent() -> Arc<ScriptedRunner> {
    ScriptedRunner::new(|_| ok(""))
}

fn gateway_with(engine: Arc<MemoryEngine>, runner: Arc<ScriptedRunner>, config: GatewayConfig) -> Gateway {
    let registry = Arc::new(gateskills::registry().unwrap());
    Gateway::with_registry(registry, engine, runner, Arc::new(config))
}

fn gateway(engine: Arc<MemoryEngine>, runner: Arc<ScriptedRunner>) -> Gateway {
    gateway_with(engine, runner, GatewayConfig::default())
}

fn lead_router() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new("Lead Router").with_tag("sales");
    graph.add_node(NodeSpec::new("Webhook", "n8n-nodes-base.webhook"));
    graph.add_node(NodeSpec::new("Enrich", "n8n-nodes-base.httpRequest").with_parameter("url", "https://crm.example.com"));
    graph.connect("Webhook", "Enrich");
    graph
}

#[test]
fn test_catalogue_has_ninety_skills() {
    let registry = gateskills::registry().unwrap();
    assert_eq!(registry.len(), 90);

    let sizes: Vec<(Kernel, usize)> = registry.kernel_sizes();
    let expected = [
        (Kernel::WorkflowExpert, 9),
        (Kernel::DebugExpert, 6),
        (Kernel::SurgeryExpert, 6),
        (Kernel::CicdExpert, 8),
        (Kernel::HealingExpert, 5),
        (Kernel::InsightExpert, 9),
        (Kernel::ForecastExpert, 5),
        (Kernel::SecurityExpert, 4),
        (Kernel::BuilderExpert, 15),
        (Kernel::DockerExpert, 23),
    ];
    assert_eq!(sizes, expected.to_vec());
}

#[tokio::test]
async fn test_disabled_docker_never_reaches_the_runner() {
    let runner = silent();
    let mut config = GatewayConfig::default();
    config.features.docker = false;
    let gateway = gateway_with(Arc::new(MemoryEngine::new()), runner.clone(), config);

    let report = gateway.invoke("docker_expert", "list_containers", json!({})).await;
    assert_eq!(report.status, ReportStatus::Error);
    assert_eq!(report.error_class.as_deref(), Some("CapabilityDisabledError"));
    assert!(runner.calls().is_empty());

    let report = gateway.invoke("cicd_expert", "sync_to_git", json!({})).await;
    assert_eq!(report.error_class.as_deref(), Some("CapabilityDisabledError"));
}

#[tokio::test]
async fn test_list_workflows_filters_by_tag() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_workflow(lead_router())
            .with_workflow(WorkflowGraph::new("Nightly Report").with_tag("reports")),
    );
    let gateway = gateway(engine, silent());

    let report = gateway.invoke("workflow_expert", "list_workflows", json!({ "tags": ["sales"] })).await;
    assert!(report.is_ok());
    let data = report.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(data["workflows"][0]["name"], "Lead Router");
    assert_eq!(data["workflows"][0]["node_count"], 2);
}

#[tokio::test]
async fn test_validate_reports_dangling_connection() {
    let gateway = gateway(Arc::new(MemoryEngine::new()), silent());
    let broken = json!({
        "name": "Broken",
        "nodes": [{ "name": "Start", "type": "n8n-nodes-base.manualTrigger", "parameters": {} }],
        "connections": { "Start": { "main": [[{ "node": "Ghost", "type": "main", "index": 0 }]] } },
    });

    let report = gateway.invoke("workflow_expert", "validate_workflow", json!({ "workflow": broken })).await;
    assert!(report.is_ok());
    assert_eq!(report.data.unwrap()["valid"], false);
}

#[tokio::test]
async fn test_unknown_skill_lists_kernel_catalogue() {
    let gateway = gateway(Arc::new(MemoryEngine::new()), silent());
    let report = gateway.invoke("security_expert", "launch_missiles", json!({})).await;
    assert_eq!(report.error_class.as_deref(), Some("UnknownSkillError"));
    assert_eq!(report.available_skills.len(), 4);
    assert!(report.available_skills.contains(&"kill_switch".to_string()));
}

#[tokio::test]
async fn test_snapshot_round_trip_through_directory() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::new().with_workflow(lead_router()));
    let id = engine.workflows()[0].id.clone().unwrap();
    let mut config = GatewayConfig::default();
    config.snapshot_dir = dir.path().join("snapshots");
    let gateway = gateway_with(engine, silent(), config);

    let created = gateway
        .invoke("cicd_expert", "create_workflow_snapshot", json!({ "workflow_id": id, "description": "before change" }))
        .await;
    assert!(created.is_ok(), "{:?}", created.message);
    let filename = created.data.unwrap()["snapshot_file"].as_str().unwrap().to_string();
    assert!(filename.starts_with("Lead_Router_"));

    let listed = gateway.invoke("cicd_expert", "list_snapshots", json!({ "workflow_id": id })).await;
    let data = listed.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(data["snapshots"][0]["filename"], filename);
    assert_eq!(data["snapshots"][0]["description"], "before change");
}

#[tokio::test]
async fn test_scaffolded_node_is_listed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::default();
    config.engine.data_dir = dir.path().to_path_buf();
    let gateway = gateway_with(Arc::new(MemoryEngine::new()), silent(), config);

    let report = gateway
        .invoke("builder_expert", "scaffold_node", json!({ "node_name": "Slack Digest", "category": "http" }))
        .await;
    assert!(report.is_ok(), "{:?}", report.message);
    assert_eq!(report.data.unwrap()["class_name"], "SlackDigest");

    let listed = gateway.invoke("builder_expert", "list_custom_nodes", json!({})).await;
    let data = listed.data.unwrap();
    assert_eq!(data["node_count"], 1);
    assert_eq!(data["nodes"][0]["name"], "SlackDigest");
    assert_eq!(data["nodes"][0]["has_package_json"], true);
    assert_eq!(data["nodes"][0]["is_built"], false);
}

#[tokio::test]
async fn test_kill_switch_dry_run_leaves_workflows_active() {
    let engine = Arc::new(MemoryEngine::new().with_workflow(lead_router()));
    let id = engine.workflows()[0].id.clone().unwrap();
    let gateway = gateway(engine.clone(), silent());
    gateway.invoke("workflow_expert", "toggle_workflow", json!({ "workflow_id": id, "active": true })).await;

    let report = gateway.invoke("security_expert", "kill_switch", json!({})).await;
    let data = report.data.unwrap();
    assert_eq!(data["mode"], "dry_run");
    assert_eq!(data["active_workflows_found"], 1);
    assert!(engine.workflow(&id).unwrap().active);

    let report = gateway.invoke("security_expert", "kill_switch", json!({ "dry_run": false })).await;
    assert_eq!(report.data.unwrap()["deactivated"], json!([id]));
    assert!(!engine.workflow(&id).unwrap().active);
}

#[tokio::test]
async fn test_list_containers_parses_docker_ps() {
    let runner = ScriptedRunner::new(|args| match args.first().map(String::as_str) {
        Some("ps") => ok(concat!(
            r#"{"ID":"abcdef1234567890","Names":"n8n","Image":"n8nio/n8n","State":"running","Status":"Up 2 hours","Ports":"0.0.0.0:5678->5678/tcp","CreatedAt":"2024-05-01 10:00:00 +0000 UTC"}"#,
            "\n",
            r#"{"ID":"0123456789abcdef","Names":"postgres","Image":"postgres:16","State":"running","Status":"Up 2 hours","Ports":"","CreatedAt":"2024-05-01 10:00:00 +0000 UTC"}"#,
        )),
        _ => ok(""),
    });
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    let report = gateway.invoke("docker_expert", "list_containers", json!({})).await;
    assert!(report.is_ok(), "{:?}", report.message);
    let data = report.data.unwrap();
    assert_eq!(data["count"], 2);
    assert_eq!(data["containers"][0]["id"], "abcdef123456");
    assert_eq!(data["containers"][0]["ports"], json!(["0.0.0.0:5678->5678/tcp"]));
    assert_eq!(data["containers"][1]["ports"], json!([]));
    assert!(!runner.calls()[0].contains(&"-a".to_string()));
}

#[tokio::test]
async fn test_run_command_reports_exit_code_as_data() {
    let runner = ScriptedRunner::new(|_| CommandOutput {
        exit_code: 2,
        stdout: String::new(),
        stderr: "ls: /missing: No such file or directory".into(),
    });
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    let report = gateway
        .invoke("docker_expert", "run_command", json!({ "command": "ls /missing" }))
        .await;
    assert!(report.is_ok());
    let data: Value = report.data.unwrap();
    assert_eq!(data["exit_code"], 2);
    assert_eq!(data["container"], "n8n");
    assert_eq!(runner.calls()[0], vec!["exec", "n8n", "sh", "-c", "ls /missing"]);
}

#[tokio::test]
async fn test_failed_docker_command_is_a_command_error() {
    let runner = ScriptedRunner::new(|_| CommandOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: "Error: No such container: ghost".into(),
    });
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner);

    let report = gateway
        .invoke("docker_expert", "inspect_container", json!({ "container_name": "ghost" }))
        .await;
    assert_eq!(report.error_class.as_deref(), Some("CommandFailed"));
    assert!(report.message.unwrap().contains("No such container"));
}

#[tokio::test]
async fn test_run_sql_refuses_writes_without_opt_in() {
    let runner = silent();
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    let report = gateway
        .invoke(
            "docker_expert",
            "run_sql",
            json!({ "container_name": "postgres", "query": "DELETE FROM execution_entity" }),
        )
        .await;
    assert_eq!(report.error_class.as_deref(), Some("InvalidParams"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_run_sql_refuses_stacked_and_cte_writes() {
    let runner = silent();
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    for query in [
        "select 1; drop table workflow_entity",
        "with x as (delete from execution_entity returning 1) select * from x",
    ] {
        let report = gateway
            .invoke(
                "docker_expert",
                "run_sql",
                json!({ "container_name": "postgres", "query": query }),
            )
            .await;
        assert_eq!(report.error_class.as_deref(), Some("InvalidParams"), "{}", query);
    }
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_run_sql_reads_in_read_only_session() {
    let runner = ScriptedRunner::new(|_| ok(" count \n-------\n     3\n"));
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    let report = gateway
        .invoke(
            "docker_expert",
            "run_sql",
            json!({ "container_name": "postgres", "query": "select count(*) from workflow_entity" }),
        )
        .await;
    assert!(report.is_ok(), "{:?}", report.message);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        &calls[0][..4],
        ["exec", "-e", "PGOPTIONS=-c default_transaction_read_only=on", "postgres"]
    );
    assert_eq!(calls[0].last().map(String::as_str), Some("select count(*) from workflow_entity"));
}

#[tokio::test]
async fn test_inject_reports_resume_without_echoing_data() {
    let engine = Arc::new(MemoryEngine::new().with_workflow(lead_router()).with_execution(json!({
        "id": "77", "workflowId": "wf-lead", "status": "waiting", "data": {"resultData": {"runData": {}}}
    })));
    let gateway = gateway(engine, silent());

    let report = gateway
        .invoke(
            "surgery_expert",
            "inject_execution_data",
            json!({ "execution_id": "77", "node_name": "Enrich", "data": {"apiKey": "sk-live-secret"} }),
        )
        .await;
    assert!(report.is_ok(), "{:?}", report.message);

    let data = report.data.unwrap();
    assert_eq!(data["execution_id"], "77");
    assert_eq!(data["status"], "resumed");
    assert!(data.get("result").is_none());
    assert!(!data.to_string().contains("sk-live-secret"));
}

#[tokio::test]
async fn test_container_names_are_validated() {
    let runner = silent();
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    let report = gateway
        .invoke("docker_expert", "get_logs", json!({ "container_name": "n8n; rm -rf /" }))
        .await;
    assert_eq!(report.error_class.as_deref(), Some("InvalidParams"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_restart_reports_before_and_after_status() {
    let runner = ScriptedRunner::new(|args| match args.first().map(String::as_str) {
        Some("inspect") => ok(r#"[{"Name":"/n8n","State":{"Status":"running"}}]"#),
        Some("restart") => ok("n8n\n"),
        _ => ok(""),
    });
    let gateway = gateway(Arc::new(MemoryEngine::new()), runner.clone());

    let report = gateway.invoke("docker_expert", "restart_container", json!({ "timeout": 5 })).await;
    assert!(report.is_ok(), "{:?}", report.message);
    let data = report.data.unwrap();
    assert_eq!(data["previous_status"], "running");
    assert_eq!(data["current_status"], "running");
    assert!(runner.calls().iter().any(|call| call == &vec!["restart", "-t", "5", "n8n"]));
}
