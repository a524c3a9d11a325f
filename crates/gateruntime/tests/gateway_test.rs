use async_trait::async_trait;
use futures::FutureExt;
use gatecore::{
    Capability, CommandError, CommandOutput, ContainerRunner, EngineClient, GatewayConfig, NodeSpec, WorkflowGraph,
};
use gateruntime::{
    deploy, Gateway, Kernel, MemoryEngine, ReportStatus, SkillContext, SkillError, SkillRegistry, UpsertAction,
    UpsertError,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CountingRunner {
    calls: AtomicUsize,
}

#[async_trait]
impl ContainerRunner for CountingRunner {
    async fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput, CommandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommandOutput {
            exit_code: 0,
            stdout: "n8n\n".into(),
            stderr: String::new(),
        })
    }
}

async fn list_names(ctx: &SkillContext, _params: Map<String, Value>) -> Result<Value, SkillError> {
    let names: Vec<String> = ctx.engine.list_workflows(None).await?.into_iter().map(|w| w.name).collect();
    Ok(json!({ "names": names }))
}

async fn container_ps(ctx: &SkillContext, _params: Map<String, Value>) -> Result<Value, SkillError> {
    let output = ctx.containers.run("docker", &["ps".to_string()]).await?;
    Ok(json!({ "stdout": output.stdout }))
}

fn registry() -> Arc<SkillRegistry> {
    let mut builder = SkillRegistry::builder();
    builder
        .skill(Kernel::WorkflowExpert, "list_workflows", &[Capability::N8n], "List workflows", |ctx, p| {
            list_names(ctx, p).boxed()
        })
        .unwrap();
    builder
        .skill(Kernel::DockerExpert, "list_containers", &[Capability::Docker], "List containers", |ctx, p| {
            container_ps(ctx, p).boxed()
        })
        .unwrap();
    Arc::new(builder.build())
}

fn gateway(engine: Arc<MemoryEngine>, runner: Arc<CountingRunner>, docker: bool) -> Gateway {
    let mut config = GatewayConfig::default();
    config.features.docker = docker;
    Gateway::with_registry(registry(), engine, runner, Arc::new(config))
}

fn invoice_sync() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new("Invoice Sync");
    graph.add_node(NodeSpec::new("Schedule", "n8n-nodes-base.scheduleTrigger"));
    graph.add_node(NodeSpec::new("Fetch", "n8n-nodes-base.httpRequest").with_parameter("url", "https://billing.example.com"));
    graph.connect("Schedule", "Fetch");
    graph
}

#[tokio::test]
async fn test_smart_upsert_creates_then_updates() {
    let engine = MemoryEngine::new();

    let first = deploy(&engine, &invoice_sync()).await.unwrap();
    assert_eq!(first.action, UpsertAction::Created);
    let calls = engine.calls();
    assert_eq!(calls.create_workflow, 1);
    assert_eq!(calls.update_workflow, 0);
    let created_id = first.workflow.id.clone().unwrap();

    let second = deploy(&engine, &invoice_sync()).await.unwrap();
    assert_eq!(second.action, UpsertAction::Updated);
    assert_eq!(second.workflow.id.as_deref(), Some(created_id.as_str()));
    let calls = engine.calls();
    assert_eq!(calls.create_workflow, 1);
    assert_eq!(calls.update_workflow, 1);
    assert_eq!(engine.workflows().len(), 1);
}

#[tokio::test]
async fn test_smart_upsert_refuses_ambiguous_names() {
    let engine = MemoryEngine::new()
        .with_workflow(invoice_sync().with_id("1"))
        .with_workflow(invoice_sync().with_id("2"));

    let err = deploy(&engine, &invoice_sync()).await.unwrap_err();
    assert!(matches!(err, UpsertError::NameCollision { ref ids, .. } if ids.len() == 2));
    assert_eq!(engine.calls().create_workflow, 0);
    assert_eq!(engine.calls().update_workflow, 0);
}

#[tokio::test]
async fn test_disabled_capability_issues_no_calls() {
    let engine = Arc::new(MemoryEngine::new().with_workflow(invoice_sync()));
    let runner = Arc::new(CountingRunner::default());
    let gateway = gateway(engine.clone(), runner.clone(), false);

    let report = gateway.invoke("docker_expert", "list_containers", Value::Null).await;
    assert_eq!(report.status, ReportStatus::Error);
    assert_eq!(report.error_class.as_deref(), Some("CapabilityDisabledError"));
    assert!(report.message.unwrap().contains("ENABLE_DOCKER_TOOLS"));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.calls().total(), 0);
}

#[tokio::test]
async fn test_dispatch_wraps_data_in_report() {
    let engine = Arc::new(MemoryEngine::new().with_workflow(invoice_sync()));
    let runner = Arc::new(CountingRunner::default());
    let gateway = gateway(engine.clone(), runner.clone(), true);

    let report = gateway.invoke("workflow_expert", "list_workflows", json!({})).await;
    assert!(report.is_ok());
    assert_eq!(report.data, Some(json!({"names": ["Invoice Sync"]})));

    let report = gateway.invoke("docker_expert", "list_containers", json!({})).await;
    assert!(report.is_ok());
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_skill_lists_alternatives() {
    let engine = Arc::new(MemoryEngine::new());
    let gateway = gateway(engine.clone(), Arc::new(CountingRunner::default()), true);

    let report = gateway.invoke("workflow_expert", "launch_rockets", json!({})).await;
    assert_eq!(report.error_class.as_deref(), Some("UnknownSkillError"));
    assert_eq!(report.available_skills, vec!["list_workflows".to_string()]);
    assert_eq!(engine.calls().total(), 0);

    let report = gateway.invoke("workflow_expert", "list_workflows", json!([1, 2])).await;
    assert_eq!(report.error_class.as_deref(), Some("InvalidParams"));
}

#[tokio::test]
async fn test_upstream_errors_become_error_reports() {
    let engine = Arc::new(MemoryEngine::new());
    let runner = Arc::new(CountingRunner::default());
    let mut builder = SkillRegistry::builder();
    builder
        .skill(Kernel::WorkflowExpert, "read_workflow", &[Capability::N8n], "Read", |ctx, _p| {
            async move {
                let graph = ctx.engine.get_workflow("missing").await?;
                Ok::<Value, SkillError>(json!(graph.name))
            }
            .boxed()
        })
        .unwrap();
    let gateway = Gateway::with_registry(
        Arc::new(builder.build()),
        engine,
        runner,
        Arc::new(GatewayConfig::default()),
    );

    let report = gateway.invoke("workflow_expert", "read_workflow", Value::Null).await;
    assert_eq!(report.status, ReportStatus::Error);
    assert_eq!(report.error_class.as_deref(), Some("NotFound"));
    assert!(report.data.is_none());
}
