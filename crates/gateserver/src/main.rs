use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use gatecore::GatewayConfig;
use gateruntime::{Gateway, Kernel, KernelReport};
use gateskills::{DockerCli, N8nClient};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    gateway: Gateway,
}

#[derive(Debug, Deserialize)]
struct SkillsQuery {
    kernel: Option<String>,
}

/// Body of a kernel invocation
#[derive(Debug, Deserialize)]
struct KernelRequest {
    skill: String,
    #[serde(default)]
    params: Value,
}

#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let config = data.gateway.config();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "n8n-gateway",
        "engine": config.engine.api_url(),
        "capabilities": config.features,
        "skills": data.gateway.registry().len(),
    }))
}

/// List registered skills, optionally for one kernel
#[get("/api/skills")]
async fn list_skills(data: web::Data<AppState>, query: web::Query<SkillsQuery>) -> ActixResult<impl Responder> {
    let kernel = match query.kernel.as_deref() {
        None => None,
        Some(name) => match name.parse::<Kernel>() {
            Ok(kernel) => Some(kernel),
            Err(message) => {
                return Ok(HttpResponse::NotFound().json(json!({
                    "error": message,
                    "kernels": Kernel::ALL.iter().map(Kernel::as_str).collect::<Vec<_>>(),
                })))
            }
        },
    };

    let skills = data.gateway.skills(kernel);
    Ok(HttpResponse::Ok().json(json!({
        "count": skills.len(),
        "skills": skills,
    })))
}

/// Dispatch one skill of a kernel
#[post("/api/kernels/{kernel}")]
async fn invoke_kernel(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<KernelRequest>,
) -> ActixResult<impl Responder> {
    let kernel = path.into_inner();
    let KernelRequest { skill, params } = req.into_inner();

    let report = data.gateway.invoke(&kernel, &skill, params).await;
    Ok(respond(report))
}

/// Reports always carry a body; the status line mirrors the error class
fn respond(report: KernelReport) -> HttpResponse {
    let mut response = match report.error_class.as_deref() {
        None => HttpResponse::Ok(),
        Some("UnknownSkillError") | Some("NotFound") => HttpResponse::NotFound(),
        Some("CapabilityDisabledError") => HttpResponse::Forbidden(),
        Some("InvalidParams") | Some("ParseError") | Some("PatchNoEffect") => HttpResponse::BadRequest(),
        Some("PatchConflictError") | Some("NameCollision") => HttpResponse::Conflict(),
        Some("AuthError") | Some("UpstreamTimeout") | Some("UpstreamUnavailable") => HttpResponse::BadGateway(),
        Some(_) => HttpResponse::InternalServerError(),
    };
    response.json(report)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(GatewayConfig::from_env()?);
    info!(engine = %config.engine.api_url(), features = ?config.features, "starting n8n gateway");

    let mut builder = gateruntime::SkillRegistry::builder();
    gateskills::register_all(&mut builder)?;
    let registry = Arc::new(builder.build());

    let engine = Arc::new(N8nClient::new(&config.engine)?);
    let runner = Arc::new(DockerCli::new(&config.docker));
    let gateway = Gateway::with_registry(registry, engine, runner, config.clone());
    info!(skills = gateway.registry().len(), "registry ready");

    let app_state = web::Data::new(AppState { gateway });
    let shutdown_state = app_state.clone();
    let bind_address = config.bind_address.clone();
    info!("listening on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().limit(4 * 1024 * 1024))
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_skills)
            .service(invoke_kernel)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    shutdown_state.gateway.shutdown();
    info!("gateway stopped");
    Ok(())
}
