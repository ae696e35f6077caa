use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use rusqlite::Connection;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::providers::ProviderRegistry;
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::orchestrator::FetchOrchestrator;
use crate::app::scheduler::RefreshScheduler;
use crate::app::services::StatusService;

/// Everything both roles need: a migrated shared connection, the vendor
/// registry behind the orchestrator, and the read service on top.
struct Bootstrap {
    connection: Arc<Mutex<Connection>>,
    orchestrator: Arc<FetchOrchestrator>,
    service: StatusService,
}

fn bootstrap(config: &AppConfig) -> Result<Bootstrap, AppError> {
    let mut connection =
        crate::adapters::db::open_connection(&config.db_path).map_err(AppError::database_init)?;
    crate::adapters::db::run_migrations(&mut connection).map_err(AppError::database_init)?;
    let connection = Arc::new(Mutex::new(connection));

    let registry = Arc::new(ProviderRegistry::bootstrap(Path::new(&config.data_dir), config));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(AppError::runtime)?;

    let orchestrator = Arc::new(FetchOrchestrator::new(registry, client));
    let service = StatusService::new(Arc::clone(&connection), Arc::clone(&orchestrator));

    Ok(Bootstrap {
        connection,
        orchestrator,
        service,
    })
}

async fn serve_http(config: &AppConfig, service: StatusService) -> std::io::Result<()> {
    let api_state = ApiState {
        status: service,
        frontend_refresh_secs: config.frontend_refresh_secs,
    };

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(api_state.clone()))
            .configure(configure_routes)
    })
    .bind(&config.http_bind)?
    .run()
    .await
}

/// Combined role: refresh scheduler and HTTP server in one process.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let parts = bootstrap(&config)?;

    let scheduler = RefreshScheduler::new(
        Arc::clone(&parts.orchestrator),
        Arc::clone(&parts.connection),
        parts.service.clone(),
        &config,
    );

    tracing::info!(bind = %config.http_bind, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            actix_web::rt::spawn(scheduler.run());
            serve_http(&config, parts.service).await
        })
        .map_err(AppError::runtime)
}

/// Fetch-and-cache role only; no HTTP surface.
pub fn run_service(config: AppConfig) -> Result<(), AppError> {
    let parts = bootstrap(&config)?;

    let scheduler = RefreshScheduler::new(
        parts.orchestrator,
        parts.connection,
        parts.service,
        &config,
    );

    actix_web::rt::System::new().block_on(scheduler.run());
    Ok(())
}

/// Read-only HTTP role. Shares the database with a separately running
/// fetch service; live-fetch fallback still works on a cold cache.
pub fn run_api(config: AppConfig) -> Result<(), AppError> {
    let parts = bootstrap(&config)?;

    tracing::info!(bind = %config.http_bind, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move { serve_http(&config, parts.service).await })
        .map_err(AppError::runtime)
}
