pub mod config;
mod error;
mod logging;
pub mod orchestrator;
mod runtime;
pub mod scheduler;
pub mod services;

pub use error::AppError;

fn init() -> Result<config::AppConfig, AppError> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        data_dir = %config.data_dir,
        http_bind = %config.http_bind,
        fetch_interval_secs = config.fetch_interval_secs,
        history_enabled = config.history_enabled,
        quiet_start = %config.quiet_start,
        quiet_end = %config.quiet_end,
        "application bootstrap initialized"
    );

    Ok(config)
}

pub fn run() -> Result<(), AppError> {
    runtime::run(init()?)
}

pub fn run_service() -> Result<(), AppError> {
    runtime::run_service(init()?)
}

pub fn run_api() -> Result<(), AppError> {
    runtime::run_api(init()?)
}
