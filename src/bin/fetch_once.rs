//! One-shot fetch across all vendors, printed as JSON. Useful for checking
//! vendor reachability and catalog contents without starting the service.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use charger_hub::adapters::providers::ProviderRegistry;
use charger_hub::app::config::AppConfig;
use charger_hub::app::orchestrator::FetchOrchestrator;
use charger_hub::domain::aggregate::StatusFilter;
use charger_hub::domain::station::now_utc8_iso;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let vendor = std::env::args().nth(1);

    let registry = Arc::new(ProviderRegistry::bootstrap(
        Path::new(&config.data_dir),
        &config,
    ));
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            eprintln!("http client error: {err}");
            std::process::exit(1);
        }
    };

    let orchestrator = FetchOrchestrator::new(registry, client);
    let filter = StatusFilter {
        vendor,
        ..StatusFilter::default()
    };
    let stations = orchestrator.fetch_live(&filter).await;

    if stations.is_empty() {
        eprintln!("no stations returned; check catalogs and vendor reachability");
        std::process::exit(1);
    }

    let output = serde_json::json!({
        "updated_at": now_utc8_iso(),
        "stations": stations,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("serialization error: {err}");
            std::process::exit(1);
        }
    }
}
