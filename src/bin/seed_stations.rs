//! Create (or migrate) the cache database and sync station metadata from
//! the catalog files, without fetching anything from the vendors.

use std::path::Path;
use std::sync::Arc;

use charger_hub::adapters::db::{open_connection, run_migrations, upsert_stations};
use charger_hub::adapters::providers::ProviderRegistry;
use charger_hub::app::config::AppConfig;

fn main() {
    dotenvy::dotenv().ok();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run() {
        eprintln!("seeding failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    if let Some(parent) = Path::new(&config.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut connection = open_connection(&config.db_path)?;
    run_migrations(&mut connection)?;

    let registry = Arc::new(ProviderRegistry::bootstrap(
        Path::new(&config.data_dir),
        &config,
    ));
    let stations = registry.all_stations();
    let written = upsert_stations(&mut connection, &stations)?;

    println!(
        "seeded {written} stations from {} vendors into {}",
        registry.vendor_ids().len(),
        config.db_path
    );
    Ok(())
}
