mod dlmm;
mod dudu;
mod duohang;
mod neptune;
mod neptune_junior;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use thiserror::Error;

use crate::app::config::AppConfig;
use crate::domain::station::{AggregatedStatus, CatalogError, Station, UsageSnapshot};

pub use dlmm::DlmmAdapter;
pub use dudu::DuduAdapter;
pub use duohang::DuohangAdapter;
pub use neptune::NeptuneAdapter;
pub use neptune_junior::NeptuneJuniorAdapter;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("vendor rejected request for device {device_id}: {message}")]
    Api { device_id: String, message: String },
    #[error("malformed vendor response for device {device_id}: {message}")]
    Malformed { device_id: String, message: String },
    #[error("retries exhausted fetching device {device_id}")]
    RetriesExhausted { device_id: String },
    #[error("all {device_count} devices failed for station {station}")]
    AllDevicesFailed {
        station: String,
        device_count: usize,
    },
    #[error("station catalog failed to load: {0}")]
    Catalog(#[from] CatalogError),
}

/// One implementation per vendor. Device-level normalization is the only
/// vendor-specific part; station and vendor fan-out share the default
/// implementations below, so no vendor-specific response shape leaks past
/// `fetch_device_status`.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Stable vendor key, part of every station identity hash.
    fn vendor_id(&self) -> &'static str;

    /// Stations loaded for this vendor. Empty until `load_stations` ran.
    fn stations(&self) -> &[Station];

    /// Read the vendor's station definitions. Called once at startup.
    fn load_stations(&mut self, data_dir: &Path) -> Result<usize, ProviderError>;

    /// One vendor call for one device, normalized into the shared counter
    /// schema. Implementations apply their own bounded retry policy and
    /// timeout and return an error on exhaustion instead of panicking.
    async fn fetch_device_status(
        &self,
        client: &Client,
        device_id: &str,
    ) -> Result<UsageSnapshot, ProviderError>;

    /// Fan `fetch_device_status` out over the station's devices and sum the
    /// counters. A failed device contributes zeros; the station-level call
    /// only fails when every device failed.
    async fn fetch_station_status(
        &self,
        client: &Client,
        station: &Station,
    ) -> Result<UsageSnapshot, ProviderError> {
        let calls = station
            .device_ids
            .iter()
            .map(|device_id| self.fetch_device_status(client, device_id));
        let results = join_all(calls).await;

        let mut sum = UsageSnapshot::default();
        let mut failures = 0_usize;

        for (device_id, result) in station.device_ids.iter().zip(results) {
            match result {
                Ok(snapshot) => sum.add(&snapshot),
                Err(error) => {
                    failures += 1;
                    tracing::warn!(
                        vendor = self.vendor_id(),
                        station = %station.name,
                        device_id = %device_id,
                        error = %error,
                        "device status fetch failed"
                    );
                }
            }
        }

        if failures == station.device_ids.len() && !station.device_ids.is_empty() {
            return Err(ProviderError::AllDevicesFailed {
                station: station.name.clone(),
                device_count: failures,
            });
        }

        Ok(sum)
    }

    /// Fetch every station of this vendor concurrently. A failed station is
    /// still emitted with zero counters and its static metadata, so it shows
    /// up as "zero available" instead of vanishing from the merged view.
    async fn fetch_all(&self, client: &Client) -> Result<Vec<AggregatedStatus>, ProviderError> {
        let stations = self.stations();
        if stations.is_empty() {
            return Ok(Vec::new());
        }

        let calls = stations
            .iter()
            .map(|station| self.fetch_station_status(client, station));
        let results = join_all(calls).await;

        let mut rows = Vec::with_capacity(stations.len());
        for (station, result) in stations.iter().zip(results) {
            match result {
                Ok(usage) => rows.push(AggregatedStatus::from_station(station, &usage)),
                Err(error) => {
                    tracing::warn!(
                        vendor = self.vendor_id(),
                        station = %station.name,
                        error = %error,
                        "station unavailable, emitting zero counters"
                    );
                    rows.push(AggregatedStatus::unavailable(station));
                }
            }
        }

        Ok(rows)
    }
}

/// Fixed, compiled-in vendor set built once at startup. Dispatch is through
/// the trait object, never by matching on vendor name strings.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn VendorAdapter>>,
}

impl ProviderRegistry {
    /// Construct every adapter, load its catalog, and register it. A vendor
    /// whose catalog fails to load is registered with an empty station list
    /// so the other vendors keep working.
    pub fn bootstrap(data_dir: &Path, config: &AppConfig) -> Self {
        let adapters: Vec<Box<dyn VendorAdapter>> = vec![
            Box::new(NeptuneAdapter::new()),
            Box::new(NeptuneJuniorAdapter::new(
                config.neptune_junior_openid.clone(),
                config.neptune_junior_unionid.clone(),
            )),
            Box::new(DlmmAdapter::new(config.dlmm_token.clone())),
            Box::new(DuduAdapter::new()),
            Box::new(DuohangAdapter::new(config.duohang_token.clone())),
        ];

        let mut providers: Vec<Arc<dyn VendorAdapter>> = Vec::with_capacity(adapters.len());
        for mut adapter in adapters {
            match adapter.load_stations(data_dir) {
                Ok(count) => {
                    tracing::info!(
                        vendor = adapter.vendor_id(),
                        station_count = count,
                        "vendor registered"
                    );
                }
                Err(error) => {
                    tracing::error!(
                        vendor = adapter.vendor_id(),
                        error = %error,
                        "vendor catalog failed to load, registering with empty catalog"
                    );
                }
            }
            providers.push(Arc::from(adapter));
        }

        Self { providers }
    }

    #[cfg(test)]
    pub fn from_adapters(providers: Vec<Arc<dyn VendorAdapter>>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[Arc<dyn VendorAdapter>] {
        &self.providers
    }

    pub fn get(&self, vendor_id: &str) -> Option<&Arc<dyn VendorAdapter>> {
        self.providers
            .iter()
            .find(|provider| provider.vendor_id() == vendor_id)
    }

    pub fn vendor_ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.vendor_id()).collect()
    }

    /// Every vendor's station definitions, used for the metadata sync into
    /// the stations table at startup.
    pub fn all_stations(&self) -> Vec<Station> {
        self.providers
            .iter()
            .flat_map(|provider| provider.stations().iter().cloned())
            .collect()
    }
}
