use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::CacheError;
use crate::app::orchestrator::FetchOrchestrator;
use crate::domain::aggregate::{StatusFilter, aggregate_by_identity, apply_filter};
use crate::domain::station::{AggregatedStatus, Station, now_utc8_iso};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] CacheError),
    #[error("device id filter requires a provider filter")]
    DeviceFilterRequiresVendor,
    #[error("no status data available yet")]
    NoData,
}

/// The merged view served to readers. `stale` marks a response that is known
/// to predate the current cycle: a replay from the in-memory fallback, or a
/// cached snapshot served while the last cycle failed entirely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub updated_at: String,
    pub stale: bool,
    pub stations: Vec<AggregatedStatus>,
}

/// Read-side service. Answers from the SQLite cache, falls back to the last
/// in-memory snapshot when the cache cannot be read, and as a last resort
/// (cold start, empty cache) fetches live from the vendors.
#[derive(Clone)]
pub struct StatusService {
    connection: Arc<Mutex<Connection>>,
    fallback: Arc<RwLock<Option<StatusResponse>>>,
    degraded: Arc<AtomicBool>,
    orchestrator: Arc<FetchOrchestrator>,
}

impl StatusService {
    pub fn new(connection: Arc<Mutex<Connection>>, orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self {
            connection,
            fallback: Arc::new(RwLock::new(None)),
            degraded: Arc::new(AtomicBool::new(false)),
            orchestrator,
        }
    }

    /// Set by the scheduler: `true` after a cycle in which every vendor
    /// failed, `false` again after the next successful cycle. While set,
    /// cached reads are marked stale because they predate the failed cycle.
    pub fn mark_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, CacheError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }

    pub fn vendor_ids(&self) -> Vec<&'static str> {
        self.orchestrator.registry().vendor_ids()
    }

    pub fn list_stations(&self) -> Result<Vec<Station>, ServiceError> {
        self.with_connection(db::load_stations)
    }

    /// Keep a response as the stale fallback for later reads. Called after
    /// every successful refresh cycle and after serving a fresh read.
    pub fn remember(&self, response: StatusResponse) {
        if let Ok(mut slot) = self.fallback.write() {
            *slot = Some(response);
        }
    }

    /// Serve the merged status view, narrowed by `filter`.
    ///
    /// Resolution order: SQLite cache, then the in-memory fallback marked
    /// `stale`, then a live vendor fetch. Only when all three come up empty
    /// does the call fail with [`ServiceError::NoData`].
    pub async fn get_latest(&self, filter: &StatusFilter) -> Result<StatusResponse, ServiceError> {
        if filter.device_id.is_some() && filter.vendor.is_none() {
            return Err(ServiceError::DeviceFilterRequiresVendor);
        }

        match self.read_cache() {
            Ok(Some(mut response)) => {
                self.remember(response.clone());
                response.stale = self.degraded.load(Ordering::Relaxed);
                return Ok(narrow(response, filter));
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(error = %error, "cache read failed, trying stale fallback");
            }
        }

        // Covers both an unreadable cache and an empty one whose cycles only
        // ever reached memory.
        if let Some(response) = self.stale_fallback() {
            return Ok(narrow(response, filter));
        }

        // Cold start or unreadable cache with no fallback: go to the vendors.
        // `fetch_live` already filters and dedups.
        let stations = self.orchestrator.fetch_live(filter).await;
        if stations.is_empty() {
            return Err(ServiceError::NoData);
        }

        // The fallback is fed by scheduler cycles and cache reads only.
        Ok(StatusResponse {
            updated_at: now_utc8_iso(),
            stale: false,
            stations,
        })
    }

    fn stale_fallback(&self) -> Option<StatusResponse> {
        let slot = self.fallback.read().ok()?;
        slot.clone().map(|mut response| {
            response.stale = true;
            response
        })
    }

    /// Join the `latest` counters with station metadata. Counter rows whose
    /// station is gone from the catalog are dropped.
    fn read_cache(&self) -> Result<Option<StatusResponse>, ServiceError> {
        self.with_connection(|connection| {
            let Some(snapshot) = db::load_latest(connection)? else {
                return Ok(None);
            };
            let stations = db::load_stations(connection)?;
            let by_hash: HashMap<&str, &Station> = stations
                .iter()
                .map(|station| (station.hash_id.as_str(), station))
                .collect();

            let mut rows = Vec::with_capacity(snapshot.rows.len());
            for row in &snapshot.rows {
                let Some(station) = by_hash.get(row.hash_id.as_str()) else {
                    tracing::debug!(hash_id = %row.hash_id, "counter row without station metadata");
                    continue;
                };
                rows.push(AggregatedStatus {
                    provider: station.vendor.clone(),
                    hash_id: station.hash_id.clone(),
                    name: station.name.clone(),
                    campus_id: station.campus_id,
                    campus_name: station.campus_name.clone(),
                    lat: station.lat,
                    lon: station.lon,
                    device_ids: station.device_ids.clone(),
                    updated_at: row.snapshot_time.clone(),
                    free: row.free,
                    used: row.used,
                    total: row.total,
                    error: row.error,
                });
            }

            if rows.is_empty() {
                return Ok(None);
            }

            Ok(Some(StatusResponse {
                updated_at: snapshot.updated_at,
                stale: false,
                stations: rows,
            }))
        })
    }
}

// Filtering runs before the first-wins dedup so a device filter can select
// a row whose hash_id collides with an earlier one.
fn narrow(mut response: StatusResponse, filter: &StatusFilter) -> StatusResponse {
    response.stations = aggregate_by_identity(apply_filter(response.stations, filter));
    response
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use reqwest::Client;

    use crate::adapters::db::{upsert_stations, write_latest};
    use crate::adapters::providers::{ProviderError, ProviderRegistry, VendorAdapter};
    use crate::app::orchestrator::FetchOrchestrator;
    use crate::test_support::open_test_connection;
    use crate::domain::aggregate::StatusFilter;
    use crate::domain::station::{AggregatedStatus, Station, UsageSnapshot};

    use super::{ServiceError, StatusResponse, StatusService};

    struct CannedAdapter {
        stations: Vec<Station>,
    }

    #[async_trait]
    impl VendorAdapter for CannedAdapter {
        fn vendor_id(&self) -> &'static str {
            "canned"
        }

        fn stations(&self) -> &[Station] {
            &self.stations
        }

        fn load_stations(&mut self, _data_dir: &Path) -> Result<usize, ProviderError> {
            Ok(self.stations.len())
        }

        async fn fetch_device_status(
            &self,
            _client: &Client,
            _device_id: &str,
        ) -> Result<UsageSnapshot, ProviderError> {
            Ok(UsageSnapshot {
                free: 3,
                used: 1,
                total: 4,
                error: 0,
            })
        }
    }

    fn sample_station(vendor: &str, name: &str) -> Station {
        Station::new(name, vendor, 1, 30.0, 120.0, vec![format!("{name}-dev")])
    }

    fn service_with(stations: Vec<Station>) -> StatusService {
        let connection = open_test_connection("status-service");
        let registry = ProviderRegistry::from_adapters(vec![Arc::new(CannedAdapter { stations })]);
        let orchestrator = Arc::new(FetchOrchestrator::new(Arc::new(registry), Client::new()));
        StatusService::new(Arc::new(Mutex::new(connection)), orchestrator)
    }

    fn seed_cache(service: &StatusService, stations: &[Station], snapshot_time: &str) {
        let rows: Vec<AggregatedStatus> = stations
            .iter()
            .map(|station| {
                AggregatedStatus::from_station(
                    station,
                    &UsageSnapshot {
                        free: 2,
                        used: 2,
                        total: 5,
                        error: 1,
                    },
                )
            })
            .collect();

        let mut connection = service.connection.lock().expect("lock should not be poisoned");
        upsert_stations(&mut connection, stations).expect("station upsert should succeed");
        write_latest(&mut connection, snapshot_time, &rows).expect("latest write should succeed");
    }

    #[tokio::test]
    async fn serves_cached_rows_as_fresh() {
        let stations = vec![sample_station("canned", "A"), sample_station("canned", "B")];
        let service = service_with(stations.clone());
        seed_cache(&service, &stations, "2026-08-30T12:00:00+08:00");

        let response = service
            .get_latest(&StatusFilter::default())
            .await
            .expect("cached read should succeed");

        assert!(!response.stale);
        assert_eq!(response.updated_at, "2026-08-30T12:00:00+08:00");
        assert_eq!(response.stations.len(), 2);
        assert_eq!(response.stations[0].free, 2);
    }

    #[tokio::test]
    async fn empty_cache_falls_back_to_live_fetch() {
        let stations = vec![sample_station("canned", "A")];
        let service = service_with(stations);

        let response = service
            .get_latest(&StatusFilter::default())
            .await
            .expect("live fallback should succeed");

        assert!(!response.stale);
        assert_eq!(response.stations.len(), 1);
        assert_eq!(response.stations[0].free, 3);
    }

    #[tokio::test]
    async fn remembered_response_is_replayed_as_stale() {
        let service = service_with(Vec::new());
        let station = sample_station("canned", "A");
        service.remember(StatusResponse {
            updated_at: "2026-08-30T11:55:00+08:00".to_string(),
            stale: false,
            stations: vec![AggregatedStatus::unavailable(&station)],
        });

        let replayed = service.stale_fallback().expect("fallback should exist");
        assert!(replayed.stale);
        assert_eq!(replayed.updated_at, "2026-08-30T11:55:00+08:00");
    }

    #[tokio::test]
    async fn no_cache_no_fallback_no_stations_is_an_error() {
        let service = service_with(Vec::new());

        let result = service.get_latest(&StatusFilter::default()).await;

        assert!(matches!(result, Err(ServiceError::NoData)));
    }

    #[tokio::test]
    async fn device_filter_without_vendor_is_rejected() {
        let service = service_with(Vec::new());

        let result = service
            .get_latest(&StatusFilter {
                device_id: Some("40459001".to_string()),
                ..StatusFilter::default()
            })
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::DeviceFilterRequiresVendor)
        ));
    }

    #[tokio::test]
    async fn device_filter_selects_among_identity_collisions() {
        // Same vendor and name, different devices: both rows collide to one
        // hash_id, and the device filter must be applied before dedup so
        // dev-2's row survives.
        let stations = vec![
            Station::new("A", "canned", 1, 30.0, 120.0, vec!["dev-1".to_string()]),
            Station::new("A", "canned", 1, 30.0, 120.0, vec!["dev-2".to_string()]),
        ];
        let service = service_with(stations);

        let response = service
            .get_latest(&StatusFilter {
                vendor: Some("canned".to_string()),
                device_id: Some("dev-2".to_string()),
                ..StatusFilter::default()
            })
            .await
            .expect("filtered live read should succeed");

        assert_eq!(response.stations.len(), 1);
        assert!(response.stations[0].device_ids.contains(&"dev-2".to_string()));
    }

    #[tokio::test]
    async fn vendor_filter_narrows_cached_view() {
        let stations = vec![sample_station("canned", "A"), sample_station("other", "B")];
        let service = service_with(stations.clone());
        seed_cache(&service, &stations, "2026-08-30T12:00:00+08:00");

        let response = service
            .get_latest(&StatusFilter {
                vendor: Some("other".to_string()),
                ..StatusFilter::default()
            })
            .await
            .expect("filtered read should succeed");

        assert_eq!(response.stations.len(), 1);
        assert_eq!(response.stations[0].provider, "other");
    }
}
