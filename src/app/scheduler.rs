use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use rusqlite::Connection;

use crate::adapters::db;
use crate::app::config::AppConfig;
use crate::app::orchestrator::FetchOrchestrator;
use crate::app::services::{StatusResponse, StatusService};
use crate::domain::aggregate::{aggregate_by_identity, merge_vendor_results};
use crate::domain::station::now_utc8_iso;

/// Periodic refresh loop. Owns the write path: orchestrated fetch, merge,
/// then cache write. Skips cycles inside the configured quiet window.
pub struct RefreshScheduler {
    orchestrator: Arc<FetchOrchestrator>,
    connection: Arc<Mutex<Connection>>,
    service: StatusService,
    interval: Duration,
    quiet_start: NaiveTime,
    quiet_end: NaiveTime,
    history_enabled: bool,
}

/// Inclusive membership test for the quiet window. A window whose start is
/// after its end wraps past midnight.
pub fn in_quiet_hours(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}

impl RefreshScheduler {
    pub fn new(
        orchestrator: Arc<FetchOrchestrator>,
        connection: Arc<Mutex<Connection>>,
        service: StatusService,
        config: &AppConfig,
    ) -> Self {
        Self {
            orchestrator,
            connection,
            service,
            interval: Duration::from_secs(config.fetch_interval_secs),
            quiet_start: config.quiet_start,
            quiet_end: config.quiet_end,
            history_enabled: config.history_enabled,
        }
    }

    /// Run forever. The first cycle fires immediately unless the process
    /// starts inside the quiet window.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            quiet_start = %self.quiet_start,
            quiet_end = %self.quiet_end,
            history_enabled = self.history_enabled,
            "refresh scheduler started"
        );

        loop {
            let local_time = local_wall_clock();
            if in_quiet_hours(local_time, self.quiet_start, self.quiet_end) {
                tracing::debug!(local_time = %local_time, "inside quiet window, skipping cycle");
            } else {
                self.run_cycle().await;
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One fetch-merge-write cycle. When every vendor failed the cache is
    /// left untouched so readers keep seeing the previous snapshot.
    pub async fn run_cycle(&self) {
        let results = self.orchestrator.fetch_all_vendors().await;

        if results.values().all(|result| !result.is_success()) {
            tracing::error!(
                vendor_count = results.len(),
                "every vendor failed this cycle, keeping previous cache"
            );
            self.service.mark_degraded(true);
            return;
        }

        let failed: Vec<&str> = results
            .iter()
            .filter(|(_, result)| !result.is_success())
            .map(|(vendor, _)| vendor.as_str())
            .collect();
        if !failed.is_empty() {
            tracing::warn!(vendors = ?failed, "vendors missing from this cycle");
        }

        let merged = aggregate_by_identity(merge_vendor_results(&results));
        let snapshot_time = now_utc8_iso();

        match self.write_cycle(&snapshot_time, &merged) {
            Ok(written) => {
                tracing::info!(
                    station_count = written,
                    snapshot_time = %snapshot_time,
                    "cycle written to cache"
                );
            }
            Err(error) => {
                // The in-memory fallback below still gets this cycle.
                tracing::error!(error = %error, "cache write failed");
            }
        }

        self.service.remember(StatusResponse {
            updated_at: snapshot_time,
            stale: false,
            stations: merged,
        });
        self.service.mark_degraded(false);
    }

    fn write_cycle(
        &self,
        snapshot_time: &str,
        merged: &[crate::domain::station::AggregatedStatus],
    ) -> Result<usize, db::CacheError> {
        let mut connection = match self.connection.lock() {
            Ok(connection) => connection,
            Err(_) => {
                tracing::error!("database lock poisoned, skipping cache write");
                return Ok(0);
            }
        };

        db::upsert_stations(&mut connection, &self.orchestrator.registry().all_stations())?;
        let written = db::write_latest(&mut connection, snapshot_time, merged)?;
        if self.history_enabled {
            db::append_history(&mut connection, snapshot_time, merged)?;
        }
        Ok(written)
    }
}

fn local_wall_clock() -> NaiveTime {
    Utc::now().with_timezone(&crate::domain::station::utc8_offset()).time()
}
