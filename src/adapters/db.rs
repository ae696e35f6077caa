use chrono::DateTime;
use rusqlite::{Connection, params};
use thiserror::Error;

use crate::domain::station::{AggregatedStatus, Station};

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS stations (
    hash_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    vendor TEXT NOT NULL,
    campus_id INTEGER NOT NULL,
    campus_name TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    device_ids TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS latest (
    hash_id TEXT PRIMARY KEY,
    snapshot_time TEXT NOT NULL,
    free INTEGER NOT NULL,
    used INTEGER NOT NULL,
    total INTEGER NOT NULL,
    error INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash_id TEXT NOT NULL,
    snapshot_time TEXT NOT NULL,
    free INTEGER NOT NULL,
    used INTEGER NOT NULL,
    total INTEGER NOT NULL,
    error INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_hash_id_snapshot_time
ON usage (hash_id, snapshot_time);
"#,
)];

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("cycle snapshot time is missing; refusing to write rows without a timestamp")]
    MissingSnapshotTime,
    #[error("failed to encode device id list: {0}")]
    DeviceIdsEncoding(#[from] serde_json::Error),
}

pub fn open_connection(path: &str) -> Result<Connection, CacheError> {
    Connection::open(path).map_err(CacheError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), CacheError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(CacheError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, CacheError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// One `latest`/`usage` row: the four counters keyed by station identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRow {
    pub hash_id: String,
    pub snapshot_time: String,
    pub free: u32,
    pub used: u32,
    pub total: u32,
    pub error: u32,
}

/// The most recent reading per station plus the snapshot's own timestamp
/// (max over all row timestamps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub updated_at: String,
    pub rows: Vec<UsageRow>,
}

fn require_snapshot_time(snapshot_time: &str) -> Result<&str, CacheError> {
    let trimmed = snapshot_time.trim();
    if trimmed.is_empty() {
        return Err(CacheError::MissingSnapshotTime);
    }
    Ok(trimmed)
}

/// Sync station metadata. Upsert keyed by `hash_id`; device ids stored as a
/// JSON array column.
pub fn upsert_stations(
    connection: &mut Connection,
    stations: &[Station],
) -> Result<usize, CacheError> {
    let transaction = connection.transaction()?;
    let mut written = 0_usize;

    {
        let mut statement = transaction.prepare(
            "INSERT INTO stations (hash_id, name, vendor, campus_id, campus_name, lat, lon, device_ids, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(hash_id) DO UPDATE SET
                 name = excluded.name,
                 vendor = excluded.vendor,
                 campus_id = excluded.campus_id,
                 campus_name = excluded.campus_name,
                 lat = excluded.lat,
                 lon = excluded.lon,
                 device_ids = excluded.device_ids,
                 updated_at = excluded.updated_at",
        )?;

        for station in stations {
            let device_ids = serde_json::to_string(&station.device_ids)?;
            statement.execute(params![
                station.hash_id,
                station.name,
                station.vendor,
                station.campus_id,
                station.campus_name,
                station.lat,
                station.lon,
                device_ids,
                station.updated_at,
            ])?;
            written += 1;
        }
    }

    transaction.commit()?;
    Ok(written)
}

/// Upsert the cycle's readings into `latest`, one row per station. All rows
/// share the cycle timestamp; a missing timestamp rejects the whole write.
pub fn write_latest(
    connection: &mut Connection,
    snapshot_time: &str,
    stations: &[AggregatedStatus],
) -> Result<usize, CacheError> {
    let snapshot_time = require_snapshot_time(snapshot_time)?;

    let transaction = connection.transaction()?;
    let mut written = 0_usize;

    {
        let mut statement = transaction.prepare(
            "INSERT INTO latest (hash_id, snapshot_time, free, used, total, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(hash_id) DO UPDATE SET
                 snapshot_time = excluded.snapshot_time,
                 free = excluded.free,
                 used = excluded.used,
                 total = excluded.total,
                 error = excluded.error",
        )?;

        for station in stations {
            statement.execute(params![
                station.hash_id,
                snapshot_time,
                station.free,
                station.used,
                station.total,
                station.error,
            ])?;
            written += 1;
        }
    }

    transaction.commit()?;
    Ok(written)
}

/// Append the cycle's readings to the `usage` history log. Never mutates or
/// deletes prior rows; shares the timestamp rule with `write_latest`.
pub fn append_history(
    connection: &mut Connection,
    snapshot_time: &str,
    stations: &[AggregatedStatus],
) -> Result<usize, CacheError> {
    let snapshot_time = require_snapshot_time(snapshot_time)?;

    let transaction = connection.transaction()?;
    let mut written = 0_usize;

    {
        let mut statement = transaction.prepare(
            "INSERT INTO usage (hash_id, snapshot_time, free, used, total, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for station in stations {
            statement.execute(params![
                station.hash_id,
                snapshot_time,
                station.free,
                station.used,
                station.total,
                station.error,
            ])?;
            written += 1;
        }
    }

    transaction.commit()?;
    Ok(written)
}

/// Read the full `latest` table. Returns `None` when the table has no rows,
/// so callers can distinguish "no cache yet" from an empty fetch result.
pub fn load_latest(connection: &Connection) -> Result<Option<CacheSnapshot>, CacheError> {
    let mut statement = connection.prepare(
        "SELECT hash_id, snapshot_time, free, used, total, error
         FROM latest
         ORDER BY hash_id",
    )?;

    let mapped = statement.query_map([], |row| {
        Ok(UsageRow {
            hash_id: row.get(0)?,
            snapshot_time: row.get(1)?,
            free: row.get(2)?,
            used: row.get(3)?,
            total: row.get(4)?,
            error: row.get(5)?,
        })
    })?;

    let mut rows = Vec::new();
    for row in mapped {
        rows.push(row?);
    }

    if rows.is_empty() {
        return Ok(None);
    }

    let updated_at = max_snapshot_time(&rows);
    Ok(Some(CacheSnapshot { updated_at, rows }))
}

pub fn load_stations(connection: &Connection) -> Result<Vec<Station>, CacheError> {
    let mut statement = connection.prepare(
        "SELECT hash_id, name, vendor, campus_id, campus_name, lat, lon, device_ids, updated_at
         FROM stations
         ORDER BY vendor, name",
    )?;

    let mapped = statement.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, f64>(5)?,
            row.get::<_, f64>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut stations = Vec::new();
    for row in mapped {
        let (hash_id, name, vendor, campus_id, campus_name, lat, lon, device_ids, updated_at) =
            row?;
        stations.push(Station {
            hash_id,
            name,
            vendor,
            campus_id,
            campus_name,
            lat,
            lon,
            device_ids: serde_json::from_str(&device_ids)?,
            updated_at,
        });
    }

    Ok(stations)
}

pub fn count_history_rows(connection: &Connection) -> Result<i64, CacheError> {
    let count = connection.query_row("SELECT COUNT(*) FROM usage", [], |row| row.get(0))?;
    Ok(count)
}

fn max_snapshot_time(rows: &[UsageRow]) -> String {
    let mut best_parsed: Option<(DateTime<chrono::FixedOffset>, &str)> = None;
    for row in rows {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&row.snapshot_time)
            && best_parsed.is_none_or(|(current, _)| parsed > current)
        {
            best_parsed = Some((parsed, &row.snapshot_time));
        }
    }

    if let Some((_, raw)) = best_parsed {
        return raw.to_string();
    }

    // Unparseable timestamps: fall back to the lexicographic max, which is
    // correct for rows sharing one offset.
    rows.iter()
        .map(|row| row.snapshot_time.as_str())
        .max()
        .unwrap_or_default()
        .to_string()
}
