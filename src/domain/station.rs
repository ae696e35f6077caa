use std::path::Path;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Campus id to display name table. Ids outside this table resolve to an
/// empty campus name rather than an error.
const CAMPUS_NAMES: &[(i64, &str)] = &[(1, "Yuquan Campus"), (2, "Zijingang Campus")];

/// All station timestamps use a fixed UTC+8 offset, matching the vendors'
/// local time.
pub fn utc8_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

pub fn now_utc8_iso() -> String {
    Utc::now().with_timezone(&utc8_offset()).to_rfc3339()
}

pub fn campus_name(campus_id: i64) -> String {
    CAMPUS_NAMES
        .iter()
        .find(|(id, _)| *id == campus_id)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_default()
}

/// Deterministic 8-hex-char station identity derived from vendor and name.
/// The combined string is trimmed and lowercased before hashing, so casing
/// and surrounding whitespace never split one station into two identities.
pub fn station_hash_id(vendor: &str, name: &str) -> String {
    let base = format!("{vendor}:{name}").trim().to_lowercase();
    let digest = md5::compute(base.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

/// Point-in-time port counts for one station or device.
///
/// `total == free + used + error` is the design intent, but vendor counts
/// are passed through as reported; some vendors count pools the schema does
/// not model (see the dudu and neptune-junior adapters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub free: u32,
    pub used: u32,
    pub total: u32,
    pub error: u32,
}

impl UsageSnapshot {
    /// Vendor-reported counts are untrusted, so sums saturate instead of
    /// overflowing.
    pub fn add(&mut self, other: &UsageSnapshot) {
        self.free = self.free.saturating_add(other.free);
        self.used = self.used.saturating_add(other.used);
        self.total = self.total.saturating_add(other.total);
        self.error = self.error.saturating_add(other.error);
    }
}

/// One physical charging or swap location. Immutable after construction;
/// derived fields are computed by [`Station::new`] before the value exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub hash_id: String,
    pub name: String,
    pub vendor: String,
    pub campus_id: i64,
    pub campus_name: String,
    pub lat: f64,
    pub lon: f64,
    pub device_ids: Vec<String>,
    pub updated_at: String,
}

impl Station {
    pub fn new(
        name: &str,
        vendor: &str,
        campus_id: i64,
        lat: f64,
        lon: f64,
        device_ids: Vec<String>,
    ) -> Self {
        let name = name.trim().to_string();
        let vendor = vendor.trim().to_string();
        let device_ids: Vec<String> = device_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        Self {
            hash_id: station_hash_id(&vendor, &name),
            campus_name: campus_name(campus_id),
            name,
            vendor,
            campus_id,
            lat,
            lon,
            device_ids,
            updated_at: now_utc8_iso(),
        }
    }
}

/// A station merged with its latest usage snapshot; the unit served to
/// readers and written to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStatus {
    pub provider: String,
    pub hash_id: String,
    pub name: String,
    pub campus_id: i64,
    pub campus_name: String,
    pub lat: f64,
    pub lon: f64,
    pub device_ids: Vec<String>,
    pub updated_at: String,
    pub free: u32,
    pub used: u32,
    pub total: u32,
    pub error: u32,
}

impl AggregatedStatus {
    pub fn from_station(station: &Station, usage: &UsageSnapshot) -> Self {
        Self {
            provider: station.vendor.clone(),
            hash_id: station.hash_id.clone(),
            name: station.name.clone(),
            campus_id: station.campus_id,
            campus_name: station.campus_name.clone(),
            lat: station.lat,
            lon: station.lon,
            device_ids: station.device_ids.clone(),
            updated_at: station.updated_at.clone(),
            free: usage.free,
            used: usage.used,
            total: usage.total,
            error: usage.error,
        }
    }

    /// Zero-filled row for a station whose every device call failed. The
    /// station stays visible in the merged view instead of disappearing.
    pub fn unavailable(station: &Station) -> Self {
        Self::from_station(station, &UsageSnapshot::default())
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Device id column as it appears in catalog files: either a JSON array
/// (strings or numbers) or a single semicolon-joined string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDeviceIds {
    List(Vec<serde_json::Value>),
    Joined(String),
}

impl RawDeviceIds {
    fn into_ids(self) -> Vec<String> {
        match self {
            RawDeviceIds::List(values) => values
                .into_iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            RawDeviceIds::Joined(raw) => raw.split(';').map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    #[serde(default)]
    campus: i64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    device_ids: Option<RawDeviceIds>,
}

const DEFAULT_LAT: f64 = 30.0;
const DEFAULT_LON: f64 = 120.0;

/// Load a vendor's station definitions from `<data_dir>/<vendor>_stations.json`.
///
/// Stations without any device id are dropped; they cannot be polled. A
/// missing catalog file yields an empty list so the vendor still registers.
pub fn load_station_catalog(data_dir: &Path, vendor: &str) -> Result<Vec<Station>, CatalogError> {
    let path = data_dir.join(format!("{vendor}_stations.json"));
    if !path.exists() {
        tracing::warn!(vendor, path = %path.display(), "station catalog file not found");
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(&path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let entries: Vec<CatalogEntry> =
        serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    let stations = entries
        .into_iter()
        .map(|entry| {
            Station::new(
                &entry.name,
                vendor,
                entry.campus,
                entry.lat.unwrap_or(DEFAULT_LAT),
                entry.lon.unwrap_or(DEFAULT_LON),
                entry.device_ids.map(RawDeviceIds::into_ids).unwrap_or_default(),
            )
        })
        .filter(|station| !station.device_ids.is_empty())
        .collect();

    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::{AggregatedStatus, Station, UsageSnapshot, load_station_catalog, station_hash_id};

    #[test]
    fn hash_id_is_pure_over_vendor_and_name() {
        let first = station_hash_id("neptune", "West Gate");
        let second = station_hash_id("neptune", "West Gate");
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_id_normalizes_case_and_whitespace() {
        assert_eq!(
            station_hash_id("Neptune", "West Gate  "),
            station_hash_id("neptune", "west gate")
        );
    }

    #[test]
    fn hash_id_differs_across_vendors_and_names() {
        assert_ne!(
            station_hash_id("neptune", "West Gate"),
            station_hash_id("dlmm", "West Gate")
        );
        assert_ne!(
            station_hash_id("neptune", "West Gate"),
            station_hash_id("neptune", "East Gate")
        );
    }

    #[test]
    fn constructor_computes_derived_fields() {
        let station = Station::new(
            " Dorm 7 ",
            "neptune",
            2,
            30.3,
            120.08,
            vec!["40459001".to_string(), " ".to_string(), "40459002".to_string()],
        );

        assert_eq!(station.name, "Dorm 7");
        assert_eq!(station.hash_id, station_hash_id("neptune", "Dorm 7"));
        assert_eq!(station.campus_name, "Zijingang Campus");
        assert_eq!(station.device_ids, vec!["40459001", "40459002"]);
    }

    #[test]
    fn unknown_campus_gets_empty_name() {
        let station = Station::new("X", "neptune", 99, 30.0, 120.0, vec!["1".to_string()]);
        assert_eq!(station.campus_name, "");
    }

    #[test]
    fn unavailable_row_keeps_metadata_with_zero_counters() {
        let station = Station::new("Dorm 7", "neptune", 2, 30.3, 120.08, vec!["1".to_string()]);
        let row = AggregatedStatus::unavailable(&station);

        assert_eq!(row.hash_id, station.hash_id);
        assert_eq!(row.name, "Dorm 7");
        assert_eq!((row.free, row.used, row.total, row.error), (0, 0, 0, 0));
    }

    #[test]
    fn snapshot_add_sums_all_counters() {
        let mut sum = UsageSnapshot::default();
        sum.add(&UsageSnapshot {
            free: 1,
            used: 2,
            total: 4,
            error: 1,
        });
        sum.add(&UsageSnapshot {
            free: 3,
            used: 0,
            total: 3,
            error: 0,
        });
        assert_eq!(
            sum,
            UsageSnapshot {
                free: 4,
                used: 2,
                total: 7,
                error: 1
            }
        );
    }

    #[test]
    fn snapshot_add_saturates_on_absurd_counts() {
        let mut sum = UsageSnapshot {
            free: u32::MAX - 1,
            used: 0,
            total: u32::MAX,
            error: 0,
        };
        sum.add(&UsageSnapshot {
            free: 5,
            used: 1,
            total: 5,
            error: 0,
        });
        assert_eq!(sum.free, u32::MAX);
        assert_eq!(sum.total, u32::MAX);
        assert_eq!(sum.used, 1);
    }

    #[test]
    fn catalog_accepts_array_and_joined_device_ids() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(
            dir.path().join("neptune_stations.json"),
            r#"[
                {"name": "Dorm 7", "campus": 2, "lat": 30.3, "lon": 120.08, "device_ids": ["40459001", 40459002]},
                {"name": "Gym", "campus": 1, "device_ids": "50559001;50559002"},
                {"name": "No Devices", "campus": 1}
            ]"#,
        )
        .expect("catalog file should be writable");

        let stations =
            load_station_catalog(dir.path(), "neptune").expect("catalog should parse");

        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].device_ids, vec!["40459001", "40459002"]);
        assert_eq!(stations[1].device_ids, vec!["50559001", "50559002"]);
    }

    #[test]
    fn missing_catalog_file_yields_empty_list() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let stations = load_station_catalog(dir.path(), "dlmm").expect("missing file is not fatal");
        assert!(stations.is_empty());
    }
}
