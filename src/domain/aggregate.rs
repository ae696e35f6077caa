use std::collections::{BTreeMap, HashSet};

use crate::domain::station::AggregatedStatus;

/// Outcome of one vendor's fetch within an orchestration cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorResult {
    Success(Vec<AggregatedStatus>),
    Failure(String),
}

impl VendorResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VendorResult::Success(_))
    }
}

/// Concatenate all successful vendors' station lists. No cross-vendor dedup
/// is attempted: vendor is part of the hash input, so two vendors can never
/// share a `hash_id`.
pub fn merge_vendor_results(results: &BTreeMap<String, VendorResult>) -> Vec<AggregatedStatus> {
    let mut merged = Vec::new();
    for result in results.values() {
        if let VendorResult::Success(stations) = result {
            merged.extend(stations.iter().cloned());
        }
    }
    merged
}

/// First-wins dedup by `hash_id`. Later duplicates are redundant reports of
/// the same station, not partial readings, so they are discarded rather
/// than numerically merged. Idempotent.
pub fn aggregate_by_identity(stations: Vec<AggregatedStatus>) -> Vec<AggregatedStatus> {
    let mut seen = HashSet::new();
    stations
        .into_iter()
        .filter(|station| seen.insert(station.hash_id.clone()))
        .collect()
}

/// Read-side narrowing, applied before the first-wins dedup step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFilter {
    pub vendor: Option<String>,
    pub hash_id: Option<String>,
    pub device_id: Option<String>,
}

impl StatusFilter {
    pub fn is_empty(&self) -> bool {
        self.vendor.is_none() && self.hash_id.is_none() && self.device_id.is_none()
    }

    pub fn matches(&self, station: &AggregatedStatus) -> bool {
        if let Some(vendor) = &self.vendor
            && station.provider != *vendor
        {
            return false;
        }
        if let Some(hash_id) = &self.hash_id
            && station.hash_id != *hash_id
        {
            return false;
        }
        if let Some(device_id) = &self.device_id
            && !station.device_ids.iter().any(|id| id == device_id)
        {
            return false;
        }
        true
    }
}

pub fn apply_filter(stations: Vec<AggregatedStatus>, filter: &StatusFilter) -> Vec<AggregatedStatus> {
    if filter.is_empty() {
        return stations;
    }
    stations
        .into_iter()
        .filter(|station| filter.matches(station))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::domain::station::{AggregatedStatus, Station, UsageSnapshot};

    use super::{StatusFilter, VendorResult, aggregate_by_identity, apply_filter, merge_vendor_results};

    fn row(vendor: &str, name: &str, free: u32) -> AggregatedStatus {
        let station = Station::new(
            name,
            vendor,
            1,
            30.0,
            120.0,
            vec![format!("{name}-dev")],
        );
        AggregatedStatus::from_station(
            &station,
            &UsageSnapshot {
                free,
                used: 0,
                total: free,
                error: 0,
            },
        )
    }

    #[test]
    fn merge_skips_failed_vendors_without_touching_others() {
        let mut results = BTreeMap::new();
        results.insert(
            "neptune".to_string(),
            VendorResult::Success(vec![row("neptune", "A", 1), row("neptune", "B", 2)]),
        );
        results.insert(
            "dlmm".to_string(),
            VendorResult::Failure("connection refused".to_string()),
        );

        let merged = merge_vendor_results(&results);

        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|s| s.provider == "neptune"));
    }

    #[test]
    fn identity_dedup_keeps_first_seen_entry() {
        let first = row("neptune", "A", 5);
        let mut second = row("neptune", "A", 9);
        second.used = 3;

        let deduped = aggregate_by_identity(vec![first.clone(), second]);

        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0], first);
    }

    #[test]
    fn identity_dedup_is_idempotent() {
        let rows = vec![row("neptune", "A", 5), row("neptune", "A", 9), row("dlmm", "B", 1)];
        let once = aggregate_by_identity(rows);
        let twice = aggregate_by_identity(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn filter_by_vendor_hash_and_device() {
        let rows = vec![row("neptune", "A", 1), row("dlmm", "B", 2)];

        let by_vendor = apply_filter(
            rows.clone(),
            &StatusFilter {
                vendor: Some("dlmm".to_string()),
                ..StatusFilter::default()
            },
        );
        assert_eq!(by_vendor.len(), 1);
        assert_eq!(by_vendor[0].name, "B");

        let by_hash = apply_filter(
            rows.clone(),
            &StatusFilter {
                hash_id: Some(rows[0].hash_id.clone()),
                ..StatusFilter::default()
            },
        );
        assert_eq!(by_hash.len(), 1);
        assert_eq!(by_hash[0].name, "A");

        let by_device = apply_filter(
            rows.clone(),
            &StatusFilter {
                device_id: Some("B-dev".to_string()),
                ..StatusFilter::default()
            },
        );
        assert_eq!(by_device.len(), 1);
        assert_eq!(by_device[0].name, "B");
    }

    #[test]
    fn empty_filter_passes_everything_through() {
        let rows = vec![row("neptune", "A", 1), row("dlmm", "B", 2)];
        assert_eq!(apply_filter(rows.clone(), &StatusFilter::default()), rows);
    }
}
