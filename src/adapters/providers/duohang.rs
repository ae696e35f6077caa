use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::domain::station::{Station, UsageSnapshot, load_station_catalog};

use super::{ProviderError, VendorAdapter};

const SCAN_URL: &str = "https://mini.opencool.top/api/device.device/scan";
const SN_PREFIX: &str = "GD1B";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_USED: &str = "使用中";
const STATUS_FREE: &str = "空闲";

/// Duohang chargers behind the opencool gateway. One scan call per device
/// returns a `port_list` whose entries carry a human-readable `status_text`;
/// anything that is neither in-use nor idle counts as error. Requires a
/// static gateway token from config.
pub struct DuohangAdapter {
    token: String,
    stations: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    data: Option<ScanData>,
}

#[derive(Debug, Default, Deserialize)]
struct ScanData {
    #[serde(rename = "port_list", default)]
    ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(default)]
    status_text: Option<String>,
}

pub(crate) fn count_ports(ports: &[Port]) -> UsageSnapshot {
    let mut usage = UsageSnapshot {
        total: ports.len() as u32,
        ..UsageSnapshot::default()
    };
    for port in ports {
        match port.status_text.as_deref() {
            Some(STATUS_USED) => usage.used += 1,
            Some(STATUS_FREE) => usage.free += 1,
            _ => usage.error += 1,
        }
    }
    usage
}

/// Serial number as the gateway expects it: the bare device id carries no
/// hardware prefix in the catalog files.
pub(crate) fn scan_sn(device_id: &str) -> String {
    format!("{SN_PREFIX}{device_id}")
}

impl DuohangAdapter {
    pub fn new(token: String) -> Self {
        Self {
            token,
            stations: Vec::new(),
        }
    }
}

#[async_trait]
impl VendorAdapter for DuohangAdapter {
    fn vendor_id(&self) -> &'static str {
        "duohang"
    }

    fn stations(&self) -> &[Station] {
        &self.stations
    }

    fn load_stations(&mut self, data_dir: &Path) -> Result<usize, ProviderError> {
        self.stations = load_station_catalog(data_dir, self.vendor_id())?;
        Ok(self.stations.len())
    }

    async fn fetch_device_status(
        &self,
        client: &Client,
        device_id: &str,
    ) -> Result<UsageSnapshot, ProviderError> {
        let sn = scan_sn(device_id);
        let response = client
            .post(SCAN_URL)
            .header("token", &self.token)
            .json(&json!({
                "sn": sn,
                "_sn": sn,
                "is_check": 0,
                "new_rule": 1,
            }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let parsed: ScanResponse = response.json().await?;

        // The gateway omits `data` for unknown serials; an empty port list
        // is a valid zero reading, not an error.
        let ports = parsed.data.map(|data| data.ports).unwrap_or_default();
        Ok(count_ports(&ports))
    }
}
