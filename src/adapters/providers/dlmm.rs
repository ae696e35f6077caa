use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::domain::station::{Station, UsageSnapshot, load_station_catalog};

use super::{ProviderError, VendorAdapter};

const STATION_URL: &str = "https://dlmmplususer.dianlvmama.com/dlServer/dlmm/getStation";
const TENANT_ID: &str = "1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);
const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// DLMM reports one status code per socket: `0` free, `1` used, anything
/// else counted as error. Requires a static bearer token from config.
pub struct DlmmAdapter {
    token: String,
    stations: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct StationResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Option<StationData>,
}

#[derive(Debug, Default, Deserialize)]
struct StationData {
    #[serde(rename = "socketArray", default)]
    sockets: Vec<Socket>,
}

#[derive(Debug, Deserialize)]
struct Socket {
    #[serde(default)]
    status: Option<i64>,
}

pub(crate) fn count_sockets(sockets: &[Socket]) -> UsageSnapshot {
    let mut usage = UsageSnapshot {
        total: sockets.len() as u32,
        ..UsageSnapshot::default()
    };
    for socket in sockets {
        match socket.status {
            Some(0) => usage.free += 1,
            Some(1) => usage.used += 1,
            _ => usage.error += 1,
        }
    }
    usage
}

impl DlmmAdapter {
    pub fn new(token: String) -> Self {
        Self {
            token,
            stations: Vec::new(),
        }
    }

    async fn request_station(
        &self,
        client: &Client,
        device_id: &str,
    ) -> Result<UsageSnapshot, ProviderError> {
        let response = client
            .post(STATION_URL)
            .header("authorization", &self.token)
            .header("tenant-id", TENANT_ID)
            .json(&json!({ "stationNo": device_id }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let parsed: StationResponse = response.json().await?;

        if parsed.code != 200 {
            return Err(ProviderError::Api {
                device_id: device_id.to_string(),
                message: format!("unexpected response code {}", parsed.code),
            });
        }
        let data = parsed.data.ok_or_else(|| ProviderError::Malformed {
            device_id: device_id.to_string(),
            message: "response has no data payload".to_string(),
        })?;

        Ok(count_sockets(&data.sockets))
    }
}

#[async_trait]
impl VendorAdapter for DlmmAdapter {
    fn vendor_id(&self) -> &'static str {
        "dlmm"
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
        let mut last_error = None;
        for attempt in 1..=MAX_RETRIES {
            match self.request_station(client, device_id).await {
                Ok(snapshot) => return Ok(snapshot),
                // Vendor-level rejections will not heal on retry.
                Err(error @ ProviderError::Api { .. }) => return Err(error),
                Err(error) => {
                    tracing::debug!(
                        device_id,
                        attempt,
                        error = %error,
                        "dlmm station request failed"
                    );
                    last_error = Some(error);
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::RetriesExhausted {
            device_id: device_id.to_string(),
        }))
    }
}
