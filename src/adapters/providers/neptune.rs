use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::station::{Station, UsageSnapshot, load_station_catalog};

use super::{ProviderError, VendorAdapter};

const DEVICE_INFO_URL: &str = "http://www.szlzxn.cn/wxn/getDeviceInfo";
const AREA_ID: u32 = 6;
const MAX_RETRIES: usize = 5;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Neptune reports one bit-string per device (`portstatur`): each character
/// is one port, `'0'` free, `'1'` used, `'3'` faulted. Total is the string
/// length, so ports in states we do not track still count towards total.
#[derive(Debug, Default)]
pub struct NeptuneAdapter {
    stations: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct DeviceInfoResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    obj: Option<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
struct DeviceInfo {
    #[serde(default)]
    devaddress: Option<serde_json::Value>,
    #[serde(default)]
    portstatur: Option<String>,
}

pub(crate) fn count_port_status(portstatus: &str) -> UsageSnapshot {
    UsageSnapshot {
        free: portstatus.matches('0').count() as u32,
        used: portstatus.matches('1').count() as u32,
        error: portstatus.matches('3').count() as u32,
        total: portstatus.chars().count() as u32,
    }
}

impl NeptuneAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_device(
        &self,
        device_id: &str,
        response: DeviceInfoResponse,
    ) -> Result<UsageSnapshot, ProviderError> {
        if !response.success {
            return Err(ProviderError::Api {
                device_id: device_id.to_string(),
                message: response.msg.unwrap_or_else(|| "success=false".to_string()),
            });
        }

        let info = response.obj.ok_or_else(|| ProviderError::Malformed {
            device_id: device_id.to_string(),
            message: "response has no obj payload".to_string(),
        })?;

        let reported_address = info
            .devaddress
            .as_ref()
            .map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        if reported_address != device_id {
            return Err(ProviderError::Malformed {
                device_id: device_id.to_string(),
                message: format!("response is for device {reported_address}"),
            });
        }

        let portstatus = info.portstatur.unwrap_or_default();
        if portstatus.is_empty() {
            return Err(ProviderError::Malformed {
                device_id: device_id.to_string(),
                message: "device has no portstatur string".to_string(),
            });
        }

        Ok(count_port_status(&portstatus))
    }
}

#[async_trait]
impl VendorAdapter for NeptuneAdapter {
    fn vendor_id(&self) -> &'static str {
        "neptune"
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
        for attempt in 1..=MAX_RETRIES {
            let request = client
                .post(DEVICE_INFO_URL)
                .form(&[
                    ("areaId", AREA_ID.to_string()),
                    ("devaddress", device_id.to_string()),
                ])
                .timeout(REQUEST_TIMEOUT);

            let outcome = async {
                let response = request.send().await?.error_for_status()?;
                response.json::<DeviceInfoResponse>().await
            }
            .await;

            match outcome {
                Ok(parsed) => return self.parse_device(device_id, parsed),
                Err(error) if attempt == MAX_RETRIES => {
                    return Err(ProviderError::Network(error));
                }
                Err(error) => {
                    tracing::debug!(
                        device_id,
                        attempt,
                        error = %error,
                        "neptune device request failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        Err(ProviderError::RetriesExhausted {
            device_id: device_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::station::UsageSnapshot;

    use super::{DeviceInfoResponse, NeptuneAdapter, count_port_status};

    #[test]
    fn counts_bit_string_into_port_states() {
        let usage = count_port_status("0010300110");
        assert_eq!(
            usage,
            UsageSnapshot {
                free: 6,
                used: 3,
                error: 1,
                total: 10
            }
        );
    }

    #[test]
    fn all_free_string_has_no_used_or_error() {
        let usage = count_port_status("0000");
        assert_eq!((usage.free, usage.used, usage.error, usage.total), (4, 0, 0, 4));
    }

    #[test]
    fn parse_rejects_unsuccessful_response() {
        let adapter = NeptuneAdapter::new();
        let response: DeviceInfoResponse =
            serde_json::from_str(r#"{"success": false, "msg": "device offline"}"#)
                .expect("fixture should parse");

        let result = adapter.parse_device("40459001", response);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("device offline"));
    }

    #[test]
    fn parse_rejects_mismatched_device_address() {
        let adapter = NeptuneAdapter::new();
        let response: DeviceInfoResponse = serde_json::from_str(
            r#"{"success": true, "obj": {"devaddress": "40459999", "portstatur": "00"}}"#,
        )
        .expect("fixture should parse");

        assert!(adapter.parse_device("40459001", response).is_err());
    }

    #[test]
    fn parse_accepts_numeric_device_address() {
        let adapter = NeptuneAdapter::new();
        let response: DeviceInfoResponse = serde_json::from_str(
            r#"{"success": true, "obj": {"devaddress": 40459001, "portstatur": "0013"}}"#,
        )
        .expect("fixture should parse");

        let usage = adapter
            .parse_device("40459001", response)
            .expect("numeric devaddress should match");
        assert_eq!(usage.total, 4);
        assert_eq!(usage.error, 1);
    }

    #[test]
    fn parse_rejects_missing_portstatur() {
        let adapter = NeptuneAdapter::new();
        let response: DeviceInfoResponse = serde_json::from_str(
            r#"{"success": true, "obj": {"devaddress": "40459001"}}"#,
        )
        .expect("fixture should parse");

        assert!(adapter.parse_device("40459001", response).is_err());
    }
}
