use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::station::{Station, UsageSnapshot, load_station_catalog};

use super::{ProviderError, VendorAdapter};

const SITE_INFO_URL: &str =
    "https://api.dudugxcd.com/sharing-citybike-consumer/site/v2/map/info";
const OEM_HEADER: &str = "oem_code";
const OEM_CODE: &str = "citybike";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Dudu battery-swap cabinets. The vendor reports `storeTake` (batteries
/// ready for pickup) once per site rather than per cabinet, so `free` here
/// is a site-global figure while `used`/`error`/`total` are summed across
/// cabinets. `total == free + used + error` does not hold for this vendor;
/// the raw accounting is passed through uncorrected.
#[derive(Debug, Default)]
pub struct DuduAdapter {
    stations: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct SiteResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<SiteData>,
}

#[derive(Debug, Default, Deserialize)]
struct SiteData {
    #[serde(rename = "storeTake", default)]
    store_take: u32,
    #[serde(rename = "cbExchangeVOList", default)]
    cabinets: Vec<Cabinet>,
}

#[derive(Debug, Deserialize)]
struct Cabinet {
    #[serde(rename = "cbExchangeUploadVO", default)]
    upload: Option<CabinetCounters>,
}

#[derive(Debug, Default, Deserialize)]
struct CabinetCounters {
    #[serde(rename = "storeNull", default)]
    store_null: u32,
    #[serde(rename = "storeLowPowerBatteryCharge", default)]
    low_power_charging: u32,
    #[serde(rename = "storeSoftLock", default)]
    soft_locked: u32,
    #[serde(rename = "storeCount", default)]
    store_count: u32,
}

pub(crate) fn site_to_snapshot(site: &SiteData) -> UsageSnapshot {
    let mut usage = UsageSnapshot {
        free: site.store_take,
        ..UsageSnapshot::default()
    };
    for cabinet in &site.cabinets {
        let Some(counters) = &cabinet.upload else {
            continue;
        };
        usage.used = usage.used.saturating_add(counters.store_null);
        usage.error = usage
            .error
            .saturating_add(counters.low_power_charging)
            .saturating_add(counters.soft_locked);
        usage.total = usage.total.saturating_add(counters.store_count);
    }
    usage
}

impl DuduAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VendorAdapter for DuduAdapter {
    fn vendor_id(&self) -> &'static str {
        "dudu"
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
        let response = client
            .get(SITE_INFO_URL)
            .query(&[("id", device_id)])
            .header(OEM_HEADER, OEM_CODE)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let parsed: SiteResponse = response.json().await?;

        if parsed.code != 200 {
            return Err(ProviderError::Api {
                device_id: device_id.to_string(),
                message: parsed
                    .message
                    .unwrap_or_else(|| format!("unexpected response code {}", parsed.code)),
            });
        }
        let site = parsed.data.ok_or_else(|| ProviderError::Malformed {
            device_id: device_id.to_string(),
            message: "response has no data payload".to_string(),
        })?;

        Ok(site_to_snapshot(&site))
    }
}

#[cfg(test)]
mod tests {
    use super::{SiteResponse, site_to_snapshot};

    #[test]
    fn free_is_site_global_while_other_counters_sum_per_cabinet() {
        let response: SiteResponse = serde_json::from_str(
            r#"{
                "code": 200,
                "data": {
                    "storeTake": 5,
                    "cbExchangeVOList": [
                        {
                            "cbExchangeUploadVO": {
                                "storeNull": 3,
                                "storeLowPowerBatteryCharge": 1,
                                "storeSoftLock": 1,
                                "storeCount": 10
                            }
                        },
                        {
                            "cbExchangeUploadVO": {
                                "storeNull": 2,
                                "storeCount": 8
                            }
                        }
                    ]
                }
            }"#,
        )
        .expect("fixture should parse");

        let usage = site_to_snapshot(&response.data.expect("data present"));

        assert_eq!(usage.free, 5);
        assert_eq!(usage.used, 5);
        assert_eq!(usage.error, 2);
        assert_eq!(usage.total, 18);
        // Swap cabinets do not satisfy the counter arithmetic.
        assert_ne!(usage.total, usage.free + usage.used + usage.error);
    }

    #[test]
    fn cabinet_without_upload_counters_is_skipped() {
        let response: SiteResponse = serde_json::from_str(
            r#"{"code": 200, "data": {"storeTake": 2, "cbExchangeVOList": [{}]}}"#,
        )
        .expect("fixture should parse");

        let usage = site_to_snapshot(&response.data.expect("data present"));
        assert_eq!((usage.free, usage.used, usage.total, usage.error), (2, 0, 0, 0));
    }

    #[test]
    fn absurd_cabinet_counts_saturate() {
        let response: SiteResponse = serde_json::from_str(
            r#"{"code": 200, "data": {"storeTake": 1, "cbExchangeVOList": [
                {"cbExchangeUploadVO": {"storeLowPowerBatteryCharge": 4294967295, "storeSoftLock": 7, "storeCount": 4294967295}},
                {"cbExchangeUploadVO": {"storeCount": 9}}
            ]}}"#,
        )
        .expect("fixture should parse");

        let usage = site_to_snapshot(&response.data.expect("data present"));
        assert_eq!(usage.error, u32::MAX);
        assert_eq!(usage.total, u32::MAX);
    }

    #[test]
    fn non_200_code_is_detected() {
        let response: SiteResponse =
            serde_json::from_str(r#"{"code": 500, "message": "site not found"}"#)
                .expect("fixture should parse");
        assert_ne!(response.code, 200);
        assert_eq!(response.message.as_deref(), Some("site not found"));
    }
}
