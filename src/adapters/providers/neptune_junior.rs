use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::domain::station::{Station, UsageSnapshot, load_station_catalog};

use super::{ProviderError, VendorAdapter};

const AUTH_URL: &str = "https://gateway.hzxwwl.com/api/auth/wx/mp";
const AREA_STATUS_URL: &str =
    "https://gateway.hzxwwl.com/api/charging/pile/listChargingPileDistByArea";
const TOKEN_HEADER: &str = "REQ-NPD-TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: usize = 2;

/// Neptune's mini-program gateway. Requires a bearer token that is fetched
/// lazily on first use and cached in the adapter; a failed device call
/// clears the token so the retry re-authenticates.
///
/// The vendor reports aggregate pile counts per charging area, including
/// `booking` and `upgrade` pools the shared schema does not model. Those
/// pools are subtracted from `used` but remain inside `total`, so
/// `total == free + used + error` does not hold whenever they are non-zero.
pub struct NeptuneJuniorAdapter {
    openid: String,
    unionid: String,
    token: Mutex<Option<String>>,
    stations: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    data: Option<AuthData>,
}

#[derive(Debug, Deserialize)]
struct AuthData {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AreaStatusResponse {
    #[serde(default)]
    data: Option<AreaCounts>,
}

#[derive(Debug, Default, Deserialize)]
struct AreaCounts {
    #[serde(rename = "totalPileNumber", default)]
    total: u32,
    #[serde(rename = "totalFreeNumber", default)]
    free: u32,
    #[serde(rename = "totalTroubleNumber", default)]
    error: u32,
    #[serde(rename = "totalBookingNumber", default)]
    booking: u32,
    #[serde(rename = "totalUpgradeNumber", default)]
    upgrade: u32,
}

pub(crate) fn counts_to_snapshot(counts: &AreaCounts) -> UsageSnapshot {
    let used = counts
        .total
        .saturating_sub(counts.free)
        .saturating_sub(counts.error)
        .saturating_sub(counts.booking)
        .saturating_sub(counts.upgrade);
    UsageSnapshot {
        free: counts.free,
        used,
        total: counts.total,
        error: counts.error,
    }
}

impl NeptuneJuniorAdapter {
    pub fn new(openid: String, unionid: String) -> Self {
        Self {
            openid,
            unionid,
            token: Mutex::new(None),
            stations: Vec::new(),
        }
    }

    /// Fetch the gateway token once and keep it for subsequent calls.
    async fn ensure_token(&self, client: &Client) -> Result<String, ProviderError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let response = client
            .get(AUTH_URL)
            .query(&[("openid", &self.openid), ("unionid", &self.unionid)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let auth: AuthResponse = response.json().await?;

        let token = auth
            .data
            .and_then(|data| data.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ProviderError::Api {
                device_id: "auth".to_string(),
                message: "gateway returned no token".to_string(),
            })?;

        *guard = Some(token.clone());
        Ok(token)
    }

    async fn clear_token(&self) {
        *self.token.lock().await = None;
    }

    async fn fetch_area_counts(
        &self,
        client: &Client,
        device_id: &str,
    ) -> Result<UsageSnapshot, ProviderError> {
        let token = self.ensure_token(client).await?;

        let response = client
            .get(AREA_STATUS_URL)
            .query(&[("chargingAreaId", device_id)])
            .header(TOKEN_HEADER, token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let parsed: AreaStatusResponse = response.json().await?;

        let counts = parsed.data.ok_or_else(|| ProviderError::Malformed {
            device_id: device_id.to_string(),
            message: "response has no data payload".to_string(),
        })?;

        Ok(counts_to_snapshot(&counts))
    }
}

#[async_trait]
impl VendorAdapter for NeptuneJuniorAdapter {
    fn vendor_id(&self) -> &'static str {
        "neptune_junior"
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
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_area_counts(client, device_id).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) => {
                    tracing::debug!(
                        device_id,
                        attempt,
                        error = %error,
                        "neptune_junior area request failed, resetting token"
                    );
                    // A stale token is the common failure; force a re-auth
                    // before the next attempt.
                    self.clear_token().await;
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::RetriesExhausted {
            device_id: device_id.to_string(),
        }))
    }
}
