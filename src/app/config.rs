use chrono::NaiveTime;

use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub data_dir: String,
    pub http_bind: String,
    pub fetch_interval_secs: u64,
    pub frontend_refresh_secs: u64,
    pub history_enabled: bool,
    pub quiet_start: NaiveTime,
    pub quiet_end: NaiveTime,
    pub request_timeout_secs: u64,
    pub dlmm_token: String,
    pub duohang_token: String,
    pub neptune_junior_openid: String,
    pub neptune_junior_unionid: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            db_path: string_or_default(&lookup, "DB_PATH", "./data/charger_hub.db"),
            data_dir: string_or_default(&lookup, "DATA_DIR", "./data"),
            http_bind: string_or_default(&lookup, "HTTP_BIND", "0.0.0.0:8000"),
            fetch_interval_secs: parse_or_default(&lookup, "BACKEND_FETCH_INTERVAL", 300_u64)?,
            frontend_refresh_secs: parse_or_default(&lookup, "FETCH_INTERVAL", 60_u64)?,
            history_enabled: parse_bool_or_default(&lookup, "HISTORY_ENABLED", false)?,
            quiet_start: parse_time_or_default(&lookup, "QUIET_START", "00:10")?,
            quiet_end: parse_time_or_default(&lookup, "QUIET_END", "05:50")?,
            request_timeout_secs: parse_or_default(&lookup, "REQUEST_TIMEOUT_SECS", 10_u64)?,
            dlmm_token: string_or_default(&lookup, "PROVIDER_DLMM_TOKEN", ""),
            duohang_token: string_or_default(&lookup, "PROVIDER_DUOHANG_TOKEN", ""),
            neptune_junior_openid: string_or_default(&lookup, "PROVIDER_NEPTUNE_JUNIOR_OPENID", ""),
            neptune_junior_unionid: string_or_default(
                &lookup,
                "PROVIDER_NEPTUNE_JUNIOR_UNIONID",
                "",
            ),
        })
    }
}

fn string_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool_or_default<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::config(format!("{key} must be a boolean flag"))),
        },
        None => Ok(default),
    }
}

fn parse_time_or_default<F>(lookup: &F, key: &str, default: &str) -> Result<NaiveTime, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string());

    NaiveTime::parse_from_str(&raw, "%H:%M")
        .map_err(|_| AppError::config(format!("{key} must be a HH:MM time of day")))
}
