use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};

use crate::app::services::{ServiceError, StatusService};
use crate::domain::aggregate::StatusFilter;
use crate::domain::station::Station;

#[derive(Clone)]
pub struct ApiState {
    pub status: StatusService,
    /// Suggested poll interval handed to frontends via `/api/config`.
    pub frontend_refresh_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub provider: Option<String>,
    pub hash_id: Option<String>,
    pub devid: Option<String>,
}

impl StatusQuery {
    fn into_filter(self) -> StatusFilter {
        StatusFilter {
            vendor: none_if_blank(self.provider),
            hash_id: none_if_blank(self.hash_id),
            device_id: none_if_blank(self.devid),
        }
    }
}

fn none_if_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct StationsResponse {
    pub updated_at: String,
    pub stations: Vec<Station>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FrontendConfigResponse {
    pub fetch_interval: u64,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_status_endpoint)
        .service(list_providers_endpoint)
        .service(list_stations_endpoint)
        .service(get_frontend_config_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/api/status")]
async fn get_status_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<StatusQuery>,
) -> impl Responder {
    let filter = query.into_inner().into_filter();

    match state.status.get_latest(&filter).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/providers")]
async fn list_providers_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let providers = state
        .status
        .vendor_ids()
        .into_iter()
        .map(str::to_string)
        .collect();
    HttpResponse::Ok().json(ProvidersResponse { providers })
}

#[get("/api/stations")]
async fn list_stations_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.status.list_stations() {
        Ok(stations) if stations.is_empty() => {
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "station catalog not loaded yet"
            }))
        }
        Ok(stations) => {
            let updated_at = stations
                .iter()
                .map(|station| station.updated_at.as_str())
                .max()
                .unwrap_or_default()
                .to_string();
            HttpResponse::Ok().json(StationsResponse {
                updated_at,
                stations,
            })
        }
        Err(error) => service_error_response(error),
    }
}

#[get("/api/config")]
async fn get_frontend_config_endpoint(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(FrontendConfigResponse {
        fetch_interval: state.frontend_refresh_secs,
    })
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::DeviceFilterRequiresVendor => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": "devid filter requires a provider filter"
            }))
        }
        ServiceError::NoData => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": "no status data available yet"
        })),
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}
