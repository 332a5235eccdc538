use axum::{extract::State, response::Json as ResponseJson};
use chrono::{DateTime, Utc};
use portal::CacheStats;
use serde::Serialize;

use crate::{AppState, response::ApiResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub providers: Vec<String>,
    pub cache: CacheStats,
    pub checked_at: DateTime<Utc>,
}

pub async fn health_check(State(state): State<AppState>) -> ResponseJson<ApiResponse<HealthStatus>> {
    ResponseJson(ApiResponse::success(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        providers: state.config.providers.keys().cloned().collect(),
        cache: state.wizard.cache_stats(),
        checked_at: Utc::now(),
    }))
}
