use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json as ResponseJson},
    routing::{get, post},
};
use portal::{CampaignRun, GoalBrief, PackLookup};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::RequestId, response::ApiResponse};

#[derive(Debug, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub run_id: Uuid,
}

pub async fn start_run(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(brief): Json<GoalBrief>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<StartedRun>>), ApiError> {
    let run_id = state.wizard.start_run(brief).await?;
    tracing::info!("[HTTP] Request {} started run {}", request_id, run_id);
    Ok((StatusCode::ACCEPTED, ResponseJson(ApiResponse::success(StartedRun { run_id }))))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CampaignRun>>, ApiError> {
    let run = state.wizard.get_run_status(run_id).await?;
    Ok(ResponseJson(ApiResponse::success(run)))
}

pub async fn get_run_history(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<CampaignRun>>>, ApiError> {
    let history = state.wizard.get_run_history(run_id).await?;
    Ok(ResponseJson(ApiResponse::success(history)))
}

pub async fn get_pack(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<PackLookup>>, ApiError> {
    let lookup = state.wizard.get_pack(run_id).await?;
    Ok(ResponseJson(ApiResponse::success(lookup)))
}

/// The assembled pack rendered as Markdown.
pub async fn get_pack_markdown(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.wizard.get_pack(run_id).await? {
        PackLookup::Ready { pack } => Ok((
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            pack.to_markdown(),
        )),
        PackLookup::NotReady { status, stage } => Err(ApiError::Conflict(format!(
            "Run {} has no pack yet ({} at {})",
            run_id,
            status.as_str(),
            stage.as_str()
        ))),
    }
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.wizard.cancel_run(run_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs", post(start_run))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/history", get(get_run_history))
        .route("/runs/{run_id}/pack", get(get_pack))
        .route("/runs/{run_id}/pack/markdown", get(get_pack_markdown))
        .route("/runs/{run_id}/cancel", post(cancel_run))
}
