use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rankmeter_core::batch::{BatchStatusView, CreateRunRequest};
use rankmeter_core::types::{AccountId, BatchRun, BatchRunId};
use tracing::info;

use crate::AppState;
use crate::api::{ApiResponse, CancelQuery, CreateRunBody, StatusQuery};
use crate::infra::errors::AppResult;

/// Admit a run and start executing it in the background.
///
/// Admission is synchronous: pricing, the balance check and the up-front
/// debit all happen before the 202 is returned.
pub async fn create_run(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(body): Json<CreateRunBody>,
) -> AppResult<(StatusCode, Json<ApiResponse<BatchRun>>)> {
    let mut request = CreateRunRequest::new(account_id, body.check_kind, body.subjects)
        .with_options(body.options)
        .triggered_by("api");
    if let Some(key) = body.admission_key {
        request = request.with_admission_key(key);
    }

    let run = state.coordinator.create_run(request).await?;
    if !run.is_terminal() {
        state.coordinator.spawn_run(run.id);
    }
    info!(run_id = %run.id, account_id = %account_id, "batch run accepted");
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(run))))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<ApiResponse<BatchStatusView>>> {
    let view = state
        .coordinator
        .status(account_id, query.run_id, query.include_items)
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path((account_id, run_id)): Path<(AccountId, BatchRunId)>,
    Query(query): Query<CancelQuery>,
) -> AppResult<Json<ApiResponse<BatchRun>>> {
    let reason = query.reason.unwrap_or_else(|| "requested by user".to_string());
    let run = state.coordinator.cancel(account_id, run_id, &reason).await?;
    Ok(Json(ApiResponse::success(run)))
}

/// New, separately priced batch over the failed subjects of a finished run.
pub async fn retry_failed(
    State(state): State<AppState>,
    Path((account_id, run_id)): Path<(AccountId, BatchRunId)>,
) -> AppResult<(StatusCode, Json<ApiResponse<BatchRun>>)> {
    let run = state
        .coordinator
        .retry_failed(account_id, run_id, "retry")
        .await?;
    if !run.is_terminal() {
        state.coordinator.spawn_run(run.id);
    }
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(run))))
}
