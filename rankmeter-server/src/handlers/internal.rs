//! Triggers for the periodic jobs, for deployments that drive them from an
//! external cron instead of the in-process loops.

use axum::{Json, extract::State};
use chrono::Utc;
use rankmeter_core::batch::{ReapReport, ResumeReport};
use rankmeter_core::schedule::DispatchReport;
use tracing::info;

use crate::AppState;
use crate::api::ApiResponse;
use crate::infra::errors::AppResult;

/// One dispatcher tick. Admitted runs execute in the background.
pub async fn dispatch_schedules(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<DispatchReport>>> {
    let report = state.dispatcher.tick(Utc::now()).await?;
    for run_id in &report.dispatched {
        state.dispatcher.execute(*run_id);
    }
    info!(
        due = report.due,
        dispatched = report.dispatched.len(),
        failures = report.failures,
        "schedule dispatch triggered"
    );
    Ok(Json(ApiResponse::success(report)))
}

pub async fn reap_runs(State(state): State<AppState>) -> AppResult<Json<ApiResponse<ReapReport>>> {
    let report = state.housekeeper.reap_stale_runs(Utc::now()).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Restart idle runs that still have pending items, e.g. after a redeploy.
pub async fn resume_runs(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<ResumeReport>>> {
    let report = state.housekeeper.resume_interrupted_runs(Utc::now()).await?;
    info!(resumed = report.resumed.len(), "interrupted runs resumed");
    Ok(Json(ApiResponse::success(report)))
}
