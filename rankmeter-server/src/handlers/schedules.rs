use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use rankmeter_core::types::{
    AccountId, NewSchedule, ScheduleConfig, ScheduleId, ScheduleUpdate, Trend,
};

use crate::AppState;
use crate::api::{ApiResponse, CreateScheduleBody, ScheduleView, SubjectsBody, SubjectsResponse};
use crate::infra::errors::AppResult;

pub async fn create_schedule(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(body): Json<CreateScheduleBody>,
) -> AppResult<(StatusCode, Json<ApiResponse<ScheduleView>>)> {
    let new = NewSchedule {
        account_id,
        check_kind: body.check_kind,
        options: body.options,
        update: body.update,
    };
    let (schedule, subjects) = state
        .schedules
        .create(new, &body.subjects, Utc::now())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ScheduleView { schedule, subjects })),
    ))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<ScheduleId>,
) -> AppResult<Json<ApiResponse<ScheduleView>>> {
    let schedule = state.schedules.get(schedule_id).await?;
    let subjects = state.schedules.subjects(schedule_id).await?;
    Ok(Json(ApiResponse::success(ScheduleView { schedule, subjects })))
}

/// Validates the recurrence and always recomputes the next slot.
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<ScheduleId>,
    Json(update): Json<ScheduleUpdate>,
) -> AppResult<Json<ApiResponse<ScheduleConfig>>> {
    let schedule = state
        .schedules
        .update(schedule_id, update, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(schedule)))
}

pub async fn replace_subjects(
    State(state): State<AppState>,
    Path(schedule_id): Path<ScheduleId>,
    Json(body): Json<SubjectsBody>,
) -> AppResult<Json<ApiResponse<SubjectsResponse>>> {
    let subjects = state
        .schedules
        .set_subjects(schedule_id, &body.subjects)
        .await?;
    Ok(Json(ApiResponse::success(SubjectsResponse {
        schedule_id,
        subjects,
    })))
}

/// `data` is null until two daily summaries exist.
pub async fn get_trend(
    State(state): State<AppState>,
    Path(schedule_id): Path<ScheduleId>,
) -> AppResult<Json<ApiResponse<Option<Trend>>>> {
    state.schedules.get(schedule_id).await?;
    let trend = state.aggregator.trend(schedule_id).await?;
    Ok(Json(ApiResponse::success(trend)))
}
