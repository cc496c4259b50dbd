use axum::{
    Router,
    routing::{get, post, put},
};

use crate::{
    AppState,
    handlers::{credits, internal, runs, schedules},
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .merge(create_account_routes())
        .merge(create_schedule_routes())
        .merge(create_internal_routes())
}

fn create_account_routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/{account}/balance", get(credits::get_balance))
        .route("/accounts/{account}/ledger", get(credits::get_ledger))
        .route(
            "/accounts/{account}/credit-purchases",
            post(credits::record_purchase),
        )
        .route(
            "/accounts/{account}/credit-grants",
            post(credits::record_grant),
        )
        .route("/accounts/{account}/runs", post(runs::create_run))
        .route("/accounts/{account}/runs/status", get(runs::get_status))
        .route(
            "/accounts/{account}/runs/{run}/cancel",
            post(runs::cancel_run),
        )
        .route(
            "/accounts/{account}/runs/{run}/retry-failed",
            post(runs::retry_failed),
        )
        .route(
            "/accounts/{account}/schedules",
            post(schedules::create_schedule),
        )
}

fn create_schedule_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/schedules/{schedule}",
            get(schedules::get_schedule).put(schedules::update_schedule),
        )
        .route(
            "/schedules/{schedule}/subjects",
            put(schedules::replace_subjects),
        )
        .route("/schedules/{schedule}/trend", get(schedules::get_trend))
}

/// Cron-style triggers; expected to sit behind the deployment's private network.
fn create_internal_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/internal/schedules/dispatch",
            post(internal::dispatch_schedules),
        )
        .route("/internal/runs/reap", post(internal::reap_runs))
        .route("/internal/runs/resume", post(internal::resume_runs))
}
