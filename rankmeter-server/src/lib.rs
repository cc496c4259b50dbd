//! # Rankmeter Server
//!
//! HTTP surface over [`rankmeter_core`]: credit balances and ledger history,
//! metered batch runs with polling status, recurring schedules with daily
//! trend summaries, and cron-style triggers for the periodic jobs.

pub mod api;
pub mod handlers;
pub mod infra;
pub mod routes;

use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use infra::app_state::{AppState, ServiceSettings};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .merge(routes::create_api_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
