use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use rankmeter_core::MeterError;

use crate::api::ApiResponse;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn payment_required(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ApiResponse::<()>::error(self.message));
        (self.status, body).into_response()
    }
}

impl From<MeterError> for AppError {
    fn from(err: MeterError) -> Self {
        match err {
            MeterError::InsufficientCredits { .. } => Self::payment_required(err.to_string()),
            MeterError::InvalidBatchRequest(_)
            | MeterError::InvalidSchedule(_)
            | MeterError::InvalidAmount(_) => Self::bad_request(err.to_string()),
            MeterError::RunAlreadyActive { .. } | MeterError::Conflict(_) => {
                Self::conflict(err.to_string())
            }
            MeterError::NotFound(_) => Self::not_found(err.to_string()),
            MeterError::Serialization(_) | MeterError::Internal(_) => {
                tracing::error!(error = %err, "request failed");
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rankmeter_core::types::BatchRunId;

    use super::*;

    #[test]
    fn meter_errors_map_to_statuses() {
        let cases = [
            (
                MeterError::InsufficientCredits {
                    required: 10,
                    available: 5,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                MeterError::InvalidBatchRequest("empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MeterError::InvalidSchedule("hour".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MeterError::RunAlreadyActive {
                    run_id: BatchRunId::new(),
                },
                StatusCode::CONFLICT,
            ),
            (MeterError::NotFound("run".into()), StatusCode::NOT_FOUND),
            (
                MeterError::Internal("db down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AppError::from(MeterError::Internal("password=hunter2".into()));
        assert!(!err.message.contains("hunter2"));
    }
}
