use thiserror::Error;

use crate::types::ids::BatchRunId;

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Invalid batch request: {0}")]
    InvalidBatchRequest(String),

    #[error("A run for this batch is already active: {run_id}")]
    RunAlreadyActive { run_id: BatchRunId },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid credit amount: {0}")]
    InvalidAmount(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeterError {
    /// Errors raised before any persistent state exists for a run.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            MeterError::InsufficientCredits { .. }
                | MeterError::InvalidBatchRequest(_)
                | MeterError::RunAlreadyActive { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MeterError>;
