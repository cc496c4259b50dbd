//! Wire types shared by the HTTP handlers.

use rankmeter_core::types::{
    AccountId, BatchRunId, CheckKind, CheckOptions, ScheduleConfig, ScheduleId, ScheduleUpdate,
};
use serde::{Deserialize, Serialize};

/// Envelope every endpoint answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub balance: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<u32>,
}

/// Completed checkout of a credit pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub credits: i64,
    pub checkout_id: String,
}

/// Allowance for one subscription period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub credits: i64,
    pub period_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRunBody {
    pub check_kind: CheckKind,
    pub subjects: Vec<String>,
    #[serde(default)]
    pub options: CheckOptions,
    #[serde(default)]
    pub admission_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
    pub run_id: Option<BatchRunId>,
    #[serde(default)]
    pub include_items: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleBody {
    pub check_kind: CheckKind,
    #[serde(default)]
    pub options: CheckOptions,
    #[serde(flatten)]
    pub update: ScheduleUpdate,
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsBody {
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleView {
    pub schedule: ScheduleConfig,
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsResponse {
    pub schedule_id: ScheduleId,
    pub subjects: Vec<String>,
}
