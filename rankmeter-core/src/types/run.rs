use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::check::{CheckKind, CheckOptions, Surface};
use super::ids::{AccountId, BatchRunId, BatchRunItemId, ScheduleId};

/// Run-level lifecycle. `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchRunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchRunStatus::Pending => "pending",
            BatchRunStatus::Processing => "processing",
            BatchRunStatus::Completed => "completed",
            BatchRunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BatchRunStatus::Pending),
            "processing" => Some(BatchRunStatus::Processing),
            "completed" => Some(BatchRunStatus::Completed),
            "failed" => Some(BatchRunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchRunStatus::Completed | BatchRunStatus::Failed)
    }
}

/// Item-level lifecycle. Everything except `Pending`/`Processing` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ItemStatus::Pending),
            "processing" => Some(ItemStatus::Processing),
            "completed" => Some(ItemStatus::Completed),
            "failed" => Some(ItemStatus::Failed),
            "skipped" => Some(ItemStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceStatus {
    Completed,
    Failed,
}

/// Independent sub-result for one surface of an item (e.g. desktop vs mobile).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceResult {
    pub surface: Surface,
    pub status: SurfaceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl SurfaceResult {
    pub fn is_success(&self) -> bool {
        self.status == SurfaceStatus::Completed
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: BatchRunId,
    pub account_id: AccountId,
    pub schedule_id: Option<ScheduleId>,
    /// Identity of "the same batch" for the re-trigger guard.
    pub run_key: String,
    /// Caller token that makes run creation idempotent.
    pub admission_key: String,
    pub check_kind: CheckKind,
    pub options: CheckOptions,
    pub status: BatchRunStatus,
    pub total_items: i64,
    pub processed_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    pub skipped_items: i64,
    pub estimated_credits: i64,
    /// Price of one successful surface, fixed when the run was admitted.
    pub credits_per_surface: i64,
    pub total_credits_used: i64,
    pub credits_refunded: i64,
    pub debit_key: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_items(&self) -> i64 {
        (self.total_items - self.processed_items).max(0)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_items <= 0 {
            return 0.0;
        }
        let ratio = self.processed_items as f64 / self.total_items as f64;
        (ratio * 10_000.0).round() / 100.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchRunItem {
    pub id: BatchRunItemId,
    pub batch_run_id: BatchRunId,
    pub subject_id: String,
    /// Ordinal of the subject in the submitted batch.
    pub position: i32,
    pub status: ItemStatus,
    pub surfaces: Vec<SurfaceResult>,
    pub credits_used: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRunItem {
    pub fn pending(batch_run_id: BatchRunId, subject_id: String, position: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: BatchRunItemId::new(),
            batch_run_id,
            subject_id,
            position,
            status: ItemStatus::Pending,
            surfaces: Vec::new(),
            credits_used: 0,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Best (lowest) position across successful surfaces.
    pub fn best_position(&self) -> Option<u32> {
        self.surfaces
            .iter()
            .filter(|surface| surface.is_success())
            .filter_map(|surface| surface.position)
            .min()
    }
}

/// Terminal result reported for a claimed item.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemResult {
    pub status: ItemStatus,
    pub surfaces: Vec<SurfaceResult>,
    pub credits_used: i64,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Values written when a run reaches a terminal status.
#[derive(Clone, Debug, PartialEq)]
pub struct RunFinalization {
    pub status: BatchRunStatus,
    pub total_credits_used: i64,
    pub credits_refunded: i64,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}
