use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BatchRun, BatchRunId, BatchRunItem, BatchRunStatus, CheckKind};

/// Read model returned by status polling. Built from stored state only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusView {
    pub run_id: BatchRunId,
    pub check_kind: CheckKind,
    pub status: BatchRunStatus,
    pub total_items: i64,
    pub processed_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    pub skipped_items: i64,
    pub progress_percent: f64,
    pub estimated_credits: i64,
    pub total_credits_used: i64,
    pub credits_refunded: i64,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<BatchRunItem>>,
}

impl BatchStatusView {
    pub fn from_run(run: &BatchRun, items: Option<Vec<BatchRunItem>>) -> Self {
        Self {
            run_id: run.id,
            check_kind: run.check_kind,
            status: run.status,
            total_items: run.total_items,
            processed_items: run.processed_items,
            successful_items: run.successful_items,
            failed_items: run.failed_items,
            skipped_items: run.skipped_items,
            progress_percent: run.progress_percent(),
            estimated_credits: run.estimated_credits,
            total_credits_used: run.total_credits_used,
            credits_refunded: run.credits_refunded,
            error_message: run.error_message.clone(),
            triggered_by: run.triggered_by.clone(),
            created_at: run.created_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, CheckOptions};

    fn run(total: i64, processed: i64) -> BatchRun {
        let now = Utc::now();
        BatchRun {
            id: BatchRunId::new(),
            account_id: AccountId::new(),
            schedule_id: None,
            run_key: "batch:abc".to_string(),
            admission_key: "adm".to_string(),
            check_kind: CheckKind::RankCheck,
            options: CheckOptions::default(),
            status: BatchRunStatus::Processing,
            total_items: total,
            processed_items: processed,
            successful_items: processed,
            failed_items: 0,
            skipped_items: 0,
            estimated_credits: total,
            credits_per_surface: 1,
            total_credits_used: 0,
            credits_refunded: 0,
            debit_key: "batch-run:adm".to_string(),
            error_message: None,
            triggered_by: "manual".to_string(),
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn progress_is_rounded_to_two_decimals() {
        let view = BatchStatusView::from_run(&run(3, 1), None);
        assert_eq!(view.progress_percent, 33.33);
        assert_eq!(BatchStatusView::from_run(&run(0, 0), None).progress_percent, 0.0);
    }

    #[test]
    fn items_are_omitted_unless_requested() {
        let json = serde_json::to_value(BatchStatusView::from_run(&run(4, 2), None)).unwrap();
        assert!(json.get("items").is_none());
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress_percent"], 50.0);
    }
}
