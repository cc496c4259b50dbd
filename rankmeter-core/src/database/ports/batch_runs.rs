use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AccountId, BatchRun, BatchRunId, BatchRunItem, BatchRunItemId, ItemResult, RunFinalization,
    ScheduleId,
};

/// Outcome of persisting a freshly admitted run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunInsertOutcome {
    Inserted,
    /// Another non-terminal run already holds the same `(account_id, run_key)`.
    ActiveRunExists(BatchRunId),
}

#[async_trait]
pub trait BatchRunRepository: Send + Sync {
    /// Persist the run and all of its items in one atomic operation.
    async fn insert_run(&self, run: &BatchRun, items: &[BatchRunItem]) -> Result<RunInsertOutcome>;

    async fn get_run(&self, run_id: BatchRunId) -> Result<Option<BatchRun>>;

    async fn latest_run(&self, account_id: AccountId) -> Result<Option<BatchRun>>;

    async fn find_active_run(&self, account_id: AccountId, run_key: &str) -> Result<Option<BatchRun>>;

    async fn find_by_admission_key(
        &self,
        account_id: AccountId,
        admission_key: &str,
    ) -> Result<Option<BatchRun>>;

    /// Items ordered by their position in the submitted batch.
    async fn list_items(&self, run_id: BatchRunId) -> Result<Vec<BatchRunItem>>;

    /// Move a pending run to processing (sets `started_at`). Returns the run when
    /// it is processing afterwards, `None` when it is already terminal.
    async fn start_run(&self, run_id: BatchRunId, now: DateTime<Utc>) -> Result<Option<BatchRun>>;

    /// Claim up to `limit` pending items (pending -> processing), lowest position first.
    async fn claim_pending_items(
        &self,
        run_id: BatchRunId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<BatchRunItem>>;

    /// Record a terminal result for a processing item and bump the run counters
    /// and heartbeat atomically. Returns `false` when the item was no longer
    /// processing, in which case nothing changes.
    async fn record_item_result(&self, item_id: BatchRunItemId, result: &ItemResult) -> Result<bool>;

    /// Mark unfinished items `skipped`, counting them as processed. Processing
    /// items are included only when `include_processing` is set.
    async fn skip_unfinished_items(
        &self,
        run_id: BatchRunId,
        include_processing: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Write the terminal status. Returns `false` when the run was already terminal.
    async fn finalize_run(&self, run_id: BatchRunId, finalization: &RunFinalization) -> Result<bool>;

    /// Non-terminal runs whose heartbeat is older than `cutoff`.
    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<BatchRun>>;

    /// Items of terminal runs for a schedule completed inside `[from, to)`.
    async fn schedule_items_between(
        &self,
        schedule_id: ScheduleId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BatchRunItem>>;
}
