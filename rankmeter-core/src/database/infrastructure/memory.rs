//! In-process adapter implementing every repository port behind one lock.
//!
//! Used by tests and by the server's `--in-memory` mode. A single mutex makes
//! each port call atomic, which gives the same guarantees the Postgres adapter
//! gets from transactions and unique indexes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::database::ports::{
    BatchRunRepository, CreditLedgerRepository, RunInsertOutcome, ScheduleRepository,
    SummaryRepository,
};
use crate::error::{MeterError, Result};
use crate::types::{
    AccountId, BatchRun, BatchRunId, BatchRunItem, BatchRunItemId, BatchRunStatus, CreditAppend,
    DailySummary, DebitAppend, ItemResult, ItemStatus, LedgerEntry, NewLedgerEntry,
    RunFinalization, ScheduleConfig, ScheduleId,
};

#[derive(Default)]
struct MemoryState {
    entries: Vec<LedgerEntry>,
    runs: HashMap<BatchRunId, BatchRun>,
    items: HashMap<BatchRunItemId, BatchRunItem>,
    schedules: HashMap<ScheduleId, ScheduleConfig>,
    subjects: HashMap<ScheduleId, Vec<String>>,
    summaries: HashMap<(ScheduleId, NaiveDate), DailySummary>,
}

impl MemoryState {
    fn balance(&self, account_id: AccountId) -> i64 {
        self.entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .map(|entry| entry.amount)
            .sum()
    }

    fn entry_by_key(&self, account_id: AccountId, key: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.account_id == account_id && entry.idempotency_key == key)
    }

    fn append(&mut self, entry: NewLedgerEntry, balance_after: i64) -> LedgerEntry {
        let stored = LedgerEntry {
            id: entry.id,
            account_id: entry.account_id,
            amount: entry.amount,
            kind: entry.kind,
            idempotency_key: entry.idempotency_key,
            feature_type: entry.feature_type,
            related_key: entry.related_key,
            metadata: entry.metadata,
            balance_after,
            created_at: entry.created_at,
        };
        self.entries.push(stored.clone());
        stored
    }

    fn items_for_run(&self, run_id: BatchRunId) -> Vec<BatchRunItem> {
        let mut items: Vec<BatchRunItem> = self
            .items
            .values()
            .filter(|item| item.batch_run_id == run_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.position);
        items
    }
}

/// Shared, cloneable in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryStore");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("entries", &state.entries.len())
                    .field("runs", &state.runs.len())
                    .field("items", &state.items.len())
                    .field("schedules", &state.schedules.len())
                    .field("summaries", &state.summaries.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of persisted runs, across all accounts.
    pub async fn run_count(&self) -> usize {
        self.state.lock().await.runs.len()
    }

    /// Total number of persisted run items, across all runs.
    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Number of ledger entries recorded for an account.
    pub async fn entry_count(&self, account_id: AccountId) -> usize {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .count()
    }

    /// Overwrite a run's heartbeat; lets tests age a run without waiting.
    pub async fn set_run_heartbeat(&self, run_id: BatchRunId, updated_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| MeterError::NotFound(format!("batch run {run_id}")))?;
        run.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl CreditLedgerRepository for InMemoryStore {
    async fn balance(&self, account_id: AccountId) -> Result<i64> {
        Ok(self.state.lock().await.balance(account_id))
    }

    async fn append_debit(&self, entry: NewLedgerEntry) -> Result<DebitAppend> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.entry_by_key(entry.account_id, &entry.idempotency_key) {
            return Ok(DebitAppend::Existing(existing.clone()));
        }

        let available = state.balance(entry.account_id);
        let required = -entry.amount;
        if available < required {
            return Ok(DebitAppend::Insufficient { available });
        }

        let balance_after = available + entry.amount;
        Ok(DebitAppend::Appended(state.append(entry, balance_after)))
    }

    async fn append_credit(&self, entry: NewLedgerEntry) -> Result<CreditAppend> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.entry_by_key(entry.account_id, &entry.idempotency_key) {
            return Ok(CreditAppend::Existing(existing.clone()));
        }

        let balance_after = state.balance(entry.account_id) + entry.amount;
        Ok(CreditAppend::Appended(state.append(entry, balance_after)))
    }

    async fn find_by_key(
        &self,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .entry_by_key(account_id, idempotency_key)
            .cloned())
    }

    async fn list_entries(&self, account_id: AccountId, limit: u32) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.account_id == account_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BatchRunRepository for InMemoryStore {
    async fn insert_run(&self, run: &BatchRun, items: &[BatchRunItem]) -> Result<RunInsertOutcome> {
        let mut state = self.state.lock().await;
        let active = state.runs.values().find(|existing| {
            existing.account_id == run.account_id
                && existing.run_key == run.run_key
                && !existing.is_terminal()
        });
        if let Some(active) = active {
            return Ok(RunInsertOutcome::ActiveRunExists(active.id));
        }

        state.runs.insert(run.id, run.clone());
        for item in items {
            state.items.insert(item.id, item.clone());
        }
        Ok(RunInsertOutcome::Inserted)
    }

    async fn get_run(&self, run_id: BatchRunId) -> Result<Option<BatchRun>> {
        Ok(self.state.lock().await.runs.get(&run_id).cloned())
    }

    async fn latest_run(&self, account_id: AccountId) -> Result<Option<BatchRun>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|run| run.account_id == account_id)
            .max_by_key(|run| (run.created_at, run.id))
            .cloned())
    }

    async fn find_active_run(&self, account_id: AccountId, run_key: &str) -> Result<Option<BatchRun>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .find(|run| run.account_id == account_id && run.run_key == run_key && !run.is_terminal())
            .cloned())
    }

    async fn find_by_admission_key(
        &self,
        account_id: AccountId,
        admission_key: &str,
    ) -> Result<Option<BatchRun>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .find(|run| run.account_id == account_id && run.admission_key == admission_key)
            .cloned())
    }

    async fn list_items(&self, run_id: BatchRunId) -> Result<Vec<BatchRunItem>> {
        Ok(self.state.lock().await.items_for_run(run_id))
    }

    async fn start_run(&self, run_id: BatchRunId, now: DateTime<Utc>) -> Result<Option<BatchRun>> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| MeterError::NotFound(format!("batch run {run_id}")))?;

        match run.status {
            BatchRunStatus::Pending => {
                run.status = BatchRunStatus::Processing;
                run.started_at = Some(now);
                run.updated_at = now;
                Ok(Some(run.clone()))
            }
            BatchRunStatus::Processing => {
                run.updated_at = now;
                Ok(Some(run.clone()))
            }
            BatchRunStatus::Completed | BatchRunStatus::Failed => Ok(None),
        }
    }

    async fn claim_pending_items(
        &self,
        run_id: BatchRunId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<BatchRunItem>> {
        let mut state = self.state.lock().await;
        let mut pending: Vec<(i32, BatchRunItemId)> = state
            .items
            .values()
            .filter(|item| item.batch_run_id == run_id && item.status == ItemStatus::Pending)
            .map(|item| (item.position, item.id))
            .collect();
        pending.sort();

        let mut claimed = Vec::new();
        for (_, item_id) in pending.into_iter().take(limit as usize) {
            if let Some(item) = state.items.get_mut(&item_id) {
                item.status = ItemStatus::Processing;
                item.started_at = Some(now);
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_item_result(&self, item_id: BatchRunItemId, result: &ItemResult) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(item) = state.items.get_mut(&item_id) else {
            return Err(MeterError::NotFound(format!("batch run item {item_id}")));
        };
        if item.status != ItemStatus::Processing || !result.status.is_terminal() {
            return Ok(false);
        }

        item.status = result.status;
        item.surfaces = result.surfaces.clone();
        item.credits_used = result.credits_used;
        item.error_message = result.error_message.clone();
        item.completed_at = Some(result.completed_at);
        let run_id = item.batch_run_id;

        if let Some(run) = state.runs.get_mut(&run_id) {
            run.processed_items += 1;
            match result.status {
                ItemStatus::Completed => run.successful_items += 1,
                ItemStatus::Failed => run.failed_items += 1,
                ItemStatus::Skipped => run.skipped_items += 1,
                ItemStatus::Pending | ItemStatus::Processing => {}
            }
            run.updated_at = result.completed_at;
        }
        Ok(true)
    }

    async fn skip_unfinished_items(
        &self,
        run_id: BatchRunId,
        include_processing: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut skipped = 0i64;
        for item in state.items.values_mut() {
            if item.batch_run_id != run_id {
                continue;
            }
            let eligible = item.status == ItemStatus::Pending
                || (include_processing && item.status == ItemStatus::Processing);
            if eligible {
                item.status = ItemStatus::Skipped;
                item.error_message = Some(reason.to_string());
                item.completed_at = Some(now);
                skipped += 1;
            }
        }

        if skipped > 0 {
            if let Some(run) = state.runs.get_mut(&run_id) {
                run.processed_items += skipped;
                run.skipped_items += skipped;
                run.updated_at = now;
            }
        }
        Ok(skipped as u64)
    }

    async fn finalize_run(&self, run_id: BatchRunId, finalization: &RunFinalization) -> Result<bool> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| MeterError::NotFound(format!("batch run {run_id}")))?;
        if run.is_terminal() {
            return Ok(false);
        }

        run.status = finalization.status;
        run.total_credits_used = finalization.total_credits_used;
        run.credits_refunded = finalization.credits_refunded;
        run.error_message = finalization.error_message.clone();
        run.completed_at = Some(finalization.completed_at);
        run.updated_at = finalization.completed_at;
        Ok(true)
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<BatchRun>> {
        let state = self.state.lock().await;
        let mut runs: Vec<BatchRun> = state
            .runs
            .values()
            .filter(|run| !run.is_terminal() && run.updated_at < cutoff)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.updated_at);
        Ok(runs)
    }

    async fn schedule_items_between(
        &self,
        schedule_id: ScheduleId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BatchRunItem>> {
        let state = self.state.lock().await;
        let mut items = Vec::new();
        for run in state.runs.values() {
            let in_window = run
                .completed_at
                .is_some_and(|completed| completed >= from && completed < to);
            if run.schedule_id == Some(schedule_id) && run.is_terminal() && in_window {
                items.extend(state.items_for_run(run.id));
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryStore {
    async fn insert_schedule(&self, schedule: &ScheduleConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.schedules.contains_key(&schedule.id) {
            return Err(MeterError::Conflict(format!("schedule {} already exists", schedule.id)));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleConfig>> {
        Ok(self.state.lock().await.schedules.get(&schedule_id).cloned())
    }

    async fn update_schedule(&self, schedule: &ScheduleConfig) -> Result<ScheduleConfig> {
        let mut state = self.state.lock().await;
        let stored = state
            .schedules
            .get_mut(&schedule.id)
            .ok_or_else(|| MeterError::NotFound(format!("schedule {}", schedule.id)))?;
        stored.recurrence = schedule.recurrence;
        stored.enabled = schedule.enabled;
        stored.next_scheduled_at = schedule.next_scheduled_at;
        stored.updated_at = schedule.updated_at;
        Ok(stored.clone())
    }

    async fn due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduleConfig>> {
        let state = self.state.lock().await;
        let mut due: Vec<ScheduleConfig> = state
            .schedules
            .values()
            .filter(|schedule| {
                schedule.enabled && schedule.next_scheduled_at.is_some_and(|next| next <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|schedule| schedule.next_scheduled_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_slot(
        &self,
        schedule_id: ScheduleId,
        expected_next: DateTime<Utc>,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(schedule) = state.schedules.get_mut(&schedule_id) else {
            return Ok(false);
        };
        if schedule.next_scheduled_at != Some(expected_next) {
            return Ok(false);
        }
        schedule.last_scheduled_run_at = Some(expected_next);
        schedule.next_scheduled_at = Some(next_scheduled_at);
        schedule.updated_at = now;
        Ok(true)
    }

    async fn subjects(&self, schedule_id: ScheduleId) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .subjects
            .get(&schedule_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_subjects(&self, schedule_id: ScheduleId, subjects: &[String]) -> Result<()> {
        self.state
            .lock()
            .await
            .subjects
            .insert(schedule_id, subjects.to_vec());
        Ok(())
    }
}

#[async_trait]
impl SummaryRepository for InMemoryStore {
    async fn upsert_summary(&self, summary: &DailySummary) -> Result<()> {
        self.state
            .lock()
            .await
            .summaries
            .insert((summary.schedule_id, summary.day), summary.clone());
        Ok(())
    }

    async fn latest_summaries(&self, schedule_id: ScheduleId, limit: u32) -> Result<Vec<DailySummary>> {
        let state = self.state.lock().await;
        let mut rows: Vec<DailySummary> = state
            .summaries
            .values()
            .filter(|summary| summary.schedule_id == schedule_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.day.cmp(&a.day));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}
