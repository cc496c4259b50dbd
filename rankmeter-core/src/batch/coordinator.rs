use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::CoordinatorConfig;
use super::status::BatchStatusView;
use crate::credits::{CreditLedger, DebitRequest};
use crate::database::ports::{BatchRunRepository, RunInsertOutcome};
use crate::error::{MeterError, Result};
use crate::pricing::{credits_per_item, resolve_surfaces};
use crate::probe::{ProbeError, ProbeRequest, Prober, ProberRegistry};
use crate::summary::SummaryAggregator;
use crate::types::{
    AccountId, BatchRun, BatchRunId, BatchRunItem, BatchRunStatus, CheckKind, CheckOptions,
    ItemResult, ItemStatus, RunFinalization, ScheduleId, Surface, SurfaceResult, SurfaceStatus,
};

const TARGET: &str = "batch::coordinator";

fn default_triggered_by() -> String {
    "manual".to_string()
}

/// Everything needed to admit a batch run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRunRequest {
    pub account_id: AccountId,
    pub subjects: Vec<String>,
    pub check_kind: CheckKind,
    #[serde(default)]
    pub options: CheckOptions,
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
    #[serde(default)]
    pub schedule_id: Option<ScheduleId>,
    /// Repeating a request with the same key returns the run created the first time.
    #[serde(default)]
    pub admission_key: Option<String>,
}

impl CreateRunRequest {
    pub fn new(account_id: AccountId, check_kind: CheckKind, subjects: Vec<String>) -> Self {
        Self {
            account_id,
            subjects,
            check_kind,
            options: CheckOptions::default(),
            triggered_by: default_triggered_by(),
            schedule_id: None,
            admission_key: None,
        }
    }

    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_admission_key(mut self, key: impl Into<String>) -> Self {
        self.admission_key = Some(key.into());
        self
    }

    pub fn for_schedule(mut self, schedule_id: ScheduleId) -> Self {
        self.schedule_id = Some(schedule_id);
        self.triggered_by = "schedule".to_string();
        self
    }

    pub fn triggered_by(mut self, source: impl Into<String>) -> Self {
        self.triggered_by = source.into();
        self
    }
}

/// State of a run after one `run` invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum RunProgress {
    /// The run reached a terminal status.
    Finished(BatchRun),
    /// The invocation budget ran out, or another executor still holds items.
    /// Calling `run` again resumes from the remaining pending items.
    Suspended(BatchRun),
}

impl RunProgress {
    pub fn run(&self) -> &BatchRun {
        match self {
            RunProgress::Finished(run) | RunProgress::Suspended(run) => run,
        }
    }

    pub fn into_run(self) -> BatchRun {
        match self {
            RunProgress::Finished(run) | RunProgress::Suspended(run) => run,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunProgress::Finished(_))
    }
}

/// Stop signal shared by the dispatcher loop and its workers. The first reason
/// recorded wins.
#[derive(Clone, Debug, Default)]
struct RunAbort {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl RunAbort {
    fn trip(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    fn reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }
}

/// Per-run context cloned into every worker task.
#[derive(Clone)]
struct ItemWorker {
    runs: Arc<dyn BatchRunRepository>,
    prober: Arc<dyn Prober>,
    permits: Arc<Semaphore>,
    abort: RunAbort,
    run_id: BatchRunId,
    surfaces: Arc<[Surface]>,
    options: CheckOptions,
    unit_price: i64,
    probe_timeout: std::time::Duration,
}

impl ItemWorker {
    async fn probe(&self, subject: &str, surface: Surface) -> std::result::Result<SurfaceResult, ProbeError> {
        let request = ProbeRequest {
            subject: subject.to_string(),
            surface,
            options: self.options.clone(),
        };
        let outcome = match tokio::time::timeout(self.probe_timeout, self.prober.check(&request)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(ProbeError::timeout(format!(
                    "no answer within {}s",
                    self.probe_timeout.as_secs_f64()
                )));
            }
        };
        Ok(SurfaceResult {
            surface,
            status: SurfaceStatus::Completed,
            position: outcome.position.filter(|_| outcome.found),
            error: None,
            detail: outcome.detail,
        })
    }

    async fn process(self, item: BatchRunItem) -> Result<()> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MeterError::Internal(format!("worker pool closed: {e}")))?;

        if self.abort.is_tripped() {
            let reason = self
                .abort
                .reason()
                .unwrap_or_else(|| "dispatch cancelled".to_string());
            return self.record(&item, ItemStatus::Skipped, Vec::new(), Some(reason)).await;
        }

        let mut surfaces = Vec::with_capacity(self.surfaces.len());
        for &surface in self.surfaces.iter() {
            if self.abort.is_tripped() {
                surfaces.push(SurfaceResult {
                    surface,
                    status: SurfaceStatus::Failed,
                    position: None,
                    error: Some("dispatch cancelled".to_string()),
                    detail: serde_json::Value::Null,
                });
                continue;
            }

            match self.probe(&item.subject_id, surface).await {
                Ok(result) => surfaces.push(result),
                Err(err) => {
                    if err.is_systemic() {
                        warn!(
                            target: TARGET,
                            run_id = %self.run_id,
                            subject = %item.subject_id,
                            error = %err,
                            "systemic provider error, stopping dispatch"
                        );
                        self.abort.trip(format!("provider error: {err}"));
                    } else {
                        debug!(
                            target: TARGET,
                            run_id = %self.run_id,
                            subject = %item.subject_id,
                            surface = %surface,
                            error = %err,
                            "probe failed"
                        );
                    }
                    surfaces.push(SurfaceResult {
                        surface,
                        status: SurfaceStatus::Failed,
                        position: None,
                        error: Some(err.to_string()),
                        detail: json!({ "kind": err.kind.as_str(), "retryable": err.retryable }),
                    });
                }
            }
        }

        let succeeded = surfaces.iter().filter(|s| s.is_success()).count();
        let (status, error_message) = if succeeded > 0 {
            (ItemStatus::Completed, None)
        } else {
            let first_error = surfaces.iter().find_map(|s| s.error.clone());
            (ItemStatus::Failed, first_error)
        };
        self.record(&item, status, surfaces, error_message).await
    }

    async fn record(
        &self,
        item: &BatchRunItem,
        status: ItemStatus,
        surfaces: Vec<SurfaceResult>,
        error_message: Option<String>,
    ) -> Result<()> {
        let credits_used =
            self.unit_price * surfaces.iter().filter(|s| s.is_success()).count() as i64;
        let result = ItemResult {
            status,
            surfaces,
            credits_used,
            error_message,
            completed_at: Utc::now(),
        };
        if !self.runs.record_item_result(item.id, &result).await? {
            warn!(
                target: TARGET,
                run_id = %self.run_id,
                item_id = %item.id,
                "item already left processing, result discarded"
            );
        }
        Ok(())
    }
}

/// Admits runs, reserves their credits, drives items through the providers,
/// and reconciles the reservation once the run is terminal.
pub struct BatchRunCoordinator {
    ledger: CreditLedger,
    runs: Arc<dyn BatchRunRepository>,
    probers: ProberRegistry,
    config: CoordinatorConfig,
    active: Mutex<HashMap<BatchRunId, RunAbort>>,
    summaries: Option<Arc<SummaryAggregator>>,
}

impl fmt::Debug for BatchRunCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunCoordinator")
            .field("probers", &self.probers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Identity of "the same batch" for the re-trigger guard.
pub fn run_key(schedule_id: Option<ScheduleId>, kind: CheckKind, subjects: &[String]) -> String {
    if let Some(schedule_id) = schedule_id {
        return format!("schedule:{schedule_id}");
    }
    let mut sorted: Vec<&str> = subjects.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for subject in sorted {
        hasher.update(b"\n");
        hasher.update(subject.as_bytes());
    }
    format!("batch:{}", hex::encode(hasher.finalize()))
}

/// Trim subjects and reject blank, duplicate, or too many of them.
pub fn normalize_subjects(subjects: &[String], max_items: usize) -> Result<Vec<String>> {
    if subjects.is_empty() {
        return Err(MeterError::InvalidBatchRequest(
            "a batch needs at least one subject".to_string(),
        ));
    }
    if subjects.len() > max_items {
        return Err(MeterError::InvalidBatchRequest(format!(
            "a batch accepts at most {max_items} subjects, got {}",
            subjects.len()
        )));
    }

    let mut seen = HashSet::with_capacity(subjects.len());
    let mut normalized = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            return Err(MeterError::InvalidBatchRequest(
                "subjects must not be blank".to_string(),
            ));
        }
        if !seen.insert(trimmed.to_string()) {
            return Err(MeterError::InvalidBatchRequest(format!(
                "subject '{trimmed}' appears more than once"
            )));
        }
        normalized.push(trimmed.to_string());
    }
    Ok(normalized)
}

impl BatchRunCoordinator {
    pub fn new(
        ledger: CreditLedger,
        runs: Arc<dyn BatchRunRepository>,
        probers: ProberRegistry,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            runs,
            probers,
            config,
            active: Mutex::new(HashMap::new()),
            summaries: None,
        }
    }

    /// Refresh the daily summary of every scheduled run this coordinator settles.
    pub fn with_summaries(mut self, aggregator: Arc<SummaryAggregator>) -> Self {
        self.summaries = Some(aggregator);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Admit a run: validate, price, reserve credits, and persist the run with
    /// one pending item per subject. Nothing is persisted when admission fails.
    pub async fn create_run(&self, request: CreateRunRequest) -> Result<BatchRun> {
        let subjects = normalize_subjects(&request.subjects, self.config.max_items_per_run)?;
        let kind = request.check_kind;
        let per_item = credits_per_item(kind, &request.options, &self.config.pricing)?;
        let per_surface = self.config.pricing.unit_price(kind);
        if !self.probers.contains(kind) {
            return Err(MeterError::InvalidBatchRequest(format!(
                "no provider is configured for {kind}"
            )));
        }
        let estimated = per_item * subjects.len() as i64;
        let key = run_key(request.schedule_id, kind, &subjects);
        let account_id = request.account_id;

        if let Some(active) = self.runs.find_active_run(account_id, &key).await? {
            if request.admission_key.as_deref() == Some(active.admission_key.as_str()) {
                return Ok(active);
            }
            info!(target: TARGET, account_id = %account_id, run_id = %active.id, "re-trigger rejected");
            return Err(MeterError::RunAlreadyActive { run_id: active.id });
        }

        let admission_key = match request.admission_key {
            Some(key) if !key.trim().is_empty() => key,
            Some(_) => {
                return Err(MeterError::InvalidBatchRequest(
                    "admission key must not be blank".to_string(),
                ));
            }
            None => uuid::Uuid::now_v7().to_string(),
        };
        if let Some(existing) = self
            .runs
            .find_by_admission_key(account_id, &admission_key)
            .await?
        {
            debug!(target: TARGET, run_id = %existing.id, "admission replayed");
            return Ok(existing);
        }

        let run_id = BatchRunId::new();
        let debit_key = format!("batch-run:{admission_key}");
        let receipt = self
            .ledger
            .debit(
                account_id,
                estimated,
                DebitRequest::new(debit_key.clone(), kind.as_str()).with_metadata(json!({
                    "batch_run_id": run_id,
                    "items": subjects.len(),
                    "credits_per_item": per_item,
                })),
            )
            .await?;

        let now = Utc::now();
        let run = BatchRun {
            id: run_id,
            account_id,
            schedule_id: request.schedule_id,
            run_key: key,
            admission_key: admission_key.clone(),
            check_kind: kind,
            options: request.options,
            status: BatchRunStatus::Pending,
            total_items: subjects.len() as i64,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            skipped_items: 0,
            estimated_credits: estimated,
            credits_per_surface: per_surface,
            total_credits_used: 0,
            credits_refunded: 0,
            debit_key: debit_key.clone(),
            error_message: None,
            triggered_by: request.triggered_by,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        let items: Vec<BatchRunItem> = subjects
            .into_iter()
            .enumerate()
            .map(|(position, subject)| BatchRunItem::pending(run_id, subject, position as i32, now))
            .collect();

        let inserted = match self.runs.insert_run(&run, &items).await {
            Ok(outcome) => outcome,
            Err(MeterError::Conflict(_)) => {
                // A concurrent request with the same admission key persisted first.
                return self
                    .runs
                    .find_by_admission_key(account_id, &admission_key)
                    .await?
                    .ok_or_else(|| {
                        MeterError::Internal(format!(
                            "admission key '{admission_key}' conflicted but no run holds it"
                        ))
                    });
            }
            Err(err) => return Err(err),
        };

        match inserted {
            RunInsertOutcome::Inserted => {
                info!(
                    target: TARGET,
                    run_id = %run.id,
                    account_id = %account_id,
                    kind = kind.as_str(),
                    items = run.total_items,
                    credits = estimated,
                    "batch run admitted"
                );
                Ok(run)
            }
            RunInsertOutcome::ActiveRunExists(other_id) => {
                if let Some(other) = self.runs.get_run(other_id).await? {
                    if other.admission_key == admission_key {
                        return Ok(other);
                    }
                }
                if !receipt.replayed {
                    self.ledger.refund(account_id, estimated, &debit_key).await?;
                }
                info!(
                    target: TARGET,
                    account_id = %account_id,
                    run_id = %other_id,
                    "lost admission race, reservation refunded"
                );
                Err(MeterError::RunAlreadyActive { run_id: other_id })
            }
        }
    }

    /// Execute pending items until the run finishes, the invocation budget is
    /// spent, or a systemic error stops dispatch.
    pub async fn run(&self, run_id: BatchRunId) -> Result<RunProgress> {
        let deadline = Instant::now() + self.config.invocation_budget;
        let Some(run) = self.runs.start_run(run_id, Utc::now()).await? else {
            let run = self.load(run_id).await?;
            return Ok(RunProgress::Finished(run));
        };

        let abort = {
            let mut active = self.active.lock().await;
            active.entry(run_id).or_default().clone()
        };
        let outcome = self.dispatch(&run, &abort, deadline).await;
        self.active.lock().await.remove(&run_id);
        outcome?;

        if let Some(reason) = abort.reason() {
            self.runs
                .skip_unfinished_items(run_id, false, &reason, Utc::now())
                .await?;
            let run = self.load(run_id).await?;
            let run = self.settle(&run, BatchRunStatus::Failed, Some(reason)).await?;
            return Ok(RunProgress::Finished(run));
        }

        let run = self.load(run_id).await?;
        if run.processed_items >= run.total_items {
            let run = self.settle(&run, BatchRunStatus::Completed, None).await?;
            Ok(RunProgress::Finished(run))
        } else {
            debug!(
                target: TARGET,
                run_id = %run_id,
                remaining = run.remaining_items(),
                "invocation ended with items outstanding"
            );
            Ok(RunProgress::Suspended(run))
        }
    }

    async fn dispatch(&self, run: &BatchRun, abort: &RunAbort, deadline: Instant) -> Result<()> {
        let prober = match self.probers.get(run.check_kind) {
            Ok(prober) => prober,
            Err(err) => {
                abort.trip(err.to_string());
                return Ok(());
            }
        };
        let surfaces = match resolve_surfaces(run.check_kind, &run.options) {
            Ok(surfaces) => surfaces,
            Err(err) => {
                abort.trip(err.to_string());
                return Ok(());
            }
        };

        let width = self.config.max_parallel_probes.max(1);
        let worker = ItemWorker {
            runs: self.runs.clone(),
            prober,
            permits: Arc::new(Semaphore::new(width)),
            abort: abort.clone(),
            run_id: run.id,
            surfaces: surfaces.into(),
            options: run.options.clone(),
            unit_price: run.credits_per_surface,
            probe_timeout: self.config.probe_timeout,
        };

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut claimed_any = false;
        let mut exhausted = false;

        loop {
            if abort.is_tripped() {
                break;
            }
            if claimed_any && Instant::now() >= deadline {
                info!(target: TARGET, run_id = %run.id, "invocation budget spent");
                break;
            }

            if !exhausted && tasks.len() < width {
                let claimed = self
                    .runs
                    .claim_pending_items(run.id, self.config.claim_slice.max(1), Utc::now())
                    .await?;
                if claimed.is_empty() {
                    exhausted = true;
                } else {
                    claimed_any = true;
                    for item in claimed {
                        tasks.spawn(worker.clone().process(item));
                    }
                }
                continue;
            }

            match tasks.join_next().await {
                Some(joined) => Self::log_worker_result(run.id, joined),
                None => break,
            }
        }

        // In-flight calls always finish and are recorded.
        while let Some(joined) = tasks.join_next().await {
            Self::log_worker_result(run.id, joined);
        }
        Ok(())
    }

    fn log_worker_result(run_id: BatchRunId, joined: std::result::Result<Result<()>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(target: TARGET, run_id = %run_id, error = %err, "failed to record item"),
            Err(err) => error!(target: TARGET, run_id = %run_id, error = %err, "item worker panicked"),
        }
    }

    /// Settle a run whose items are all terminal.
    pub async fn finalize(&self, run_id: BatchRunId) -> Result<BatchRun> {
        let run = self.load(run_id).await?;
        if run.is_terminal() {
            return Ok(run);
        }
        if run.processed_items < run.total_items {
            return Err(MeterError::Conflict(format!(
                "run {run_id} still has {} unfinished items",
                run.remaining_items()
            )));
        }
        self.settle(&run, BatchRunStatus::Completed, None).await
    }

    /// Refund the unused reservation, then write the terminal status. Both
    /// steps are idempotent, so racing settlers converge on the same result.
    pub(crate) async fn settle(
        &self,
        run: &BatchRun,
        status: BatchRunStatus,
        error_message: Option<String>,
    ) -> Result<BatchRun> {
        let items = self.runs.list_items(run.id).await?;
        let used: i64 = items.iter().map(|item| item.credits_used).sum();
        let unused = (run.estimated_credits - used).max(0);

        self.ledger
            .refund(run.account_id, unused, &run.debit_key)
            .await?;

        let finalization = RunFinalization {
            status,
            total_credits_used: used,
            credits_refunded: unused,
            error_message,
            completed_at: Utc::now(),
        };
        if self.runs.finalize_run(run.id, &finalization).await? {
            info!(
                target: TARGET,
                run_id = %run.id,
                account_id = %run.account_id,
                status = status.as_str(),
                credits = used,
                refunded = unused,
                "batch run finalized"
            );
        } else {
            debug!(target: TARGET, run_id = %run.id, "run already finalized elsewhere");
        }

        let settled = self.load(run.id).await?;
        if let (Some(aggregator), Some(_)) = (&self.summaries, settled.schedule_id) {
            if let Err(err) = aggregator.record_run(&settled).await {
                warn!(target: TARGET, run_id = %run.id, error = %err, "summary refresh failed");
            }
        }
        Ok(settled)
    }

    /// Stop a run. A run executing in this process is signalled and settles
    /// once its in-flight calls return; otherwise it is settled here.
    pub async fn cancel(&self, account_id: AccountId, run_id: BatchRunId, reason: &str) -> Result<BatchRun> {
        let run = self.owned_run(account_id, run_id).await?;
        if run.is_terminal() {
            return Ok(run);
        }
        let reason = format!("cancelled: {reason}");

        if let Some(abort) = self.active.lock().await.get(&run_id).cloned() {
            info!(target: TARGET, run_id = %run_id, "signalling running batch to stop");
            abort.trip(reason);
            return Ok(run);
        }

        self.runs
            .skip_unfinished_items(run_id, true, &reason, Utc::now())
            .await?;
        let run = self.load(run_id).await?;
        self.settle(&run, BatchRunStatus::Failed, Some(reason)).await
    }

    /// Start a new, separately priced batch over the failed subjects of a
    /// terminal run.
    pub async fn retry_failed(
        &self,
        account_id: AccountId,
        run_id: BatchRunId,
        triggered_by: &str,
    ) -> Result<BatchRun> {
        let run = self.owned_run(account_id, run_id).await?;
        if !run.is_terminal() {
            return Err(MeterError::Conflict(format!("run {run_id} is still {}", run.status.as_str())));
        }
        let failed: Vec<String> = self
            .runs
            .list_items(run_id)
            .await?
            .into_iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .map(|item| item.subject_id)
            .collect();
        if failed.is_empty() {
            return Err(MeterError::InvalidBatchRequest(format!(
                "run {run_id} has no failed items to retry"
            )));
        }

        let request = CreateRunRequest::new(account_id, run.check_kind, failed)
            .with_options(run.options)
            .with_admission_key(format!("retry:{run_id}"))
            .triggered_by(triggered_by);
        self.create_run(request).await
    }

    /// Side-effect-free status read; defaults to the account's latest run.
    pub async fn status(
        &self,
        account_id: AccountId,
        run_id: Option<BatchRunId>,
        include_items: bool,
    ) -> Result<BatchStatusView> {
        let run = match run_id {
            Some(run_id) => self.owned_run(account_id, run_id).await?,
            None => self
                .runs
                .latest_run(account_id)
                .await?
                .ok_or_else(|| MeterError::NotFound(format!("no batch runs for account {account_id}")))?,
        };
        let items = if include_items {
            Some(self.runs.list_items(run.id).await?)
        } else {
            None
        };
        Ok(BatchStatusView::from_run(&run, items))
    }

    async fn owned_run(&self, account_id: AccountId, run_id: BatchRunId) -> Result<BatchRun> {
        match self.runs.get_run(run_id).await? {
            Some(run) if run.account_id == account_id => Ok(run),
            _ => Err(MeterError::NotFound(format!("batch run {run_id}"))),
        }
    }

    /// Whether a `run` invocation for this run is in progress in this process.
    pub async fn is_executing(&self, run_id: BatchRunId) -> bool {
        self.active.lock().await.contains_key(&run_id)
    }

    pub async fn get_run(&self, run_id: BatchRunId) -> Result<BatchRun> {
        self.load(run_id).await
    }

    async fn load(&self, run_id: BatchRunId) -> Result<BatchRun> {
        self.runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| MeterError::NotFound(format!("batch run {run_id}")))
    }

    /// Drive a run to completion in the background, resuming after each spent
    /// invocation budget.
    pub fn spawn_run(self: &Arc<Self>, run_id: BatchRunId) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_processed = None;
            loop {
                match coordinator.run(run_id).await {
                    Ok(RunProgress::Finished(_)) => break,
                    Ok(RunProgress::Suspended(run)) => {
                        if last_processed == Some(run.processed_items) {
                            debug!(
                                target: TARGET,
                                run_id = %run_id,
                                "no progress since last invocation, leaving run to its executor"
                            );
                            break;
                        }
                        last_processed = Some(run.processed_items);
                        tokio::task::yield_now().await;
                    }
                    Err(err) => {
                        error!(target: TARGET, run_id = %run_id, error = %err, "batch run execution failed");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_key_ignores_subject_order() {
        let a = run_key(None, CheckKind::RankCheck, &["b".into(), "a".into()]);
        let b = run_key(None, CheckKind::RankCheck, &["a".into(), "b".into()]);
        let c = run_key(None, CheckKind::AiVisibility, &["a".into(), "b".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("batch:"));
    }

    #[test]
    fn scheduled_runs_key_on_schedule() {
        let schedule = ScheduleId::new();
        assert_eq!(
            run_key(Some(schedule), CheckKind::RankCheck, &["x".into()]),
            format!("schedule:{schedule}")
        );
    }

    #[test]
    fn subjects_are_trimmed_and_deduplicated_strictly() {
        assert_eq!(
            normalize_subjects(&[" rust ".into(), "tokio".into()], 10).unwrap(),
            vec!["rust".to_string(), "tokio".to_string()]
        );
        assert!(normalize_subjects(&[], 10).is_err());
        assert!(normalize_subjects(&["a".into(), " a".into()], 10).is_err());
        assert!(normalize_subjects(&["  ".into()], 10).is_err());
        assert!(normalize_subjects(&["a".into(), "b".into()], 1).is_err());
    }
}
