use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::HousekeeperConfig;
use super::coordinator::BatchRunCoordinator;
use crate::database::ports::BatchRunRepository;
use crate::error::{MeterError, Result};
use crate::types::{BatchRunId, BatchRunStatus, ItemStatus};

const TARGET: &str = "batch::housekeeper";
pub const STALE_RUN_REASON: &str = "run exceeded maximum age";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    pub examined: usize,
    pub reaped: Vec<BatchRunId>,
    pub failures: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeReport {
    pub examined: usize,
    pub resumed: Vec<BatchRunId>,
}

fn chrono_duration(value: std::time::Duration, field: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(value)
        .map_err(|e| MeterError::Internal(format!("{field} out of range: {e}")))
}

/// Force-finalizes runs that stopped reporting item results, so their
/// reservation is refunded and the re-trigger guard is released. Idle runs
/// that still have pending items are handed back to the coordinator first.
pub struct RunHousekeeper {
    coordinator: Arc<BatchRunCoordinator>,
    runs: Arc<dyn BatchRunRepository>,
    config: HousekeeperConfig,
}

impl std::fmt::Debug for RunHousekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHousekeeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunHousekeeper {
    pub fn new(
        coordinator: Arc<BatchRunCoordinator>,
        runs: Arc<dyn BatchRunRepository>,
        config: HousekeeperConfig,
    ) -> Self {
        Self {
            coordinator,
            runs,
            config,
        }
    }

    pub fn config(&self) -> &HousekeeperConfig {
        &self.config
    }

    pub async fn reap_stale_runs(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let max_age = chrono_duration(self.config.stale_run_after, "stale_run_after")?;
        let stale = self.runs.stale_runs(now - max_age).await?;

        let mut report = ReapReport {
            examined: stale.len(),
            ..ReapReport::default()
        };
        for run in stale {
            let reaped = async {
                self.runs
                    .skip_unfinished_items(run.id, true, STALE_RUN_REASON, now)
                    .await?;
                let current = self
                    .runs
                    .get_run(run.id)
                    .await?
                    .ok_or_else(|| MeterError::NotFound(format!("batch run {}", run.id)))?;
                self.coordinator
                    .settle(&current, BatchRunStatus::Failed, Some(STALE_RUN_REASON.to_string()))
                    .await
            }
            .await;

            match reaped {
                Ok(settled) => {
                    info!(
                        target: TARGET,
                        run_id = %settled.id,
                        account_id = %settled.account_id,
                        refunded = settled.credits_refunded,
                        "reaped stale run"
                    );
                    report.reaped.push(settled.id);
                }
                Err(err) => {
                    warn!(target: TARGET, run_id = %run.id, error = %err, "failed to reap stale run");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Restart execution of runs whose executor went away (a restarted
    /// process, a dropped task) while items were still pending. Runs already
    /// past `stale_run_after` are left for reaping.
    pub async fn resume_interrupted_runs(&self, now: DateTime<Utc>) -> Result<ResumeReport> {
        let idle = chrono_duration(self.config.resume_idle_after, "resume_idle_after")?;
        let max_age = chrono_duration(self.config.stale_run_after, "stale_run_after")?;
        let idle_runs = self.runs.stale_runs(now - idle).await?;

        let mut report = ResumeReport::default();
        for run in idle_runs {
            if run.updated_at < now - max_age || self.coordinator.is_executing(run.id).await {
                continue;
            }
            report.examined += 1;
            let items = self.runs.list_items(run.id).await?;
            if !items.iter().any(|item| item.status == ItemStatus::Pending) {
                continue;
            }
            info!(
                target: TARGET,
                run_id = %run.id,
                status = run.status.as_str(),
                remaining = run.remaining_items(),
                "resuming interrupted run"
            );
            self.coordinator.spawn_run(run.id);
            report.resumed.push(run.id);
        }
        Ok(report)
    }

    /// One housekeeping pass: reap what is past saving, then resume the rest.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(ReapReport, ResumeReport)> {
        let reaped = self.reap_stale_runs(now).await?;
        let resumed = self.resume_interrupted_runs(now).await?;
        Ok((reaped, resumed))
    }

    /// Sweep on the configured interval until `shutdown` fires.
    pub async fn run_until_cancelled(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(target: TARGET, "housekeeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(err) = self.sweep(Utc::now()).await {
                        warn!(target: TARGET, error = %err, "housekeeper sweep failed");
                    }
                }
            }
        }
    }
}
