use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::calculator::next_after_run;
use crate::batch::{BatchRunCoordinator, CreateRunRequest};
use crate::database::ports::ScheduleRepository;
use crate::error::Result;
use crate::types::{BatchRunId, ScheduleConfig};

const TARGET: &str = "schedule::dispatcher";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Most schedules admitted per tick.
    pub batch_limit: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            batch_limit: 100,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub due: usize,
    pub dispatched: Vec<BatchRunId>,
    /// Slots another dispatcher claimed first.
    pub lost_claims: usize,
    pub failures: usize,
}

/// Admission key of the run fired for one schedule slot.
pub fn slot_admission_key(schedule: &ScheduleConfig, slot: DateTime<Utc>) -> String {
    format!(
        "schedule:{}:{}",
        schedule.id,
        slot.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Time-based trigger: turns due schedule slots into batch runs.
pub struct ScheduleDispatcher {
    schedules: Arc<dyn ScheduleRepository>,
    coordinator: Arc<BatchRunCoordinator>,
    config: DispatcherConfig,
}

impl fmt::Debug for ScheduleDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScheduleDispatcher {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        coordinator: Arc<BatchRunCoordinator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            schedules,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Claim every due slot and admit a run for it. Execution is left to the
    /// caller (see [`ScheduleDispatcher::execute`]).
    ///
    /// The claim is a compare-and-set on `next_scheduled_at`, so concurrent
    /// dispatchers never fire the same slot twice. A slot whose run cannot be
    /// admitted (for example, insufficient credits) still advances.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let due = self
            .schedules
            .due_schedules(now, self.config.batch_limit)
            .await?;
        let mut report = DispatchReport {
            due: due.len(),
            ..DispatchReport::default()
        };

        for schedule in due {
            let Some(slot) = schedule.next_scheduled_at else {
                continue;
            };
            let next = match next_after_run(&schedule.recurrence, slot, now) {
                Ok(next) => next,
                Err(err) => {
                    warn!(target: TARGET, schedule_id = %schedule.id, error = %err, "cannot compute next slot");
                    report.failures += 1;
                    continue;
                }
            };

            if !self.schedules.claim_slot(schedule.id, slot, next, now).await? {
                debug!(target: TARGET, schedule_id = %schedule.id, %slot, "slot already claimed");
                report.lost_claims += 1;
                continue;
            }

            let subjects = self.schedules.subjects(schedule.id).await?;
            let request = CreateRunRequest::new(schedule.account_id, schedule.check_kind, subjects)
                .with_options(schedule.options.clone())
                .for_schedule(schedule.id)
                .with_admission_key(slot_admission_key(&schedule, slot));

            match self.coordinator.create_run(request).await {
                Ok(run) => {
                    info!(
                        target: TARGET,
                        schedule_id = %schedule.id,
                        run_id = %run.id,
                        %slot,
                        %next,
                        "scheduled run admitted"
                    );
                    report.dispatched.push(run.id);
                }
                Err(err) => {
                    warn!(
                        target: TARGET,
                        schedule_id = %schedule.id,
                        %slot,
                        error = %err,
                        "scheduled run not admitted"
                    );
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Run a dispatched batch to completion. Settlement refreshes the
    /// schedule's daily summary.
    pub fn execute(&self, run_id: BatchRunId) -> JoinHandle<()> {
        self.coordinator.spawn_run(run_id)
    }

    /// Tick on the configured interval until `shutdown` fires.
    pub async fn run_until_cancelled(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(target: TARGET, "dispatcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.tick(Utc::now()).await {
                        Ok(report) => {
                            for run_id in report.dispatched {
                                self.execute(run_id);
                            }
                        }
                        Err(err) => warn!(target: TARGET, error = %err, "dispatch tick failed"),
                    }
                }
            }
        }
    }
}
