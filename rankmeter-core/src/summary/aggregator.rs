use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tracing::{debug, info};

use crate::database::ports::{BatchRunRepository, SummaryRepository};
use crate::error::{MeterError, Result};
use crate::types::{
    BatchRun, BatchRunItem, DailySummary, ItemStatus, PositionBucket, ScheduleId, Trend,
};

const TARGET: &str = "summary::aggregator";

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fold item results into one day's bucket counts. Skipped items never ran
/// and are left out.
pub fn summarize_items(
    schedule_id: ScheduleId,
    day: NaiveDate,
    items: &[BatchRunItem],
    now: DateTime<Utc>,
) -> DailySummary {
    let mut summary = DailySummary {
        schedule_id,
        day,
        total_items: 0,
        top3: 0,
        top10: 0,
        top20: 0,
        none: 0,
        average_position: None,
        updated_at: now,
    };
    let mut position_sum = 0u64;
    let mut positioned = 0u64;

    for item in items
        .iter()
        .filter(|item| matches!(item.status, ItemStatus::Completed | ItemStatus::Failed))
    {
        summary.total_items += 1;
        let best = item.best_position();
        match PositionBucket::for_position(best) {
            PositionBucket::Top3 => summary.top3 += 1,
            PositionBucket::Top10 => summary.top10 += 1,
            PositionBucket::Top20 => summary.top20 += 1,
            PositionBucket::None => summary.none += 1,
        }
        if let Some(position) = best {
            position_sum += u64::from(position);
            positioned += 1;
        }
    }

    if positioned > 0 {
        summary.average_position = Some(round2(position_sum as f64 / positioned as f64));
    }
    summary
}

/// Signed change from `previous` to `latest`. The average delta is only
/// present when both days have an average.
pub fn calculate_trend(latest: &DailySummary, previous: &DailySummary) -> Trend {
    Trend {
        latest_day: latest.day,
        previous_day: previous.day,
        top3: latest.top3 - previous.top3,
        top10: latest.top10 - previous.top10,
        top20: latest.top20 - previous.top20,
        none: latest.none - previous.none,
        average_position: match (latest.average_position, previous.average_position) {
            (Some(latest), Some(previous)) => Some(round2(latest - previous)),
            _ => None,
        },
    }
}

#[derive(Clone)]
pub struct SummaryAggregator {
    runs: Arc<dyn BatchRunRepository>,
    summaries: Arc<dyn SummaryRepository>,
}

impl fmt::Debug for SummaryAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryAggregator").finish_non_exhaustive()
    }
}

impl SummaryAggregator {
    pub fn new(runs: Arc<dyn BatchRunRepository>, summaries: Arc<dyn SummaryRepository>) -> Self {
        Self { runs, summaries }
    }

    /// Recompute and store the row for `(schedule_id, day)` from every terminal
    /// run of the schedule completed that day. Safe to call repeatedly.
    pub async fn summarize_day(&self, schedule_id: ScheduleId, day: NaiveDate) -> Result<DailySummary> {
        let start = day
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| MeterError::Internal(format!("invalid summary day {day}")))?;
        let items = self
            .runs
            .schedule_items_between(schedule_id, start, start + Duration::days(1))
            .await?;

        let summary = summarize_items(schedule_id, day, &items, Utc::now());
        self.summaries.upsert_summary(&summary).await?;
        info!(
            target: TARGET,
            schedule_id = %schedule_id,
            %day,
            items = summary.total_items,
            top3 = summary.top3,
            "daily summary updated"
        );
        Ok(summary)
    }

    /// Refresh the summary a finished scheduled run contributes to.
    pub async fn record_run(&self, run: &BatchRun) -> Result<Option<DailySummary>> {
        match (run.schedule_id, run.completed_at) {
            (Some(schedule_id), Some(completed_at)) if run.is_terminal() => self
                .summarize_day(schedule_id, completed_at.date_naive())
                .await
                .map(Some),
            _ => {
                debug!(target: TARGET, run_id = %run.id, "run does not feed a schedule summary");
                Ok(None)
            }
        }
    }

    /// Trend between the two most recent summaries, if there are two.
    pub async fn trend(&self, schedule_id: ScheduleId) -> Result<Option<Trend>> {
        let latest = self.summaries.latest_summaries(schedule_id, 2).await?;
        match latest.as_slice() {
            [latest, previous, ..] => Ok(Some(calculate_trend(latest, previous))),
            _ => Ok(None),
        }
    }
}
