use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DailySummary, ScheduleId};

#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Insert or replace the row for `(schedule_id, day)`.
    async fn upsert_summary(&self, summary: &DailySummary) -> Result<()>;

    /// Newest day first.
    async fn latest_summaries(&self, schedule_id: ScheduleId, limit: u32) -> Result<Vec<DailySummary>>;
}
