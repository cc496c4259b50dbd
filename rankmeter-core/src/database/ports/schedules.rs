use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ScheduleConfig, ScheduleId};

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert_schedule(&self, schedule: &ScheduleConfig) -> Result<()>;

    async fn get_schedule(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleConfig>>;

    /// Write recurrence, enabled flag, and `next_scheduled_at`, leaving
    /// `last_scheduled_run_at` to slot claims. Returns the stored row.
    async fn update_schedule(&self, schedule: &ScheduleConfig) -> Result<ScheduleConfig>;

    /// Enabled schedules with `next_scheduled_at <= now`, oldest slot first.
    async fn due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduleConfig>>;

    /// Compare-and-set on `next_scheduled_at`: only the caller that still sees
    /// `expected_next` advances the schedule. Returns whether the claim won.
    async fn claim_slot(
        &self,
        schedule_id: ScheduleId,
        expected_next: DateTime<Utc>,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Subjects (keywords, questions, domains) a schedule runs against.
    async fn subjects(&self, schedule_id: ScheduleId) -> Result<Vec<String>>;

    async fn replace_subjects(&self, schedule_id: ScheduleId, subjects: &[String]) -> Result<()>;
}
