use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::calculator::{compute_next_run, validate_recurrence};
use crate::batch::{CoordinatorConfig, normalize_subjects};
use crate::database::ports::ScheduleRepository;
use crate::error::{MeterError, Result};
use crate::types::{Frequency, NewSchedule, Recurrence, ScheduleConfig, ScheduleId, ScheduleUpdate};

fn field_u8(value: Option<i32>, name: &str, range: std::ops::RangeInclusive<i32>) -> Result<Option<u8>> {
    match value {
        None => Ok(None),
        Some(raw) if range.contains(&raw) => Ok(Some(raw as u8)),
        Some(raw) => Err(MeterError::InvalidSchedule(format!(
            "{name} must be within {}-{}, got {raw}",
            range.start(),
            range.end()
        ))),
    }
}

/// Validate raw update fields and build the recurrence they describe.
pub fn recurrence_from_update(update: &ScheduleUpdate) -> Result<Recurrence> {
    let frequency = Frequency::parse(update.frequency.trim()).ok_or_else(|| {
        MeterError::InvalidSchedule(format!(
            "frequency must be daily, weekly, or monthly, got '{}'",
            update.frequency
        ))
    })?;
    let hour_utc = field_u8(Some(update.hour_utc), "hour_utc", 0..=23)?.unwrap_or_default();
    let recurrence = Recurrence {
        frequency,
        day_of_week: field_u8(update.day_of_week, "day_of_week", 0..=6)?,
        day_of_month: field_u8(update.day_of_month, "day_of_month", 1..=28)?,
        hour_utc,
    };
    validate_recurrence(&recurrence)?;
    Ok(recurrence)
}

/// Read and update recurring schedule configs. Every accepted update
/// recomputes `next_scheduled_at`.
#[derive(Clone)]
pub struct ScheduleService {
    repo: Arc<dyn ScheduleRepository>,
    max_items: usize,
}

impl fmt::Debug for ScheduleService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleService")
            .field("max_items", &self.max_items)
            .finish_non_exhaustive()
    }
}

impl ScheduleService {
    pub fn new(repo: Arc<dyn ScheduleRepository>) -> Self {
        Self {
            repo,
            max_items: CoordinatorConfig::default().max_items_per_run,
        }
    }

    /// Cap tracked subjects at what one run may admit.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Subjects a scheduled run would accept, or `InvalidSchedule`.
    fn tracked_subjects(&self, subjects: &[String]) -> Result<Vec<String>> {
        normalize_subjects(subjects, self.max_items).map_err(|err| match err {
            MeterError::InvalidBatchRequest(message) => MeterError::InvalidSchedule(message),
            other => other,
        })
    }

    /// Returns the stored schedule and its normalized subjects.
    pub async fn create(
        &self,
        new: NewSchedule,
        subjects: &[String],
        now: DateTime<Utc>,
    ) -> Result<(ScheduleConfig, Vec<String>)> {
        let subjects = self.tracked_subjects(subjects)?;
        let recurrence = recurrence_from_update(&new.update)?;
        let enabled = new.update.enabled.unwrap_or(true);
        let schedule = ScheduleConfig {
            id: ScheduleId::new(),
            account_id: new.account_id,
            check_kind: new.check_kind,
            options: new.options,
            recurrence,
            enabled,
            next_scheduled_at: Some(compute_next_run(&recurrence, now)?),
            last_scheduled_run_at: None,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_schedule(&schedule).await?;
        self.repo.replace_subjects(schedule.id, &subjects).await?;
        info!(
            target: "schedule::service",
            schedule_id = %schedule.id,
            frequency = recurrence.frequency.as_str(),
            "schedule created"
        );
        Ok((schedule, subjects))
    }

    pub async fn get(&self, schedule_id: ScheduleId) -> Result<ScheduleConfig> {
        self.repo
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| MeterError::NotFound(format!("schedule {schedule_id}")))
    }

    pub async fn update(
        &self,
        schedule_id: ScheduleId,
        update: ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<ScheduleConfig> {
        let recurrence = recurrence_from_update(&update)?;
        let mut schedule = self.get(schedule_id).await?;

        schedule.recurrence = recurrence;
        if let Some(enabled) = update.enabled {
            schedule.enabled = enabled;
        }
        schedule.next_scheduled_at = Some(compute_next_run(&recurrence, now)?);
        schedule.updated_at = now;
        let schedule = self.repo.update_schedule(&schedule).await?;

        info!(
            target: "schedule::service",
            schedule_id = %schedule_id,
            next_scheduled_at = ?schedule.next_scheduled_at,
            "schedule updated"
        );
        Ok(schedule)
    }

    pub async fn subjects(&self, schedule_id: ScheduleId) -> Result<Vec<String>> {
        self.repo.subjects(schedule_id).await
    }

    pub async fn set_subjects(&self, schedule_id: ScheduleId, subjects: &[String]) -> Result<Vec<String>> {
        let subjects = self.tracked_subjects(subjects)?;
        self.get(schedule_id).await?;
        self.repo.replace_subjects(schedule_id, &subjects).await?;
        Ok(subjects)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::database::infrastructure::memory::InMemoryStore;
    use crate::types::{AccountId, CheckKind, CheckOptions};

    fn update(frequency: &str, dow: Option<i32>, dom: Option<i32>, hour: i32) -> ScheduleUpdate {
        ScheduleUpdate {
            frequency: frequency.to_string(),
            day_of_week: dow,
            day_of_month: dom,
            hour_utc: hour,
            enabled: None,
        }
    }

    #[test]
    fn update_fields_are_range_checked() {
        assert!(recurrence_from_update(&update("weekly", Some(3), None, 9)).is_ok());
        assert!(recurrence_from_update(&update("hourly", None, None, 9)).is_err());
        assert!(recurrence_from_update(&update("weekly", Some(-1), None, 9)).is_err());
        assert!(recurrence_from_update(&update("monthly", None, Some(31), 9)).is_err());
        assert!(recurrence_from_update(&update("daily", None, None, 24)).is_err());
        assert!(recurrence_from_update(&update("daily", Some(1), None, 4)).is_err());
        assert!(recurrence_from_update(&update("monthly", None, None, 4)).is_err());
    }

    #[tokio::test]
    async fn update_recomputes_next_slot() {
        let service = ScheduleService::new(Arc::new(InMemoryStore::new()));
        let created_at = Utc.with_ymd_and_hms(2026, 10, 12, 10, 0, 0).unwrap();
        let (schedule, _) = service
            .create(
                NewSchedule {
                    account_id: AccountId::new(),
                    check_kind: CheckKind::RankCheck,
                    options: CheckOptions::default(),
                    update: update("daily", None, None, 6),
                },
                &["rust crates".to_string()],
                created_at,
            )
            .await
            .unwrap();
        assert_eq!(
            schedule.next_scheduled_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 13, 6, 0, 0).unwrap())
        );

        let updated = service
            .update(schedule.id, update("weekly", Some(3), None, 9), created_at)
            .await
            .unwrap();
        assert_eq!(
            updated.next_scheduled_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap())
        );
        assert_eq!(service.get(schedule.id).await.unwrap(), updated);

        let rejected = service
            .update(schedule.id, update("weekly", None, None, 9), created_at)
            .await;
        assert!(matches!(rejected, Err(MeterError::InvalidSchedule(_))));
    }
}
