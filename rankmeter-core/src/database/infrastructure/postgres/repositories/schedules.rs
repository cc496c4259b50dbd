use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::columns::{db_error, get, json, label, to_json};
use crate::database::ports::ScheduleRepository;
use crate::error::{MeterError, Result};
use crate::types::{CheckKind, Frequency, Recurrence, ScheduleConfig, ScheduleId};

const SCHEDULE_COLUMNS: &str = "id, account_id, check_kind, options, frequency, day_of_week, \
     day_of_month, hour_utc, enabled, next_scheduled_at, last_scheduled_run_at, created_at, \
     updated_at";

#[derive(Clone, Debug)]
pub struct PostgresScheduleRepository {
    pool: PgPool,
}

impl PostgresScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_row(row: &PgRow) -> Result<ScheduleConfig> {
        let small = |column: &str| -> Result<Option<u8>> {
            get::<Option<i16>>(row, column)?
                .map(|value| {
                    u8::try_from(value).map_err(|_| {
                        MeterError::Internal(format!("{column} out of range: {value}"))
                    })
                })
                .transpose()
        };

        let hour_utc = small("hour_utc")?
            .ok_or_else(|| MeterError::Internal("hour_utc is null".to_string()))?;

        Ok(ScheduleConfig {
            id: get::<Uuid>(row, "id")?.into(),
            account_id: get::<Uuid>(row, "account_id")?.into(),
            check_kind: label(row, "check_kind", |raw| raw.parse::<CheckKind>().ok())?,
            options: json(row, "options")?,
            recurrence: Recurrence {
                frequency: label(row, "frequency", Frequency::parse)?,
                day_of_week: small("day_of_week")?,
                day_of_month: small("day_of_month")?,
                hour_utc,
            },
            enabled: get(row, "enabled")?,
            next_scheduled_at: get(row, "next_scheduled_at")?,
            last_scheduled_run_at: get(row, "last_scheduled_run_at")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    async fn insert_schedule(&self, schedule: &ScheduleConfig) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO check_schedules (
                id, account_id, check_kind, options, frequency, day_of_week, day_of_month,
                hour_utc, enabled, next_scheduled_at, last_scheduled_run_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(schedule.id.to_uuid())
        .bind(schedule.account_id.to_uuid())
        .bind(schedule.check_kind.as_str())
        .bind(to_json(&schedule.options)?)
        .bind(schedule.recurrence.frequency.as_str())
        .bind(schedule.recurrence.day_of_week.map(i16::from))
        .bind(schedule.recurrence.day_of_month.map(i16::from))
        .bind(i16::from(schedule.recurrence.hour_utc))
        .bind(schedule.enabled)
        .bind(schedule.next_scheduled_at)
        .bind(schedule.last_scheduled_run_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(self.pool())
        .await
        .map_err(db_error("Failed to insert schedule"))?;

        if result.rows_affected() == 0 {
            return Err(MeterError::Conflict(format!(
                "schedule {} already exists",
                schedule.id
            )));
        }
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: ScheduleId) -> Result<Option<ScheduleConfig>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM check_schedules WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(schedule_id.to_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(db_error("Failed to load schedule"))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn update_schedule(&self, schedule: &ScheduleConfig) -> Result<ScheduleConfig> {
        let sql = format!(
            r#"
            UPDATE check_schedules
            SET frequency = $2,
                day_of_week = $3,
                day_of_month = $4,
                hour_utc = $5,
                enabled = $6,
                next_scheduled_at = $7,
                updated_at = $8
            WHERE id = $1
            RETURNING {SCHEDULE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(schedule.id.to_uuid())
            .bind(schedule.recurrence.frequency.as_str())
            .bind(schedule.recurrence.day_of_week.map(i16::from))
            .bind(schedule.recurrence.day_of_month.map(i16::from))
            .bind(i16::from(schedule.recurrence.hour_utc))
            .bind(schedule.enabled)
            .bind(schedule.next_scheduled_at)
            .bind(schedule.updated_at)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error("Failed to update schedule"))?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(MeterError::NotFound(format!("schedule {}", schedule.id))),
        }
    }

    async fn due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduleConfig>> {
        let sql = format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM check_schedules
            WHERE enabled AND next_scheduled_at <= $1
            ORDER BY next_scheduled_at
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(db_error("Failed to list due schedules"))?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn claim_slot(
        &self,
        schedule_id: ScheduleId,
        expected_next: DateTime<Utc>,
        next_scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE check_schedules
            SET last_scheduled_run_at = $2,
                next_scheduled_at = $3,
                updated_at = $4
            WHERE id = $1 AND next_scheduled_at = $2
            "#,
        )
        .bind(schedule_id.to_uuid())
        .bind(expected_next)
        .bind(next_scheduled_at)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(db_error("Failed to claim schedule slot"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn subjects(&self, schedule_id: ScheduleId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT subject_id FROM check_schedule_subjects WHERE schedule_id = $1 ORDER BY position",
        )
        .bind(schedule_id.to_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(db_error("Failed to load schedule subjects"))?;
        rows.iter().map(|row| get(row, "subject_id")).collect()
    }

    async fn replace_subjects(&self, schedule_id: ScheduleId, subjects: &[String]) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin subjects transaction"))?;

        sqlx::query("DELETE FROM check_schedule_subjects WHERE schedule_id = $1")
            .bind(schedule_id.to_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to clear schedule subjects"))?;

        for (position, subject) in subjects.iter().enumerate() {
            sqlx::query(
                "INSERT INTO check_schedule_subjects (schedule_id, position, subject_id) VALUES ($1, $2, $3)",
            )
            .bind(schedule_id.to_uuid())
            .bind(position as i32)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert schedule subject"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit subjects transaction"))?;
        Ok(())
    }
}
