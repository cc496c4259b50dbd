use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::columns::{db_error, get};
use crate::database::ports::SummaryRepository;
use crate::error::Result;
use crate::types::{DailySummary, ScheduleId};

#[derive(Clone, Debug)]
pub struct PostgresSummaryRepository {
    pool: PgPool,
}

impl PostgresSummaryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_row(row: &PgRow) -> Result<DailySummary> {
        Ok(DailySummary {
            schedule_id: get::<Uuid>(row, "schedule_id")?.into(),
            day: get(row, "day")?,
            total_items: get(row, "total_items")?,
            top3: get(row, "top3")?,
            top10: get(row, "top10")?,
            top20: get(row, "top20")?,
            none: get(row, "unranked")?,
            average_position: get(row, "average_position")?,
            updated_at: get(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl SummaryRepository for PostgresSummaryRepository {
    async fn upsert_summary(&self, summary: &DailySummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_daily_summaries (
                schedule_id, day, total_items, top3, top10, top20, unranked,
                average_position, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (schedule_id, day) DO UPDATE SET
                total_items = EXCLUDED.total_items,
                top3 = EXCLUDED.top3,
                top10 = EXCLUDED.top10,
                top20 = EXCLUDED.top20,
                unranked = EXCLUDED.unranked,
                average_position = EXCLUDED.average_position,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(summary.schedule_id.to_uuid())
        .bind(summary.day)
        .bind(summary.total_items)
        .bind(summary.top3)
        .bind(summary.top10)
        .bind(summary.top20)
        .bind(summary.none)
        .bind(summary.average_position)
        .bind(summary.updated_at)
        .execute(self.pool())
        .await
        .map_err(db_error("Failed to upsert daily summary"))?;
        Ok(())
    }

    async fn latest_summaries(&self, schedule_id: ScheduleId, limit: u32) -> Result<Vec<DailySummary>> {
        let rows = sqlx::query(
            r#"
            SELECT schedule_id, day, total_items, top3, top10, top20, unranked,
                   average_position, updated_at
            FROM schedule_daily_summaries
            WHERE schedule_id = $1
            ORDER BY day DESC
            LIMIT $2
            "#,
        )
        .bind(schedule_id.to_uuid())
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(db_error("Failed to load daily summaries"))?;
        rows.iter().map(Self::map_row).collect()
    }
}
