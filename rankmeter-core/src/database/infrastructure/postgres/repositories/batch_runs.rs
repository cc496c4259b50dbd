use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::columns::{db_error, get, json, label, to_json};
use crate::database::ports::{BatchRunRepository, RunInsertOutcome};
use crate::error::{MeterError, Result};
use crate::types::{
    AccountId, BatchRun, BatchRunId, BatchRunItem, BatchRunItemId, BatchRunStatus, CheckKind,
    ItemResult, ItemStatus, RunFinalization, ScheduleId,
};

const RUN_COLUMNS: &str = "id, account_id, schedule_id, run_key, admission_key, check_kind, \
     options, status, total_items, processed_items, successful_items, failed_items, \
     skipped_items, estimated_credits, credits_per_surface, total_credits_used, credits_refunded, \
     debit_key, error_message, triggered_by, created_at, started_at, completed_at, updated_at";

const ITEM_COLUMNS: &str = "id, batch_run_id, subject_id, position, status, surfaces, \
     credits_used, error_message, created_at, started_at, completed_at";

#[derive(Clone, Debug)]
pub struct PostgresBatchRunRepository {
    pool: PgPool,
}

impl PostgresBatchRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_run(row: &PgRow) -> Result<BatchRun> {
        Ok(BatchRun {
            id: get::<Uuid>(row, "id")?.into(),
            account_id: get::<Uuid>(row, "account_id")?.into(),
            schedule_id: get::<Option<Uuid>>(row, "schedule_id")?.map(ScheduleId::from),
            run_key: get(row, "run_key")?,
            admission_key: get(row, "admission_key")?,
            check_kind: label(row, "check_kind", |raw| raw.parse::<CheckKind>().ok())?,
            options: json(row, "options")?,
            status: label(row, "status", BatchRunStatus::parse)?,
            total_items: get(row, "total_items")?,
            processed_items: get(row, "processed_items")?,
            successful_items: get(row, "successful_items")?,
            failed_items: get(row, "failed_items")?,
            skipped_items: get(row, "skipped_items")?,
            estimated_credits: get(row, "estimated_credits")?,
            credits_per_surface: get(row, "credits_per_surface")?,
            total_credits_used: get(row, "total_credits_used")?,
            credits_refunded: get(row, "credits_refunded")?,
            debit_key: get(row, "debit_key")?,
            error_message: get(row, "error_message")?,
            triggered_by: get(row, "triggered_by")?,
            created_at: get(row, "created_at")?,
            started_at: get(row, "started_at")?,
            completed_at: get(row, "completed_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn map_item(row: &PgRow) -> Result<BatchRunItem> {
        Ok(BatchRunItem {
            id: get::<Uuid>(row, "id")?.into(),
            batch_run_id: get::<Uuid>(row, "batch_run_id")?.into(),
            subject_id: get(row, "subject_id")?,
            position: get(row, "position")?,
            status: label(row, "status", ItemStatus::parse)?,
            surfaces: json(row, "surfaces")?,
            credits_used: get(row, "credits_used")?,
            error_message: get(row, "error_message")?,
            created_at: get(row, "created_at")?,
            started_at: get(row, "started_at")?,
            completed_at: get(row, "completed_at")?,
        })
    }

    async fn fetch_run(&self, sql: &str, context: &str, binds: RunLookup<'_>) -> Result<Option<BatchRun>> {
        let query = sqlx::query(sql);
        let query = match binds {
            RunLookup::Id(id) => query.bind(id),
            RunLookup::Account(account) => query.bind(account),
            RunLookup::AccountKey(account, key) => query.bind(account).bind(key),
        };
        let row = query
            .fetch_optional(self.pool())
            .await
            .map_err(db_error(context))?;
        row.as_ref().map(Self::map_run).transpose()
    }
}

enum RunLookup<'a> {
    Id(Uuid),
    Account(Uuid),
    AccountKey(Uuid, &'a str),
}

#[async_trait]
impl BatchRunRepository for PostgresBatchRunRepository {
    async fn insert_run(&self, run: &BatchRun, items: &[BatchRunItem]) -> Result<RunInsertOutcome> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin run transaction"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO batch_runs (
                id, account_id, schedule_id, run_key, admission_key, check_kind, options,
                status, total_items, processed_items, successful_items, failed_items,
                skipped_items, estimated_credits, credits_per_surface, total_credits_used,
                credits_refunded, debit_key, error_message, triggered_by, created_at,
                started_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(run.id.to_uuid())
        .bind(run.account_id.to_uuid())
        .bind(run.schedule_id.map(|id| id.to_uuid()))
        .bind(&run.run_key)
        .bind(&run.admission_key)
        .bind(run.check_kind.as_str())
        .bind(to_json(&run.options)?)
        .bind(run.status.as_str())
        .bind(run.total_items)
        .bind(run.processed_items)
        .bind(run.successful_items)
        .bind(run.failed_items)
        .bind(run.skipped_items)
        .bind(run.estimated_credits)
        .bind(run.credits_per_surface)
        .bind(run.total_credits_used)
        .bind(run.credits_refunded)
        .bind(&run.debit_key)
        .bind(&run.error_message)
        .bind(&run.triggered_by)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to insert batch run"))?;

        if inserted.is_none() {
            let active = sqlx::query(
                r#"
                SELECT id FROM batch_runs
                WHERE account_id = $1 AND run_key = $2 AND status IN ('pending', 'processing')
                "#,
            )
            .bind(run.account_id.to_uuid())
            .bind(&run.run_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error("Failed to look up active run"))?;

            return match active {
                Some(row) => Ok(RunInsertOutcome::ActiveRunExists(
                    get::<Uuid>(&row, "id")?.into(),
                )),
                None => Err(MeterError::Conflict(format!(
                    "admission key '{}' is already in use",
                    run.admission_key
                ))),
            };
        }

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO batch_run_items (
                    id, batch_run_id, subject_id, position, status, surfaces,
                    credits_used, error_message, created_at, started_at, completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(item.id.to_uuid())
            .bind(item.batch_run_id.to_uuid())
            .bind(&item.subject_id)
            .bind(item.position)
            .bind(item.status.as_str())
            .bind(to_json(&item.surfaces)?)
            .bind(item.credits_used)
            .bind(&item.error_message)
            .bind(item.created_at)
            .bind(item.started_at)
            .bind(item.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert batch run item"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit run transaction"))?;
        Ok(RunInsertOutcome::Inserted)
    }

    async fn get_run(&self, run_id: BatchRunId) -> Result<Option<BatchRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM batch_runs WHERE id = $1");
        self.fetch_run(&sql, "Failed to load batch run", RunLookup::Id(run_id.to_uuid()))
            .await
    }

    async fn latest_run(&self, account_id: AccountId) -> Result<Option<BatchRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM batch_runs WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        self.fetch_run(
            &sql,
            "Failed to load latest batch run",
            RunLookup::Account(account_id.to_uuid()),
        )
        .await
    }

    async fn find_active_run(&self, account_id: AccountId, run_key: &str) -> Result<Option<BatchRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM batch_runs WHERE account_id = $1 AND run_key = $2 \
             AND status IN ('pending', 'processing')"
        );
        self.fetch_run(
            &sql,
            "Failed to look up active run",
            RunLookup::AccountKey(account_id.to_uuid(), run_key),
        )
        .await
    }

    async fn find_by_admission_key(
        &self,
        account_id: AccountId,
        admission_key: &str,
    ) -> Result<Option<BatchRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM batch_runs WHERE account_id = $1 AND admission_key = $2"
        );
        self.fetch_run(
            &sql,
            "Failed to look up run by admission key",
            RunLookup::AccountKey(account_id.to_uuid(), admission_key),
        )
        .await
    }

    async fn list_items(&self, run_id: BatchRunId) -> Result<Vec<BatchRunItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM batch_run_items WHERE batch_run_id = $1 ORDER BY position"
        );
        let rows = sqlx::query(&sql)
            .bind(run_id.to_uuid())
            .fetch_all(self.pool())
            .await
            .map_err(db_error("Failed to list batch run items"))?;
        rows.iter().map(Self::map_item).collect()
    }

    async fn start_run(&self, run_id: BatchRunId, now: DateTime<Utc>) -> Result<Option<BatchRun>> {
        let sql = format!(
            r#"
            UPDATE batch_runs
            SET status = 'processing',
                started_at = COALESCE(started_at, $2),
                updated_at = $2
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING {RUN_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(run_id.to_uuid())
            .bind(now)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error("Failed to start batch run"))?;

        match row {
            Some(row) => Self::map_run(&row).map(Some),
            None => match self.get_run(run_id).await? {
                Some(_) => Ok(None),
                None => Err(MeterError::NotFound(format!("batch run {run_id}"))),
            },
        }
    }

    async fn claim_pending_items(
        &self,
        run_id: BatchRunId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<BatchRunItem>> {
        let sql = format!(
            r#"
            UPDATE batch_run_items
            SET status = 'processing', started_at = $3
            WHERE id IN (
                SELECT id FROM batch_run_items
                WHERE batch_run_id = $1 AND status = 'pending'
                ORDER BY position
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {ITEM_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(run_id.to_uuid())
            .bind(i64::from(limit))
            .bind(now)
            .fetch_all(self.pool())
            .await
            .map_err(db_error("Failed to claim batch run items"))?;

        let mut items = rows.iter().map(Self::map_item).collect::<Result<Vec<_>>>()?;
        items.sort_by_key(|item| item.position);
        Ok(items)
    }

    async fn record_item_result(&self, item_id: BatchRunItemId, result: &ItemResult) -> Result<bool> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin item transaction"))?;

        let updated = sqlx::query(
            r#"
            UPDATE batch_run_items
            SET status = $2, surfaces = $3, credits_used = $4, error_message = $5, completed_at = $6
            WHERE id = $1 AND status = 'processing'
            RETURNING batch_run_id
            "#,
        )
        .bind(item_id.to_uuid())
        .bind(result.status.as_str())
        .bind(to_json(&result.surfaces)?)
        .bind(result.credits_used)
        .bind(&result.error_message)
        .bind(result.completed_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to record item result"))?;

        let Some(row) = updated else {
            return Ok(false);
        };
        let run_id: Uuid = get(&row, "batch_run_id")?;

        sqlx::query(
            r#"
            UPDATE batch_runs
            SET processed_items = processed_items + 1,
                successful_items = successful_items + CASE WHEN $2 = 'completed' THEN 1 ELSE 0 END,
                failed_items = failed_items + CASE WHEN $2 = 'failed' THEN 1 ELSE 0 END,
                skipped_items = skipped_items + CASE WHEN $2 = 'skipped' THEN 1 ELSE 0 END,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(result.status.as_str())
        .bind(result.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update run counters"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit item transaction"))?;
        Ok(true)
    }

    async fn skip_unfinished_items(
        &self,
        run_id: BatchRunId,
        include_processing: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin skip transaction"))?;

        let skipped = sqlx::query(
            r#"
            UPDATE batch_run_items
            SET status = 'skipped', error_message = $3, completed_at = $4
            WHERE batch_run_id = $1
              AND (status = 'pending' OR ($2 AND status = 'processing'))
            "#,
        )
        .bind(run_id.to_uuid())
        .bind(include_processing)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to skip unfinished items"))?
        .rows_affected();

        if skipped > 0 {
            sqlx::query(
                r#"
                UPDATE batch_runs
                SET processed_items = processed_items + $2,
                    skipped_items = skipped_items + $2,
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(run_id.to_uuid())
            .bind(skipped as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to update run counters"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit skip transaction"))?;
        Ok(skipped)
    }

    async fn finalize_run(&self, run_id: BatchRunId, finalization: &RunFinalization) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE batch_runs
            SET status = $2,
                total_credits_used = $3,
                credits_refunded = $4,
                error_message = $5,
                completed_at = $6,
                updated_at = $6
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(run_id.to_uuid())
        .bind(finalization.status.as_str())
        .bind(finalization.total_credits_used)
        .bind(finalization.credits_refunded)
        .bind(&finalization.error_message)
        .bind(finalization.completed_at)
        .execute(self.pool())
        .await
        .map_err(db_error("Failed to finalize batch run"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<BatchRun>> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS} FROM batch_runs
            WHERE status IN ('pending', 'processing') AND updated_at < $1
            ORDER BY updated_at
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(self.pool())
            .await
            .map_err(db_error("Failed to list stale runs"))?;
        rows.iter().map(Self::map_run).collect()
    }

    async fn schedule_items_between(
        &self,
        schedule_id: ScheduleId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BatchRunItem>> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.batch_run_id, i.subject_id, i.position, i.status, i.surfaces,
                   i.credits_used, i.error_message, i.created_at, i.started_at, i.completed_at
            FROM batch_run_items i
            JOIN batch_runs r ON r.id = i.batch_run_id
            WHERE r.schedule_id = $1
              AND r.status IN ('completed', 'failed')
              AND r.completed_at >= $2
              AND r.completed_at < $3
            ORDER BY r.completed_at, i.position
            "#,
        )
        .bind(schedule_id.to_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await
        .map_err(db_error("Failed to load schedule items"))?;
        rows.iter().map(Self::map_item).collect()
    }
}
