use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::columns::{db_error, get, label};
use crate::database::ports::CreditLedgerRepository;
use crate::error::{MeterError, Result};
use crate::types::{
    AccountId, CreditAppend, DebitAppend, LedgerEntry, LedgerEntryKind, NewLedgerEntry,
};

const ENTRY_COLUMNS: &str = "id, account_id, amount, kind, idempotency_key, feature_type, \
     related_key, metadata, balance_after, created_at";

#[derive(Clone, Debug)]
pub struct PostgresCreditLedgerRepository {
    pool: PgPool,
}

impl PostgresCreditLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_row(row: &PgRow) -> Result<LedgerEntry> {
        Ok(LedgerEntry {
            id: get::<Uuid>(row, "id")?.into(),
            account_id: get::<Uuid>(row, "account_id")?.into(),
            amount: get(row, "amount")?,
            kind: label(row, "kind", LedgerEntryKind::parse)?,
            idempotency_key: get(row, "idempotency_key")?,
            feature_type: get(row, "feature_type")?,
            related_key: get(row, "related_key")?,
            metadata: get(row, "metadata")?,
            balance_after: get(row, "balance_after")?,
            created_at: get(row, "created_at")?,
        })
    }

    /// Serializes every append for one account until the transaction ends.
    async fn lock_account(tx: &mut Transaction<'_, Postgres>, account_id: AccountId) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(account_id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to lock account ledger"))?;
        Ok(())
    }

    async fn balance_in(tx: &mut Transaction<'_, Postgres>, account_id: AccountId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT AS balance FROM credit_ledger WHERE account_id = $1",
        )
        .bind(account_id.to_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error("Failed to read balance"))?;
        get(&row, "balance")
    }

    async fn entry_in(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM credit_ledger WHERE account_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_uuid())
            .bind(idempotency_key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error("Failed to look up ledger entry"))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    /// Conditional insert: the row is only written when the running balance plus
    /// `amount` stays at or above `floor`, and the key is unused.
    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewLedgerEntry,
        floor: Option<i64>,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            r#"
            INSERT INTO credit_ledger (
                id, account_id, amount, kind, idempotency_key, feature_type,
                related_key, metadata, balance_after, created_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, ledger_total.balance + $3, $9
            FROM (
                SELECT COALESCE(SUM(amount), 0)::BIGINT AS balance
                FROM credit_ledger
                WHERE account_id = $2
            ) AS ledger_total
            WHERE $10::BIGINT IS NULL OR ledger_total.balance + $3 >= $10::BIGINT
            ON CONFLICT (account_id, idempotency_key) DO NOTHING
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(entry.id.to_uuid())
            .bind(entry.account_id.to_uuid())
            .bind(entry.amount)
            .bind(entry.kind.as_str())
            .bind(&entry.idempotency_key)
            .bind(&entry.feature_type)
            .bind(&entry.related_key)
            .bind(&entry.metadata)
            .bind(entry.created_at)
            .bind(floor)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error("Failed to append ledger entry"))?;
        row.as_ref().map(Self::map_row).transpose()
    }
}

#[async_trait]
impl CreditLedgerRepository for PostgresCreditLedgerRepository {
    async fn balance(&self, account_id: AccountId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT AS balance FROM credit_ledger WHERE account_id = $1",
        )
        .bind(account_id.to_uuid())
        .fetch_one(self.pool())
        .await
        .map_err(db_error("Failed to read balance"))?;
        get(&row, "balance")
    }

    async fn append_debit(&self, entry: NewLedgerEntry) -> Result<DebitAppend> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin ledger transaction"))?;
        Self::lock_account(&mut tx, entry.account_id).await?;

        let outcome = match Self::insert_entry(&mut tx, &entry, Some(0)).await? {
            Some(stored) => DebitAppend::Appended(stored),
            None => match Self::entry_in(&mut tx, entry.account_id, &entry.idempotency_key).await? {
                Some(existing) => DebitAppend::Existing(existing),
                None => DebitAppend::Insufficient {
                    available: Self::balance_in(&mut tx, entry.account_id).await?,
                },
            },
        };

        tx.commit()
            .await
            .map_err(db_error("Failed to commit ledger transaction"))?;
        Ok(outcome)
    }

    async fn append_credit(&self, entry: NewLedgerEntry) -> Result<CreditAppend> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin ledger transaction"))?;
        Self::lock_account(&mut tx, entry.account_id).await?;

        let outcome = match Self::insert_entry(&mut tx, &entry, None).await? {
            Some(stored) => CreditAppend::Appended(stored),
            None => {
                let existing = Self::entry_in(&mut tx, entry.account_id, &entry.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        MeterError::Internal(format!(
                            "Ledger entry '{}' neither inserted nor found",
                            entry.idempotency_key
                        ))
                    })?;
                CreditAppend::Existing(existing)
            }
        };

        tx.commit()
            .await
            .map_err(db_error("Failed to commit ledger transaction"))?;
        Ok(outcome)
    }

    async fn find_by_key(
        &self,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM credit_ledger WHERE account_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_uuid())
            .bind(idempotency_key)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error("Failed to look up ledger entry"))?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_entries(&self, account_id: AccountId, limit: u32) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM credit_ledger
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_uuid())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(db_error("Failed to list ledger entries"))?;
        rows.iter().map(Self::map_row).collect()
    }
}
