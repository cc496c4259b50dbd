use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::database::ports::CreditLedgerRepository;
use crate::error::{MeterError, Result};
use crate::types::{
    AccountId, DebitAppend, LedgerEntry, LedgerEntryKind, LedgerReceipt, NewLedgerEntry,
};

const MAX_HISTORY: u32 = 500;

/// Idempotency key of the refund that returns credits reserved under `related_key`.
pub fn refund_key(related_key: &str) -> String {
    format!("refund:{related_key}")
}

/// Caller-supplied identity of a debit.
#[derive(Clone, Debug)]
pub struct DebitRequest {
    pub idempotency_key: String,
    pub feature_type: String,
    pub metadata: Value,
}

impl DebitRequest {
    pub fn new(idempotency_key: impl Into<String>, feature_type: impl Into<String>) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            feature_type: feature_type.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only ledger service. The balance is always derived from the entries;
/// every mutation is keyed so retries apply at most once.
#[derive(Clone)]
pub struct CreditLedger {
    repo: Arc<dyn CreditLedgerRepository>,
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditLedger").finish_non_exhaustive()
    }
}

fn require_positive(amount: i64, what: &str) -> Result<()> {
    if amount <= 0 {
        return Err(MeterError::InvalidAmount(format!(
            "{what} must be a positive number of credits, got {amount}"
        )));
    }
    Ok(())
}

impl CreditLedger {
    pub fn new(repo: Arc<dyn CreditLedgerRepository>) -> Self {
        Self { repo }
    }

    pub async fn get_balance(&self, account_id: AccountId) -> Result<i64> {
        self.repo.balance(account_id).await
    }

    /// Charge `amount` credits. A repeated idempotency key returns the original
    /// receipt with `replayed` set and charges nothing.
    pub async fn debit(
        &self,
        account_id: AccountId,
        amount: i64,
        request: DebitRequest,
    ) -> Result<LedgerReceipt> {
        require_positive(amount, "debit")?;

        let entry = NewLedgerEntry::new(
            account_id,
            LedgerEntryKind::Debit,
            -amount,
            request.idempotency_key,
            request.feature_type,
        )
        .with_metadata(request.metadata);

        match self.repo.append_debit(entry).await? {
            DebitAppend::Appended(stored) => {
                info!(
                    target: "credits::ledger",
                    account_id = %account_id,
                    credits = amount,
                    balance_after = stored.balance_after,
                    key = %stored.idempotency_key,
                    "debited credits"
                );
                Ok(LedgerReceipt::from_entry(&stored, false))
            }
            DebitAppend::Existing(existing) => {
                if existing.kind != LedgerEntryKind::Debit {
                    return Err(MeterError::Conflict(format!(
                        "idempotency key '{}' belongs to a {} entry",
                        existing.idempotency_key,
                        existing.kind.as_str()
                    )));
                }
                debug!(
                    target: "credits::ledger",
                    account_id = %account_id,
                    key = %existing.idempotency_key,
                    "debit replayed"
                );
                Ok(LedgerReceipt::from_entry(&existing, true))
            }
            DebitAppend::Insufficient { available } => {
                warn!(
                    target: "credits::ledger",
                    account_id = %account_id,
                    credits = amount,
                    available,
                    "debit rejected: insufficient credits"
                );
                Err(MeterError::InsufficientCredits {
                    required: amount,
                    available,
                })
            }
        }
    }

    /// Return up to the full amount charged under `related_key`. A zero amount
    /// is a no-op and yields `None`.
    pub async fn refund(
        &self,
        account_id: AccountId,
        amount: i64,
        related_key: &str,
    ) -> Result<Option<LedgerReceipt>> {
        if amount == 0 {
            return Ok(None);
        }
        require_positive(amount, "refund")?;

        let original = self
            .repo
            .find_by_key(account_id, related_key)
            .await?
            .ok_or_else(|| MeterError::NotFound(format!("ledger entry '{related_key}'")))?;
        if original.kind != LedgerEntryKind::Debit {
            return Err(MeterError::InvalidAmount(format!(
                "entry '{related_key}' is not a debit and cannot be refunded"
            )));
        }
        let charged = -original.amount;
        if amount > charged {
            return Err(MeterError::InvalidAmount(format!(
                "refund of {amount} exceeds the {charged} credits charged under '{related_key}'"
            )));
        }

        let entry = NewLedgerEntry::new(
            account_id,
            LedgerEntryKind::Refund,
            amount,
            refund_key(related_key),
            original.feature_type.clone(),
        )
        .with_related_key(related_key);

        let receipt = self.repo.append_credit(entry).await?.into_receipt();
        if receipt.replayed {
            debug!(target: "credits::ledger", account_id = %account_id, related_key, "refund replayed");
        } else {
            info!(
                target: "credits::ledger",
                account_id = %account_id,
                credits = amount,
                balance_after = receipt.balance_after,
                related_key,
                "refunded credits"
            );
        }
        Ok(Some(receipt))
    }

    /// Record a completed credit-pack checkout.
    pub async fn purchase(
        &self,
        account_id: AccountId,
        credits: i64,
        checkout_id: &str,
    ) -> Result<LedgerReceipt> {
        require_positive(credits, "purchase")?;
        if checkout_id.trim().is_empty() {
            return Err(MeterError::InvalidAmount("checkout id must not be blank".to_string()));
        }
        self.credit(
            account_id,
            LedgerEntryKind::Purchase,
            credits,
            format!("purchase:{checkout_id}"),
            "credit_pack",
        )
        .await
    }

    /// Record the allowance of one subscription period.
    pub async fn grant(
        &self,
        account_id: AccountId,
        credits: i64,
        period_key: &str,
    ) -> Result<LedgerReceipt> {
        require_positive(credits, "grant")?;
        if period_key.trim().is_empty() {
            return Err(MeterError::InvalidAmount("period key must not be blank".to_string()));
        }
        self.credit(
            account_id,
            LedgerEntryKind::Grant,
            credits,
            format!("grant:{period_key}"),
            "subscription",
        )
        .await
    }

    /// Newest-first ledger entries, capped at 500.
    pub async fn history(&self, account_id: AccountId, limit: u32) -> Result<Vec<LedgerEntry>> {
        self.repo
            .list_entries(account_id, limit.clamp(1, MAX_HISTORY))
            .await
    }

    async fn credit(
        &self,
        account_id: AccountId,
        kind: LedgerEntryKind,
        credits: i64,
        idempotency_key: String,
        feature_type: &str,
    ) -> Result<LedgerReceipt> {
        let entry = NewLedgerEntry::new(account_id, kind, credits, idempotency_key, feature_type);
        let receipt = self.repo.append_credit(entry).await?.into_receipt();
        if receipt.kind != kind {
            return Err(MeterError::Conflict(format!(
                "idempotency key '{}' belongs to a {} entry",
                receipt.idempotency_key,
                receipt.kind.as_str()
            )));
        }
        info!(
            target: "credits::ledger",
            account_id = %account_id,
            kind = kind.as_str(),
            credits,
            balance_after = receipt.balance_after,
            replayed = receipt.replayed,
            "credited account"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::infrastructure::memory::InMemoryStore;

    fn ledger() -> (CreditLedger, InMemoryStore) {
        let store = InMemoryStore::new();
        (CreditLedger::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn debit_replay_charges_once() {
        let (ledger, store) = ledger();
        let account = AccountId::new();
        ledger.grant(account, 20, "2026-10").await.unwrap();

        let first = ledger
            .debit(account, 8, DebitRequest::new("batch-run:a", "rank_check"))
            .await
            .unwrap();
        let second = ledger
            .debit(account, 8, DebitRequest::new("batch-run:a", "rank_check"))
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.entry_id, second.entry_id);
        assert_eq!(second.balance_after, 12);
        assert_eq!(ledger.get_balance(account).await.unwrap(), 12);
        assert_eq!(store.entry_count(account).await, 2);
    }

    #[tokio::test]
    async fn debit_above_balance_is_rejected_without_entry() {
        let (ledger, store) = ledger();
        let account = AccountId::new();
        ledger.purchase(account, 5, "cs_1").await.unwrap();

        let err = ledger
            .debit(account, 10, DebitRequest::new("batch-run:b", "rank_check"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MeterError::InsufficientCredits {
                required: 10,
                available: 5
            }
        ));
        assert_eq!(store.entry_count(account).await, 1);
    }

    #[tokio::test]
    async fn refund_is_bounded_by_original_charge() {
        let (ledger, _) = ledger();
        let account = AccountId::new();
        ledger.grant(account, 10, "p1").await.unwrap();
        ledger
            .debit(account, 6, DebitRequest::new("batch-run:c", "ai_visibility"))
            .await
            .unwrap();

        assert!(matches!(
            ledger.refund(account, 7, "batch-run:c").await,
            Err(MeterError::InvalidAmount(_))
        ));
        assert!(ledger.refund(account, 0, "batch-run:c").await.unwrap().is_none());

        let receipt = ledger.refund(account, 2, "batch-run:c").await.unwrap().unwrap();
        assert_eq!(receipt.idempotency_key, "refund:batch-run:c");
        assert_eq!(receipt.balance_after, 6);

        let replay = ledger.refund(account, 2, "batch-run:c").await.unwrap().unwrap();
        assert!(replay.replayed);
        assert_eq!(ledger.get_balance(account).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_invalid() {
        let (ledger, _) = ledger();
        let account = AccountId::new();
        assert!(matches!(
            ledger.debit(account, 0, DebitRequest::new("k", "rank_check")).await,
            Err(MeterError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.purchase(account, -3, "cs").await,
            Err(MeterError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.refund(account, -1, "k").await,
            Err(MeterError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let (ledger, _) = ledger();
        let account = AccountId::new();
        ledger.grant(account, 10, "p1").await.unwrap();
        ledger.purchase(account, 50, "cs_9").await.unwrap();
        ledger
            .debit(account, 4, DebitRequest::new("manual:1", "backlink_audit"))
            .await
            .unwrap();

        let entries = ledger.history(account, 10).await.unwrap();
        let kinds: Vec<_> = entries.iter().map(|entry| entry.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEntryKind::Debit,
                LedgerEntryKind::Purchase,
                LedgerEntryKind::Grant
            ]
        );
        assert_eq!(entries[0].balance_after, 56);
    }
}
