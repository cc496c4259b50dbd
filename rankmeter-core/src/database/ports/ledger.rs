use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AccountId, CreditAppend, DebitAppend, LedgerEntry, NewLedgerEntry};

/// Append-only credit ledger storage.
///
/// Implementations must enforce uniqueness of `(account_id, idempotency_key)` and
/// perform the debit balance check in the same atomic operation as the insert.
#[async_trait]
pub trait CreditLedgerRepository: Send + Sync {
    /// Sum of all committed entries for the account.
    async fn balance(&self, account_id: AccountId) -> Result<i64>;

    /// Append a debit (negative `amount`) only if the balance covers it.
    async fn append_debit(&self, entry: NewLedgerEntry) -> Result<DebitAppend>;

    /// Append a credit-side entry (refund, purchase, grant) unconditionally.
    async fn append_credit(&self, entry: NewLedgerEntry) -> Result<CreditAppend>;

    async fn find_by_key(
        &self,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> Result<Option<LedgerEntry>>;

    /// Newest-first entries.
    async fn list_entries(&self, account_id: AccountId, limit: u32) -> Result<Vec<LedgerEntry>>;
}
