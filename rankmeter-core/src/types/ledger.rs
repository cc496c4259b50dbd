use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{AccountId, LedgerEntryId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    /// Consumption; stored with a negative amount.
    Debit,
    /// Return of an unused reservation, references the original debit.
    Refund,
    /// Credit pack bought through checkout.
    Purchase,
    /// Subscription period allowance.
    Grant,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::Debit => "debit",
            LedgerEntryKind::Refund => "refund",
            LedgerEntryKind::Purchase => "purchase",
            LedgerEntryKind::Grant => "grant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debit" => Some(LedgerEntryKind::Debit),
            "refund" => Some(LedgerEntryKind::Refund),
            "purchase" => Some(LedgerEntryKind::Purchase),
            "grant" => Some(LedgerEntryKind::Grant),
            _ => None,
        }
    }

    pub fn is_credit(&self) -> bool {
        !matches!(self, LedgerEntryKind::Debit)
    }
}

/// Immutable, append-only ledger row. `amount` is signed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub kind: LedgerEntryKind,
    pub idempotency_key: String,
    pub feature_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_key: Option<String>,
    pub metadata: Value,
    /// Balance snapshot taken when the entry was appended.
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Entry to append; the store assigns `balance_after` atomically.
#[derive(Clone, Debug)]
pub struct NewLedgerEntry {
    pub id: LedgerEntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub kind: LedgerEntryKind,
    pub idempotency_key: String,
    pub feature_type: String,
    pub related_key: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    pub fn new(
        account_id: AccountId,
        kind: LedgerEntryKind,
        amount: i64,
        idempotency_key: impl Into<String>,
        feature_type: impl Into<String>,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            account_id,
            amount,
            kind,
            idempotency_key: idempotency_key.into(),
            feature_type: feature_type.into(),
            related_key: None,
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_related_key(mut self, related_key: impl Into<String>) -> Self {
        self.related_key = Some(related_key.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of a ledger append. `replayed` is set when the idempotency key already
/// existed and no new entry was written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub entry_id: LedgerEntryId,
    pub account_id: AccountId,
    pub kind: LedgerEntryKind,
    /// Absolute number of credits moved.
    pub credits: i64,
    pub balance_after: i64,
    pub idempotency_key: String,
    pub replayed: bool,
}

impl LedgerReceipt {
    pub fn from_entry(entry: &LedgerEntry, replayed: bool) -> Self {
        Self {
            entry_id: entry.id,
            account_id: entry.account_id,
            kind: entry.kind,
            credits: entry.amount.abs(),
            balance_after: entry.balance_after,
            idempotency_key: entry.idempotency_key.clone(),
            replayed,
        }
    }
}

/// Outcome of the atomic conditional debit append.
#[derive(Clone, Debug)]
pub enum DebitAppend {
    Appended(LedgerEntry),
    /// An entry with the same idempotency key already exists.
    Existing(LedgerEntry),
    Insufficient { available: i64 },
}

/// Outcome of an unconditional credit append.
#[derive(Clone, Debug)]
pub enum CreditAppend {
    Appended(LedgerEntry),
    Existing(LedgerEntry),
}

impl CreditAppend {
    pub fn into_receipt(self) -> LedgerReceipt {
        match self {
            CreditAppend::Appended(entry) => LedgerReceipt::from_entry(&entry, false),
            CreditAppend::Existing(entry) => LedgerReceipt::from_entry(&entry, true),
        }
    }
}
