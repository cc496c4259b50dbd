//! Prepaid credit accounting.

mod ledger;

pub use ledger::{CreditLedger, DebitRequest, refund_key};
