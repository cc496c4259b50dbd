//! PostgreSQL-backed repository implementations.

pub mod batch_runs;
pub mod ledger;
pub mod schedules;
pub mod summaries;

mod columns;
