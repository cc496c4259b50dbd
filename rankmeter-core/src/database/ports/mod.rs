//! Repository ports (interfaces) grouped by bounded context.
//! Services depend on these traits; implementations live under
//! `database::infrastructure` (Postgres and in-memory).

pub mod batch_runs;
pub mod ledger;
pub mod schedules;
pub mod summaries;

pub use batch_runs::{BatchRunRepository, RunInsertOutcome};
pub use ledger::CreditLedgerRepository;
pub use schedules::ScheduleRepository;
pub use summaries::SummaryRepository;
