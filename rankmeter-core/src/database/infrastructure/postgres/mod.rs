//! PostgreSQL infrastructure adapters implementing the database ports.

pub mod repositories;

pub use repositories::batch_runs::PostgresBatchRunRepository;
pub use repositories::ledger::PostgresCreditLedgerRepository;
pub use repositories::schedules::PostgresScheduleRepository;
pub use repositories::summaries::PostgresSummaryRepository;
