//! Persistence: repository ports plus the Postgres and in-memory adapters.

pub mod infrastructure;
pub mod ports;

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "postgres")]
use std::time::Duration;

#[cfg(feature = "postgres")]
use sqlx::{PgPool, postgres::PgPoolOptions};
#[cfg(feature = "postgres")]
use tracing::info;

#[cfg(feature = "postgres")]
use crate::error::{MeterError, Result};

use infrastructure::memory::InMemoryStore;
use ports::{BatchRunRepository, CreditLedgerRepository, ScheduleRepository, SummaryRepository};

/// Bundle of repository handles the services are built from.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn CreditLedgerRepository>,
    pub runs: Arc<dyn BatchRunRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub summaries: Arc<dyn SummaryRepository>,
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    /// All four ports served by one shared in-memory store.
    pub fn in_memory(store: InMemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            ledger: store.clone(),
            runs: store.clone(),
            schedules: store.clone(),
            summaries: store,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: PgPool) -> Self {
        use infrastructure::postgres::{
            PostgresBatchRunRepository, PostgresCreditLedgerRepository,
            PostgresScheduleRepository, PostgresSummaryRepository,
        };

        Self {
            ledger: Arc::new(PostgresCreditLedgerRepository::new(pool.clone())),
            runs: Arc::new(PostgresBatchRunRepository::new(pool.clone())),
            schedules: Arc::new(PostgresScheduleRepository::new(pool.clone())),
            summaries: Arc::new(PostgresSummaryRepository::new(pool)),
        }
    }
}

/// Open a pool and bring the schema up to date.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .map_err(|e| MeterError::Internal(format!("Failed to connect to database: {e}")))?;

    crate::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| MeterError::Internal(format!("Migration failed: {e}")))?;

    info!(max_connections, "database pool ready");
    Ok(pool)
}
