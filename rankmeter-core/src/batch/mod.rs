//! Batch-run orchestration: admission, bounded dispatch, settlement, and
//! housekeeping of runs that stopped making progress.

pub mod config;
pub mod coordinator;
pub mod housekeeper;
pub mod status;

pub use config::{CoordinatorConfig, HousekeeperConfig};
pub use coordinator::{BatchRunCoordinator, CreateRunRequest, RunProgress, normalize_subjects};
pub use housekeeper::{ReapReport, ResumeReport, RunHousekeeper};
pub use status::BatchStatusView;
