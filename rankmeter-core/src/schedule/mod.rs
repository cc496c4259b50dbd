//! Recurring schedules: slot arithmetic, config updates, and the dispatcher
//! that turns due slots into batch runs.

pub mod calculator;
pub mod dispatcher;
pub mod service;

pub use calculator::{compute_next_run, next_after_run, validate_recurrence};
pub use dispatcher::{DispatchReport, DispatcherConfig, ScheduleDispatcher};
pub use service::ScheduleService;
