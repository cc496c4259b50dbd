//! Domain records shared by the ledger, coordinator, scheduler, and summaries.

pub mod check;
pub mod ids;
pub mod ledger;
pub mod run;
pub mod schedule;
pub mod summary;

pub use check::*;
pub use ids::*;
pub use ledger::*;
pub use run::*;
pub use schedule::*;
pub use summary::*;
