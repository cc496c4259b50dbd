//! # Rankmeter Core
//!
//! Credit-metered batch-check orchestration for the Rankmeter server.
//!
//! Accounts hold a prepaid credit balance and spend it on batches of paid,
//! rate-limited external lookups (search-rank checks, answer-engine
//! visibility probes, backlink audits). This crate provides:
//!
//! - [`credits`]: the append-only, idempotent credit ledger
//! - [`pricing`]: the per-item price function
//! - [`batch`]: run admission, bounded dispatch, settlement, and housekeeping
//! - [`probe`]: the provider contract plus a generic HTTP adapter
//! - [`schedule`]: recurrence arithmetic and the time-based dispatcher
//! - [`summary`]: daily bucket rollups and trends of scheduled results
//! - [`database`]: repository ports with Postgres and in-memory adapters
//!
//! ## Feature Flags
//!
//! - `postgres` (default): Postgres adapters and the embedded migrations
//! - `postgres-tests`: adapter tests that need `DATABASE_URL`

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod batch;
pub mod credits;
pub mod database;
pub mod error;
pub mod pricing;
pub mod probe;
pub mod schedule;
pub mod summary;
pub mod types;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{MeterError, Result};
