//! Concrete adapters for the repository ports.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;
