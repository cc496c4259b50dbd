//! Shared configuration library for Rankmeter.
//!
//! Configuration is composed from three layers, highest precedence first:
//! process environment (optionally seeded from a `.env` file), a TOML file,
//! and built-in defaults. The server binary only ever sees the composed
//! [`Config`] plus any [`ConfigWarnings`] raised while validating it.

pub mod cli;
pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use cli::ConfigArgs;
pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, ProviderConfig, ProvidersConfig, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
