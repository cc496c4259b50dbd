use std::path::PathBuf;

use clap::Args;

use crate::loader::{ConfigLoader, ConfigLoaderOptions};

/// Flags every Rankmeter binary accepts for locating its configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a rankmeter.toml (overrides RANKMETER_CONFIG and default locations)
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Path to a .env file to seed the environment from
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn options(&self) -> ConfigLoaderOptions {
        ConfigLoaderOptions {
            config_path: self.config_path.clone(),
            env_file: self.env_file.clone(),
        }
    }

    pub fn loader(&self) -> ConfigLoader {
        ConfigLoader::with_options(self.options())
    }
}
