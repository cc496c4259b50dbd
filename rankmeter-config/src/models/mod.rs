pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use rankmeter_core::batch::{CoordinatorConfig, HousekeeperConfig};
use rankmeter_core::probe::HttpProberConfig;
use rankmeter_core::schedule::DispatcherConfig;
use rankmeter_core::types::{ALL_CHECK_KINDS, CheckKind};
use url::Url;

/// Effective configuration after env, file and defaults have been composed.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub coordinator: CoordinatorConfig,
    pub housekeeper: HousekeeperConfig,
    pub dispatcher: DispatcherConfig,
    pub providers: ProvidersConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Fully resolved connection URL, credentials included.
    pub url: Option<String>,
    pub max_connections: u32,
}

/// A provider reached through the generic HTTP adapter.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderConfig {
    pub fn http_config(&self) -> HttpProberConfig {
        HttpProberConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvidersConfig {
    pub rank_check: Option<ProviderConfig>,
    pub ai_visibility: Option<ProviderConfig>,
    pub backlink_audit: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, kind: CheckKind) -> Option<&ProviderConfig> {
        match kind {
            CheckKind::RankCheck => self.rank_check.as_ref(),
            CheckKind::AiVisibility => self.ai_visibility.as_ref(),
            CheckKind::BacklinkAudit => self.backlink_audit.as_ref(),
        }
    }

    pub fn configured(&self) -> impl Iterator<Item = (CheckKind, &ProviderConfig)> + '_ {
        ALL_CHECK_KINDS
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|provider| (kind, provider)))
    }

    pub fn is_empty(&self) -> bool {
        self.configured().next().is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
