use std::path::PathBuf;

use rankmeter_core::pricing::PricingTable;
use rankmeter_core::types::CheckKind;
use serde::{Deserialize, Serialize};

use crate::util::{non_empty, parse_bool};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub coordinator: FileCoordinatorConfig,
    #[serde(default)]
    pub housekeeper: FileHousekeeperConfig,
    #[serde(default)]
    pub dispatcher: FileDispatcherConfig,
    /// Partial tables fall back to the default price per field.
    pub pricing: Option<PricingTable>,
    #[serde(default)]
    pub providers: FileProvidersConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// Durations are humantime strings such as `"30s"` or `"5m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCoordinatorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_probes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_budget: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_slice: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items_per_run: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHousekeeperConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_run_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_idle_after: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDispatcherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_limit: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileProvidersConfig {
    pub rank_check: Option<FileProviderConfig>,
    pub ai_visibility: Option<FileProviderConfig>,
    pub backlink_audit: Option<FileProviderConfig>,
}

impl FileProvidersConfig {
    pub fn get(&self, kind: CheckKind) -> Option<&FileProviderConfig> {
        match kind {
            CheckKind::RankCheck => self.rank_check.as_ref(),
            CheckKind::AiVisibility => self.ai_visibility.as_ref(),
            CheckKind::BacklinkAudit => self.backlink_audit.as_ref(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Provider settings read from `<KIND>_ENDPOINT` / `<KIND>_API_KEY`.
#[derive(Debug, Default, Clone)]
pub struct EnvProviderConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_key_file: Option<PathBuf>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_password_file: Option<PathBuf>,
    pub database_max_connections: Option<u32>,
    pub max_parallel_probes: Option<usize>,
    pub probe_timeout: Option<String>,
    pub invocation_budget: Option<String>,
    pub stale_run_after: Option<String>,
    pub dispatcher_enabled: Option<bool>,
    pub rank_check: EnvProviderConfig,
    pub ai_visibility: EnvProviderConfig,
    pub backlink_audit: EnvProviderConfig,
}

impl EnvConfig {
    /// Read from the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through an arbitrary variable lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_empty(lookup(name));
        let path = |name: &str| var(name).map(PathBuf::from);
        let provider = |prefix: &str| EnvProviderConfig {
            endpoint: var(&format!("{prefix}_ENDPOINT")),
            api_key: var(&format!("{prefix}_API_KEY")),
            api_key_file: path(&format!("{prefix}_API_KEY_FILE")),
        };

        Self {
            config_path: path("RANKMETER_CONFIG"),
            server_host: var("SERVER_HOST"),
            server_port: var("SERVER_PORT").and_then(|s| s.parse().ok()),
            database_url: var("DATABASE_URL"),
            database_url_file: path("DATABASE_URL_FILE"),
            database_host: var("DATABASE_HOST"),
            database_port: var("DATABASE_PORT").and_then(|s| s.parse().ok()),
            database_user: var("DATABASE_USER"),
            database_name: var("DATABASE_NAME"),
            database_password: var("DATABASE_PASSWORD"),
            database_password_file: path("DATABASE_PASSWORD_FILE"),
            database_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok()),
            max_parallel_probes: var("RANKMETER_MAX_PARALLEL_PROBES")
                .and_then(|s| s.parse().ok()),
            probe_timeout: var("RANKMETER_PROBE_TIMEOUT"),
            invocation_budget: var("RANKMETER_INVOCATION_BUDGET"),
            stale_run_after: var("RANKMETER_STALE_RUN_AFTER"),
            dispatcher_enabled: var("RANKMETER_DISPATCHER_ENABLED")
                .and_then(|raw| parse_bool(&raw)),
            rank_check: provider("RANK_CHECK"),
            ai_visibility: provider("AI_VISIBILITY"),
            backlink_audit: provider("BACKLINK_AUDIT"),
        }
    }

    pub fn provider(&self, kind: CheckKind) -> &EnvProviderConfig {
        match kind {
            CheckKind::RankCheck => &self.rank_check,
            CheckKind::AiVisibility => &self.ai_visibility,
            CheckKind::BacklinkAudit => &self.backlink_audit,
        }
    }
}
