pub mod db_url;
pub mod error;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use rankmeter_core::batch::{CoordinatorConfig, HousekeeperConfig};
use rankmeter_core::schedule::DispatcherConfig;
use rankmeter_core::types::{ALL_CHECK_KINDS, CheckKind};
use tracing::debug;
use url::Url;

use self::error::ConfigLoadError;
use crate::models::sources::{EnvConfig, FileConfig, FileProvidersConfig};
use crate::models::{
    Config, ConfigMetadata, DatabaseConfig, ProviderConfig, ProvidersConfig, ServerConfig,
};
use crate::util::parse_duration;
use crate::validation::{self, ConfigWarnings};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["rankmeter.toml", "config/rankmeter.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Seed the process environment from `.env`, then compose.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_from_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose from an already gathered environment; never touches `.env`.
    pub fn load_from_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let source = ConfigPathSource {
            explicit: self.options.config_path.clone(),
            env: env.config_path.clone(),
            default: DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists()),
        };

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), ?provenance, "loaded configuration file");

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No rankmeter.toml detected; falling back to environment variables",
            "Pass --config or set RANKMETER_CONFIG to use a configuration file",
        );
    }

    let FileConfig {
        server: file_server,
        database: file_database,
        coordinator: file_coordinator,
        housekeeper: file_housekeeper,
        dispatcher: file_dispatcher,
        pricing: file_pricing,
        providers: file_providers,
    } = file_config.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(3000),
    };

    let database = DatabaseConfig {
        url: db_url::resolve_database_url(&env, &file_database)?,
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(10),
    };

    let defaults = CoordinatorConfig::default();
    let coordinator = CoordinatorConfig {
        max_parallel_probes: env
            .max_parallel_probes
            .or(file_coordinator.max_parallel_probes)
            .unwrap_or(defaults.max_parallel_probes),
        probe_timeout: duration_field(
            "coordinator.probe_timeout",
            env.probe_timeout.as_deref(),
            file_coordinator.probe_timeout.as_deref(),
            defaults.probe_timeout,
        )?,
        invocation_budget: duration_field(
            "coordinator.invocation_budget",
            env.invocation_budget.as_deref(),
            file_coordinator.invocation_budget.as_deref(),
            defaults.invocation_budget,
        )?,
        claim_slice: file_coordinator.claim_slice.unwrap_or(defaults.claim_slice),
        max_items_per_run: file_coordinator
            .max_items_per_run
            .unwrap_or(defaults.max_items_per_run),
        pricing: file_pricing.unwrap_or_default(),
    };

    let defaults = HousekeeperConfig::default();
    let housekeeper = HousekeeperConfig {
        interval: duration_field(
            "housekeeper.interval",
            None,
            file_housekeeper.interval.as_deref(),
            defaults.interval,
        )?,
        stale_run_after: duration_field(
            "housekeeper.stale_run_after",
            env.stale_run_after.as_deref(),
            file_housekeeper.stale_run_after.as_deref(),
            defaults.stale_run_after,
        )?,
        resume_idle_after: duration_field(
            "housekeeper.resume_idle_after",
            None,
            file_housekeeper.resume_idle_after.as_deref(),
            defaults.resume_idle_after,
        )?,
    };

    let defaults = DispatcherConfig::default();
    let dispatcher = DispatcherConfig {
        enabled: env
            .dispatcher_enabled
            .or(file_dispatcher.enabled)
            .unwrap_or(defaults.enabled),
        interval: duration_field(
            "dispatcher.interval",
            None,
            file_dispatcher.interval.as_deref(),
            defaults.interval,
        )?,
        batch_limit: file_dispatcher.batch_limit.unwrap_or(defaults.batch_limit),
    };

    let providers = resolve_providers(&env, &file_providers, coordinator.probe_timeout)?;

    let config = Config {
        server,
        database,
        coordinator,
        housekeeper,
        dispatcher,
        providers,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);

    Ok((config, warnings))
}

fn duration_field(
    field: &'static str,
    env: Option<&str>,
    file: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => parse_duration(raw).map_err(|source| ConfigLoadError::InvalidDuration {
            field,
            value: raw.to_string(),
            source,
        }),
        None => Ok(default),
    }
}

fn resolve_providers(
    env: &EnvConfig,
    file: &FileProvidersConfig,
    default_timeout: Duration,
) -> Result<ProvidersConfig, ConfigLoadError> {
    let mut providers = ProvidersConfig::default();

    for kind in ALL_CHECK_KINDS {
        let env_provider = env.provider(kind);
        let file_provider = file.get(kind).cloned().unwrap_or_default();

        let Some(raw_endpoint) = env_provider
            .endpoint
            .clone()
            .or(file_provider.endpoint)
            .filter(|value| !value.trim().is_empty())
        else {
            continue;
        };
        let endpoint =
            Url::parse(raw_endpoint.trim()).map_err(|source| ConfigLoadError::InvalidEndpoint {
                kind: kind.as_str(),
                value: raw_endpoint.clone(),
                source,
            })?;

        let api_key = match env_provider.api_key.clone().or(file_provider.api_key) {
            Some(key) => Some(key),
            None => read_first_secret(&[
                env_provider.api_key_file.as_deref(),
                file_provider.api_key_file.as_deref(),
            ])?,
        };

        let timeout = match file_provider.timeout.as_deref() {
            Some(raw) => parse_duration(raw).map_err(|source| ConfigLoadError::InvalidDuration {
                field: provider_timeout_field(kind),
                value: raw.to_string(),
                source,
            })?,
            None => default_timeout,
        };

        let provider = ProviderConfig {
            endpoint,
            api_key,
            timeout,
        };
        match kind {
            CheckKind::RankCheck => providers.rank_check = Some(provider),
            CheckKind::AiVisibility => providers.ai_visibility = Some(provider),
            CheckKind::BacklinkAudit => providers.backlink_audit = Some(provider),
        }
    }

    Ok(providers)
}

fn provider_timeout_field(kind: CheckKind) -> &'static str {
    match kind {
        CheckKind::RankCheck => "providers.rank_check.timeout",
        CheckKind::AiVisibility => "providers.ai_visibility.timeout",
        CheckKind::BacklinkAudit => "providers.backlink_audit.timeout",
    }
}

fn read_first_secret(paths: &[Option<&Path>]) -> Result<Option<String>, ConfigLoadError> {
    for path in paths.iter().flatten() {
        if let Some(secret) = db_url::read_secret_file(path)? {
            return Ok(Some(secret));
        }
    }
    Ok(None)
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(self, ConfigPathProvenance::Explicit | ConfigPathProvenance::Env)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let (config, warnings) = compose_config(None, env_from(&[]), None).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.coordinator, CoordinatorConfig::default());
        assert_eq!(config.housekeeper, HousekeeperConfig::default());
        assert!(config.providers.is_empty());
        assert!(!warnings.is_empty());
    }

    #[test]
    fn env_overrides_file_and_file_overrides_defaults() {
        let file = config_file(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[coordinator]
max_parallel_probes = 2
probe_timeout = "10s"
claim_slice = 4

[housekeeper]
stale_run_after = "45m"
resume_idle_after = "5m"

[dispatcher]
enabled = false
interval = "2m"

[pricing]
backlink_audit_per_domain = 7

[providers.rank_check]
endpoint = "https://serp.example.com/v1/check"
api_key = "file-key"
timeout = "20s"
"#,
        );
        let env = env_from(&[
            ("SERVER_PORT", "9090"),
            ("RANKMETER_MAX_PARALLEL_PROBES", "6"),
            ("RANK_CHECK_API_KEY", "env-key"),
            ("AI_VISIBILITY_ENDPOINT", "https://answers.example.com/probe"),
        ]);

        let load = ConfigLoader::new()
            .with_config_path(file.path())
            .load_from_env(env)
            .unwrap();
        let config = load.config;

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.coordinator.max_parallel_probes, 6);
        assert_eq!(config.coordinator.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.coordinator.claim_slice, 4);
        assert_eq!(config.housekeeper.stale_run_after, Duration::from_secs(45 * 60));
        assert_eq!(config.housekeeper.resume_idle_after, Duration::from_secs(5 * 60));
        assert!(!config.dispatcher.enabled);
        assert_eq!(config.dispatcher.interval, Duration::from_secs(120));
        assert_eq!(config.coordinator.pricing.backlink_audit_per_domain, 7);
        assert_eq!(config.coordinator.pricing.rank_check_per_surface, 1);
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));

        let rank = config.providers.get(CheckKind::RankCheck).unwrap();
        assert_eq!(rank.api_key.as_deref(), Some("env-key"));
        assert_eq!(rank.timeout, Duration::from_secs(20));
        let answers = config.providers.get(CheckKind::AiVisibility).unwrap();
        assert_eq!(answers.endpoint.host_str(), Some("answers.example.com"));
        assert_eq!(answers.timeout, Duration::from_secs(10));
        assert!(config.providers.get(CheckKind::BacklinkAudit).is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::new()
            .with_config_path("/nonexistent/rankmeter.toml")
            .load_from_env(env_from(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));

        let err = ConfigLoader::new()
            .load_from_env(env_from(&[("RANKMETER_CONFIG", "/nonexistent/env.toml")]))
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn malformed_toml_reports_parse_error() {
        let file = config_file("[server\nport = 1");
        let err = ConfigLoader::new()
            .with_config_path(file.path())
            .load_from_env(env_from(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let err = compose_config(None, env_from(&[("RANKMETER_PROBE_TIMEOUT", "later")]), None)
            .unwrap_err();
        match err {
            ConfigLoadError::InvalidDuration { field, value, .. } => {
                assert_eq!(field, "coordinator.probe_timeout");
                assert_eq!(value, "later");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let err = compose_config(
            None,
            env_from(&[("BACKLINK_AUDIT_ENDPOINT", "not a url")]),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidEndpoint { kind: "backlink_audit", .. }
        ));
    }

    #[test]
    fn api_key_can_come_from_a_secret_file() {
        let mut secret = tempfile::NamedTempFile::new().unwrap();
        writeln!(secret, "  from-file  ").unwrap();
        let path = secret.path().display().to_string();
        let env = env_from(&[
            ("RANK_CHECK_ENDPOINT", "https://serp.example.com/check"),
            ("RANK_CHECK_API_KEY_FILE", path.as_str()),
        ]);
        let (config, _) = compose_config(None, env, None).unwrap();
        let rank = config.providers.get(CheckKind::RankCheck).unwrap();
        assert_eq!(rank.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn guard_rails_reject_zero_parallelism() {
        let err = compose_config(
            None,
            env_from(&[("RANKMETER_MAX_PARALLEL_PROBES", "0")]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::GuardRail(_)));
    }
}
