use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("invalid pricing table: {reason}")]
    InvalidPricing { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(&mut self, message: impl Into<String>, hint: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Reject settings the coordinator cannot run with and collect the ones that
/// only look suspicious.
pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let coordinator = &config.coordinator;

    for (field, is_zero) in [
        ("coordinator.max_parallel_probes", coordinator.max_parallel_probes == 0),
        ("coordinator.claim_slice", coordinator.claim_slice == 0),
        ("coordinator.max_items_per_run", coordinator.max_items_per_run == 0),
        ("coordinator.probe_timeout", coordinator.probe_timeout.is_zero()),
        ("coordinator.invocation_budget", coordinator.invocation_budget.is_zero()),
        ("housekeeper.interval", config.housekeeper.interval.is_zero()),
        ("housekeeper.resume_idle_after", config.housekeeper.resume_idle_after.is_zero()),
        ("dispatcher.interval", config.dispatcher.interval.is_zero()),
        ("dispatcher.batch_limit", config.dispatcher.batch_limit == 0),
        ("database.max_connections", config.database.max_connections == 0),
    ] {
        if is_zero {
            return Err(ConfigGuardRailError::NonPositive { field });
        }
    }

    coordinator
        .pricing
        .validate()
        .map_err(|err| ConfigGuardRailError::InvalidPricing {
            reason: err.to_string(),
        })?;

    if config.providers.is_empty() {
        warnings.push_with_hint(
            "No check providers configured; every run request will be rejected",
            "Set RANK_CHECK_ENDPOINT (or a [providers.*] section) for each check kind you sell",
        );
    }

    for (kind, provider) in config.providers.configured() {
        if provider.api_key.is_none() {
            warnings.push(format!(
                "{kind} provider at {} has no API key; requests are sent unauthenticated",
                provider.endpoint
            ));
        }
    }

    if config.housekeeper.stale_run_after <= coordinator.invocation_budget {
        warnings.push_with_hint(
            "housekeeper.stale_run_after does not exceed coordinator.invocation_budget",
            "Live runs may be reaped mid-invocation; raise stale_run_after above the budget",
        );
    }

    if config.housekeeper.resume_idle_after >= config.housekeeper.stale_run_after {
        warnings.push_with_hint(
            "housekeeper.resume_idle_after is not below housekeeper.stale_run_after",
            "Interrupted runs are reaped instead of resumed; lower resume_idle_after",
        );
    }

    if coordinator.probe_timeout > coordinator.invocation_budget {
        warnings.push(
            "coordinator.probe_timeout exceeds coordinator.invocation_budget; a single slow probe can outlast an invocation",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL not configured",
            "Provide DATABASE_URL or start the server with --in-memory for local runs",
        );
    }

    Ok(warnings)
}
