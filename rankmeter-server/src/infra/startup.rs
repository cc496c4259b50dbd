use std::sync::Arc;

use anyhow::{Context, Result};
use rankmeter_config::ProvidersConfig;
use rankmeter_core::probe::{HttpProber, ProberRegistry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::infra::app_state::AppState;

/// One HTTP adapter per configured provider.
pub fn build_probers(providers: &ProvidersConfig) -> Result<ProberRegistry> {
    let mut registry = ProberRegistry::new();
    for (kind, provider) in providers.configured() {
        let prober = HttpProber::new(provider.http_config())
            .with_context(|| format!("failed to build {kind} provider client"))?;
        info!(
            check_kind = kind.as_str(),
            endpoint = %provider.endpoint,
            timeout = ?provider.timeout,
            "provider registered"
        );
        registry.register(kind, Arc::new(prober));
    }
    Ok(registry)
}

/// Start the housekeeper and, when enabled, the schedule dispatcher. Both
/// stop once `shutdown` is cancelled.
pub fn spawn_background_jobs(state: &AppState, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut jobs = Vec::with_capacity(2);

    let housekeeper = state.housekeeper.clone();
    let token = shutdown.clone();
    jobs.push(tokio::spawn(async move {
        housekeeper.run_until_cancelled(token).await;
    }));

    if state.dispatcher.config().enabled {
        let dispatcher = state.dispatcher.clone();
        jobs.push(tokio::spawn(async move {
            dispatcher.run_until_cancelled(shutdown).await;
        }));
    } else {
        info!("schedule dispatcher disabled; rely on POST /api/v1/internal/schedules/dispatch");
    }

    jobs
}
