use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rankmeter_config::{ConfigArgs, ConfigLoad};
use rankmeter_core::database::{Stores, connect_postgres, infrastructure::memory::InMemoryStore};
use rankmeter_server::{
    AppState, ServiceSettings, create_app,
    infra::startup::{build_probers, spawn_background_jobs},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "rankmeter-server")]
#[command(about = "Credit-metered batch checks with scheduled runs and trend summaries")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Keep all state in process memory instead of PostgreSQL
    #[arg(long, env = "RANKMETER_IN_MEMORY", default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = cli
        .config
        .loader()
        .load()
        .context("failed to load configuration")?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    info!(
        coordinator.max_parallel_probes = config.coordinator.max_parallel_probes,
        coordinator.probe_timeout = ?config.coordinator.probe_timeout,
        coordinator.invocation_budget = ?config.coordinator.invocation_budget,
        housekeeper.stale_run_after = ?config.housekeeper.stale_run_after,
        dispatcher.enabled = config.dispatcher.enabled,
        "coordinator configuration in effect"
    );

    let stores = if cli.in_memory {
        warn!("running with in-memory storage; all state is lost on shutdown");
        Stores::in_memory(InMemoryStore::new())
    } else {
        let database_url = config.database.url.clone().context(
            "no PostgreSQL connection configured; set DATABASE_URL or pass --in-memory",
        )?;
        if !(database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")) {
            anyhow::bail!("Invalid database URL: must start with postgres:// or postgresql://");
        }
        let pool = connect_postgres(&database_url, config.database.max_connections)
            .await
            .context("failed to connect to PostgreSQL")?;
        Stores::postgres(pool)
    };

    let probers = build_probers(&config.providers)?;
    let state = AppState::new(
        stores,
        probers,
        ServiceSettings {
            coordinator: config.coordinator.clone(),
            housekeeper: config.housekeeper.clone(),
            dispatcher: config.dispatcher.clone(),
        },
    );

    let shutdown = CancellationToken::new();
    let jobs = spawn_background_jobs(&state, shutdown.clone());

    let app = create_app(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting Rankmeter server on {addr}");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for job in jobs {
        if tokio::time::timeout(Duration::from_secs(10), job).await.is_err() {
            warn!("background job did not stop in time");
        }
    }
    Ok(())
}
