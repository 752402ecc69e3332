//! `intaked`: loads the intake config, checks storage, serves the upload,
//! polling and worker-callback routes and runs the job sweep.
//!
//! Usage: `intaked <config.json>` or `INTAKE_CONFIG=<config.json> intaked`.
//! Log verbosity follows `RUST_LOG` (default `info`).

mod routes;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use intake::{
    apply_env_overrides, load_config, resolve_secret_optional, AccessPolicy, Database,
    FsObjectStore, IntakeApi, IntakeConfig, IntakeCoordinator, JobStore, NoopTrigger,
    StorageCredentials, SweepScheduler,
};

use crate::routes::AppState;

fn init_logging() -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to bridge log records")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config_path = std::env::var("INTAKE_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .context("no config file given (pass a path or set INTAKE_CONFIG)")?;

    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path))?;
    let config = apply_env_overrides(config)?;

    let credentials = StorageCredentials::resolve(&config.credentials, &config.region)
        .context("storage credentials are missing")?;
    log::info!("Resolved storage credentials: {:?}", credentials);

    let objects = Arc::new(
        FsObjectStore::open(&config.storage_root).context("storage root is unavailable")?,
    );

    let jobs = Arc::new(JobStore::new());
    match config.database_path.as_deref() {
        Some(path) => {
            let db = Database::open(Path::new(path))
                .with_context(|| format!("failed to open database at {}", path))?;
            jobs.set_database(db);
            jobs.load_from_database()
                .context("failed to load persisted jobs")?;
        }
        None => log::warn!("No database_path configured, jobs are kept in memory only"),
    }

    let coordinator = Arc::new(IntakeCoordinator::new(
        &config,
        objects,
        jobs,
        Arc::new(NoopTrigger),
    ));
    coordinator
        .probe_storage()
        .await
        .context("storage is unreachable at startup")?;

    let mut counts: Vec<String> = coordinator
        .jobs()
        .counts()
        .into_iter()
        .map(|(status, n)| format!("{} {}", n, status))
        .collect();
    counts.sort();
    log::info!(
        "Intake ready: input bucket '{}', output bucket '{}', jobs loaded: [{}]",
        config.input_bucket,
        config.output_bucket,
        counts.join(", ")
    );

    let (trigger_tx, trigger_rx) = broadcast::channel(16);
    let scheduler = SweepScheduler::new(Arc::clone(&coordinator), config.jobs.sweep_interval());
    let handle = scheduler.start(trigger_rx);

    // Catch jobs left waiting by a previous run right away.
    let _ = trigger_tx.send(());

    let state = app_state(&config, Arc::clone(&coordinator))?;
    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    log::info!("Listening on {}", config.server.listen_addr);

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    log::info!("Shutting down");

    scheduler.stop();
    let _ = trigger_tx.send(());
    handle.await.context("sweep task panicked")?;
    Ok(())
}

fn app_state(
    config: &IntakeConfig,
    coordinator: Arc<IntakeCoordinator>,
) -> anyhow::Result<AppState> {
    let worker_token = resolve_secret_optional(
        None,
        None,
        config.server.worker_token_env_var.as_deref(),
    )
    .context("failed to resolve the worker token")?
    .filter(|token| !token.expose_secret().is_empty());
    if worker_token.is_none() {
        log::warn!("No worker token configured, worker callbacks are unauthenticated");
    }

    Ok(AppState {
        api: Arc::new(IntakeApi::new(coordinator, AccessPolicy::from_config(config))),
        worker_token: worker_token.map(Arc::new),
        max_upload_bytes: usize::try_from(config.upload.max_size_bytes)
            .context("upload.max_size_bytes does not fit in memory")?,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
