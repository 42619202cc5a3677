//! integrasync daemon entry point.
//!
//! Loads configuration, seeds external systems, starts the worker pool, the
//! web server and the scheduled scan, and handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use integrasync_core::config::AppConfig;
use integrasync_core::db::Database;
use integrasync_core::models::NewSystem;
use integrasync_core::runner::{RetryPolicy, TaskRunner};
use integrasync_core::{ControlPlane, HttpConnector, SyncEngine};
use integrasync_web::WebServer;

/// How long each component gets to wind down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// integrasync background daemon.
#[derive(Parser, Debug)]
#[command(
    name = "integrasync-daemon",
    version,
    about = "Runs scheduled integration tasks and serves the REST API"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        AppConfig::load_and_validate(&args.config).context("failed to load configuration")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    info!("========================================");
    info!("  integrasync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Scan interval : {}s", config.daemon.scheduled_scan_interval_secs);
    info!("Workers       : {}", config.runner.workers);
    info!("Max retries   : {}", config.runner.max_retries);
    info!("Web listen    : {}", config.web.listen);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    let db_path = config.daemon.db_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    let stale = db
        .fail_stale_running_tasks()
        .context("failed to reset interrupted tasks")?;
    if stale > 0 {
        warn!(count = stale, "marked tasks interrupted by the last shutdown as failed");
    }

    seed_systems(&db, &config).context("failed to seed external systems")?;

    let connector =
        HttpConnector::new(&config.connector).context("failed to build HTTP connector")?;
    let (events_tx, _) = broadcast::channel::<String>(256);
    let runner = TaskRunner::with_event_feed(
        Arc::new(db),
        SyncEngine::new(Arc::new(connector)),
        RetryPolicy::from_config(&config.runner),
        config.runner.queue_capacity,
        events_tx.clone(),
    );
    let workers = runner.spawn_workers(config.runner.workers);
    info!(count = workers.len(), "worker pool started");

    let web_server = WebServer::new(ControlPlane::new(runner.clone()), events_tx.clone());
    let listen_addr = config.web.listen.clone();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start(&listen_addr).await {
            error!("Web server error: {}", e);
        }
    });

    let shutdown = Arc::new(Notify::new());
    let sched = scheduler::Scheduler::new(
        runner.clone(),
        Duration::from_secs(config.daemon.scheduled_scan_interval_secs),
        events_tx,
    );
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move {
        sched.run(scheduler_shutdown).await;
    });

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    shutdown.notify_waiters();
    match tokio::time::timeout(SHUTDOWN_GRACE, scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 10s, forcing shutdown"),
    }

    // Workers finish their current run; queued jobs and pending retries are dropped.
    runner.shutdown();
    let drain = join_workers(workers);
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("workers did not stop within 10s, forcing shutdown");
    }

    web_handle.abort();

    info!("integrasync daemon stopped.");
    Ok(())
}

/// Upsert every `[[systems]]` entry from the config, matched by name.
fn seed_systems(db: &Database, config: &AppConfig) -> Result<()> {
    for seed in &config.systems {
        let api_key = seed
            .api_key
            .clone()
            .with_context(|| format!("system '{}' has no API key", seed.name))?;
        let system = db.upsert_system(&NewSystem {
            name: seed.name.clone(),
            description: seed.description.clone(),
            api_endpoint: seed.api_endpoint.clone(),
            api_key,
            is_active: seed.is_active,
        })?;
        info!(id = %system.id, name = %system.name, "seeded external system");
    }
    Ok(())
}

async fn join_workers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("worker task error: {}", e);
        }
    }
}
