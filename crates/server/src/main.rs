mod api;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediamill_core::{
    dispatch::{Dispatcher, InProcessQueue},
    engine::{EngineSet, FfmpegExecutor, RemoteEngineExecutor},
    load_config,
    metrics::all_metrics,
    registry::{EngineKind, EngineRegistry},
    runner::JobRunner,
    Config, SqliteTaskStore, TaskStore,
};

use api::create_router;
use state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("MEDIAMILL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration; a missing file means defaults (built-in
    // local ffmpeg engine, in-tree sqlite database).
    let config = if config_path.exists() {
        info!("Loading configuration from {:?}", config_path);
        load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        info!("No config file at {:?}, using defaults", config_path);
        Config::default()
    };
    info!("Database path: {:?}", config.database.path);

    // Create SQLite task store
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::new(&config.database.path).context("Failed to create task store")?,
    );
    info!("Task store initialized");

    // Build the engine registry and its executors
    let entries = config.registry_entries();
    let registry = Arc::new(EngineRegistry::new(entries.clone()).context("Invalid engine registry")?);

    let mut engines = EngineSet::new();
    for entry in &entries {
        match entry.kind {
            EngineKind::Local => {
                info!("Registering local ffmpeg engine '{}'", entry.id);
                engines.insert(Arc::new(FfmpegExecutor::new(
                    entry.id.clone(),
                    config.ffmpeg.clone(),
                )));
            }
            EngineKind::Remote => {
                let remote_config = config
                    .remote_engines
                    .iter()
                    .find(|r| r.id == entry.id.as_str())
                    .with_context(|| format!("No connection details for remote engine '{}'", entry.id))?;
                info!(
                    "Registering remote engine '{}' at {}",
                    entry.id, remote_config.base_url
                );
                engines.insert(Arc::new(
                    RemoteEngineExecutor::new(remote_config.clone())
                        .with_context(|| format!("Failed to build remote engine '{}'", entry.id))?,
                ));
            }
        }
    }
    let engines = Arc::new(engines);

    // Queue, dispatcher and runner
    let queue = Arc::new(InProcessQueue::new());
    let dispatcher = Dispatcher::new(Arc::clone(&store), Arc::clone(&engines), queue.clone());
    let runner = Arc::new(JobRunner::new(
        config.runner.clone(),
        Arc::clone(&store),
        Arc::clone(&engines),
        Arc::clone(&registry),
        queue,
    ));
    runner.start().await;
    info!("Job runner started");

    // Optional pruning of old terminal tasks
    if let Some(prune_after_secs) = config.database.prune_terminal_after_secs {
        let prune_store = Arc::clone(&store);
        tokio::spawn(async move {
            let interval = Duration::from_secs(3600);
            loop {
                tokio::time::sleep(interval).await;
                match prune_store.prune_terminal(prune_after_secs).await {
                    Ok(0) => {}
                    Ok(n) => info!("Pruned {} old terminal tasks", n),
                    Err(e) => warn!("Task pruning failed: {}", e),
                }
            }
        });
    }

    // Metrics registry
    let metrics = prometheus::Registry::new();
    for metric in all_metrics() {
        metrics
            .register(metric)
            .context("Failed to register metrics")?;
    }

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        registry,
        dispatcher,
        Arc::clone(&runner),
        metrics,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    runner.stop().await;
    info!("Job runner stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
