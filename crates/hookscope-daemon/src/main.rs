//! Hookscope binary: tails hook event logs and streams them to observers.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `hookscope.yaml` (or `HOOKSCOPE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the persisted session state and build the hierarchy resolver
//! 4. Spawn the log tailer and the ingest loop
//! 5. Serve the observer API until SIGINT or SIGTERM
//!
//! # Shutdown
//!
//! On a signal the tailer is told to stop, every observer stream is
//! closed, and the HTTP server drains in-flight requests. The ingest loop
//! ends once the tailer drops its side of the batch channel.

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use hookscope_core::{
    EventStore, FileSessionStore, HierarchyResolver, HookscopeConfig, IngestStats, LogTailer,
    LoggingConfig,
};
use hookscope_observer::{AppState, ServerConfig};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;

/// Validated batches the tailer may queue ahead of the ingest loop.
const BATCH_QUEUE: usize = 256;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the server cannot
/// bind, or a background task dies.
#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let config_path = std::env::var("HOOKSCOPE_CONFIG")
        .map_or_else(|_| PathBuf::from("hookscope.yaml"), PathBuf::from);
    let config = HookscopeConfig::load(&config_path)?;

    init_logging(&config.logging);
    info!(config = %config_path.display(), "hookscope starting");
    info!(
        log_dir = %config.tailer.log_dir.display(),
        file_pattern = %config.tailer.file_pattern,
        max_events = config.store.max_events,
        max_sessions = config.hierarchy.max_sessions,
        "Configuration loaded"
    );

    let stats = Arc::new(IngestStats::new());
    let sessions = FileSessionStore::new(config.hierarchy.state_path.clone());
    info!(path = %sessions.path().display(), "Session state store opened");
    let resolver = HierarchyResolver::new(Box::new(sessions), config.hierarchy.max_sessions);
    let state = Arc::new(
        AppState::new(
            EventStore::new(config.store.max_events),
            resolver,
            Arc::clone(&stats),
        )
        .with_session_sample(config.store.session_sample),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE);

    let tailer = LogTailer::new(config.tailer.clone(), stats);
    let tailer_handle = tokio::spawn(tailer.run(batch_tx, shutdown_rx));
    let ingest_handle = tokio::spawn(Arc::clone(&state).run_ingest(batch_rx));

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let shutdown_state = Arc::clone(&state);
    let shutdown = async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
        shutdown_state.shutdown();
    };

    let served = hookscope_observer::start_server(&server_config, state, shutdown).await;
    if served.is_err() {
        // The signal future never ran, so stop the tailer here.
        tailer_handle.abort();
    }
    served?;

    tailer_handle.await.map_err(|e| DaemonError::Task {
        message: format!("tailer: {e}"),
    })?;
    ingest_handle.await.map_err(|e| DaemonError::Task {
        message: format!("ingest: {e}"),
    })?;

    info!("hookscope stopped");
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
