//! The long-running daemon: document store, scheduler, built-in jobs and the
//! optional health server.

use std::sync::Arc;

use dingo_scheduler::{Scheduler, SchedulerConfig};
use dingo_store::{DocumentStore, StoreConfig};
use miette::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::health::{self, AppState};
use crate::jobs;

/// Configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    /// Port for `GET /health`. No server is started when `None`.
    pub health_port: Option<u16>,
}

/// Run the daemon until Ctrl-C.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!(
        database_url = %config.store.database_url,
        poll_interval_ms = config.scheduler.poll_interval_ms,
        timezone = %config.scheduler.timezone,
        health_port = ?config.health_port,
        "starting dingo daemon"
    );

    let store = Arc::new(
        DocumentStore::open(&config.store)
            .await
            .map_err(|e| miette::miette!("failed to open document store: {}", e))?,
    );
    if let Some(warning) = store.load_warning() {
        warn!(warning, "document store started empty");
    }

    let scheduler = Scheduler::new(config.scheduler).map_err(|e| miette::miette!("{}", e))?;
    jobs::register(&scheduler, &store)
        .await
        .map_err(|e| miette::miette!("failed to register jobs: {}", e))?;

    // Bind before starting anything so a busy port fails fast
    let listener = match config.health_port {
        Some(port) => Some(
            tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
                .await
                .map_err(|e| miette::miette!("failed to bind health port {}: {}", port, e))?,
        ),
        None => None,
    };

    scheduler
        .start()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let server_handle = listener.map(|listener| {
        let router = health::router(AppState {
            store: Arc::clone(&store),
            scheduler: scheduler.clone(),
        });
        let mut server_shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                info!("health server listening on http://{}", addr);
            }
            let shutdown = async move {
                let _ = server_shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "health server failed");
            }
        })
    });

    // Wait for shutdown signal
    let mut main_shutdown_rx = shutdown_rx.clone();
    loop {
        if main_shutdown_rx.changed().await.is_err() || *main_shutdown_rx.borrow() {
            break;
        }
    }

    info!("shutting down daemon");

    scheduler.shutdown().await;
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    store
        .close()
        .await
        .map_err(|e| miette::miette!("failed to close document store: {}", e))?;

    info!("daemon shut down gracefully");
    Ok(())
}
