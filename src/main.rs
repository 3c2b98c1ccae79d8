use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use moderator::classifier::HttpClassifier;
use moderator::config::Config;
use moderator::download::HttpDownloader;
use moderator::worker::{Worker, WorkerSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    tracing::info!("Starting moderator");

    // One connection for the worker, one spare for liveness checks
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(config.database.connect_options()?)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Migrations applied");

    // A private scratch dir is held for the process lifetime and removed on drop.
    let (scratch_dir, owned_scratch): (PathBuf, Option<tempfile::TempDir>) =
        match &config.download.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let tmp = tempfile::Builder::new().prefix("moderator-").tempdir()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

    tracing::info!("Scratch directory: {}", scratch_dir.display());

    let downloader = HttpDownloader::new(
        &scratch_dir,
        config.download.timeout,
        config.download.max_bytes,
    )?;
    let classifier = HttpClassifier::new(&config.classifier.url, &config.classifier.model)?;

    let worker = Arc::new(Worker::new(
        pool.clone(),
        Arc::new(downloader),
        Arc::new(classifier),
        WorkerSettings::from_config(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = worker.spawn(shutdown_rx.clone());

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(listener, moderator::build_app())
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = worker_handle.await {
        tracing::error!("Worker task failed: {e}");
    }
    server.await??;

    pool.close().await;
    drop(owned_scratch);

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining worker");
}
