//! Indexer binary entry point.
//!
//! A thin wiring layer: load configuration, set up logging, connect
//! the embedded store and RPC adapter, and run the driver loop until
//! `SIGINT`/`SIGTERM` or a storage-fatal error. Command-line parsing,
//! migrations, and a REST/WebSocket surface are external collaborators
//! and live outside this crate.

use std::sync::Arc;

use chainfinity_indexer::config::Settings;
use chainfinity_indexer::error::AppError;
use chainfinity_indexer::indexer::IndexerDriver;
use chainfinity_indexer::maintenance::{MaintenanceCoordinator, NoOpMaintenance, WalMaintenanceCoordinator};
use chainfinity_indexer::rpc::connect_http;
use chainfinity_indexer::store::SqliteStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn init_tracing(settings: &chainfinity_indexer::config::LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if settings.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

    let settings = match Settings::load(&environment) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    init_tracing(&settings.logging);

    if let Err(errors) = settings.validate() {
        for e in &errors {
            error!(error = %e, "configuration invalid");
        }
        return std::process::ExitCode::FAILURE;
    }

    info!(version = chainfinity_indexer::VERSION, "starting indexer");

    match run(settings).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) if e.is_storage_fatal() => {
            error!(error = %e, "storage-fatal error, exiting");
            std::process::ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "indexer exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), AppError> {
    let store = SqliteStore::connect(&settings.store.database_path, settings.store.to_store_config())
        .await?
        .with_retention_config(settings.retention.to_retention_config());

    let rpc = connect_http(&settings.rpc.url)?;

    let finality = settings
        .finality
        .resolve()
        .map_err(|e| AppError::Domain(chainfinity_indexer::error::DomainError::ConfigInvalid(vec![e])))?;

    let maintenance_config = settings
        .maintenance
        .to_maintenance_config()
        .map_err(|e| AppError::Domain(chainfinity_indexer::error::DomainError::ConfigInvalid(vec![e])))?;

    let maintenance: Arc<dyn MaintenanceCoordinator> = if settings.maintenance.enabled {
        Arc::new(WalMaintenanceCoordinator::new(store.pool().clone(), maintenance_config))
    } else {
        Arc::new(NoOpMaintenance)
    };

    let cancel = CancellationToken::new();
    Arc::clone(&maintenance).start(cancel.clone()).await;

    let driver = IndexerDriver::new(
        rpc,
        store.clone(),
        store.clone(),
        store.clone(),
        Vec::new(),
        chainfinity_indexer::indexer::DriverConfig {
            chunk_size: settings.indexer.backfill_chunk_size,
            finality,
            live_poll_interval: settings.indexer.live_poll_interval(),
        },
        settings.retry.to_retry_config(),
    );

    let run_cancel = cancel.clone();
    tokio::select! {
        result = driver.run(run_cancel) => {
            maintenance.stop().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            cancel.cancel();
            maintenance.stop().await;
            Ok(())
        }
    }
}
