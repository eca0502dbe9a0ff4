//! Maintenance coordinator: serializes exclusive database compaction
//! (WAL checkpoint, vacuum) with concurrent normal operations via a
//! reader/writer lease.
//!
//! Built in the surrounding async/trait idiom: `async_trait` port, a
//! `tokio::sync::RwLock<()>` for the lease (readers = in-flight
//! operations, the single writer = a maintenance pass), and a
//! `tokio::spawn`'d periodic worker cancelled via `CancellationToken`,
//! mirroring the cancellation style used in `retry/mod.rs`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, DomainError, InfraError, Result};

/// WAL checkpoint mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalCheckpointMode {
    Passive,
    Full,
    Restart,
    #[default]
    Truncate,
}

impl WalCheckpointMode {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Passive => "PASSIVE",
            Self::Full => "FULL",
            Self::Restart => "RESTART",
            Self::Truncate => "TRUNCATE",
        }
    }
}

/// Maintenance coordinator configuration.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    /// Whether the periodic worker runs at all.
    pub enabled: bool,
    /// Period between maintenance passes.
    pub check_interval: Duration,
    /// Run one pass immediately on `start`, before the first tick.
    pub vacuum_on_startup: bool,
    /// WAL checkpoint mode used by each pass.
    pub wal_checkpoint_mode: WalCheckpointMode,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_secs(30 * 60),
            vacuum_on_startup: false,
            wal_checkpoint_mode: WalCheckpointMode::Truncate,
        }
    }
}

/// Outcome of a single `run_maintenance` pass.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceReport {
    /// Database size in bytes before this pass.
    pub size_before_bytes: i64,
    /// Database size in bytes after this pass.
    pub size_after_bytes: i64,
    /// How long the pass took.
    pub duration: Duration,
}

impl MaintenanceReport {
    /// Bytes reclaimed by this pass (zero if the database grew).
    #[must_use]
    pub const fn bytes_reclaimed(&self) -> i64 {
        self.size_before_bytes.saturating_sub(self.size_after_bytes)
    }
}

/// Cumulative maintenance metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceMetrics {
    /// Instant of the last completed pass, if any, expressed as elapsed
    /// time since an arbitrary epoch (`Instant` has no serializable
    /// absolute form); callers interested in wall-clock time should
    /// read `last_run_at` alongside.
    pub run_count: u64,
    /// Passes that returned an error.
    pub error_count: u64,
    /// Total bytes reclaimed across all passes.
    pub bytes_reclaimed_total: i64,
}

/// A held operation lease. Dropping it releases the lease.
pub enum OperationGuard {
    /// A real shared-read lease against the maintenance lock.
    Leased(OwnedRwLockReadGuard<()>),
    /// The no-op coordinator never actually leases anything.
    Inert,
}

/// Coordinates exclusive maintenance passes with concurrent normal
/// operations.
#[async_trait]
pub trait MaintenanceCoordinator: Send + Sync {
    /// Acquire a shared-read lease. Many operations may hold this
    /// concurrently; it only blocks while a maintenance pass is
    /// in-flight.
    async fn acquire_operation_lock(&self) -> OperationGuard;

    /// Take the exclusive-write lease and run one maintenance pass.
    /// Blocks until all outstanding operation guards are released and
    /// blocks new ones from being issued until it completes.
    async fn run_maintenance(&self, cancel: &CancellationToken) -> Result<MaintenanceReport>;

    /// If enabled, optionally run one pass immediately, then launch a
    /// periodic worker at `check_interval`. `cancel` is the parent
    /// signal; the worker derives and owns a child token so `stop` can
    /// end it independently.
    async fn start(self: Arc<Self>, cancel: CancellationToken);

    /// Cancel the worker and wait for it to drain.
    async fn stop(&self);

    /// Current cumulative metrics.
    fn metrics(&self) -> MaintenanceMetrics;
}

/// Real coordinator backed by a SQLite pool: `PRAGMA wal_checkpoint`
/// followed by `VACUUM`, serialized against concurrent operations by a
/// `tokio::sync::RwLock<()>`.
pub struct WalMaintenanceCoordinator {
    pool: SqlitePool,
    config: MaintenanceConfig,
    lease: Arc<RwLock<()>>,
    metrics: Mutex<MaintenanceMetrics>,
    worker_cancel: Mutex<Option<CancellationToken>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WalMaintenanceCoordinator {
    /// Build a coordinator over `pool` with the given config.
    #[must_use]
    pub fn new(pool: SqlitePool, config: MaintenanceConfig) -> Self {
        Self {
            pool,
            config,
            lease: Arc::new(RwLock::new(())),
            metrics: Mutex::new(MaintenanceMetrics::default()),
            worker_cancel: Mutex::new(None),
            worker_handle: Mutex::new(None),
        }
    }

    async fn database_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::from)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::from)?;
        Ok(page_count * page_size)
    }

    async fn checkpoint(&self) -> Result<()> {
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::from)?;

        if !journal_mode.eq_ignore_ascii_case("wal") {
            debug!(journal_mode, "journal is not WAL, skipping checkpoint");
            return Ok(());
        }

        let stmt = format!("PRAGMA wal_checkpoint({})", self.config.wal_checkpoint_mode.as_sql());
        sqlx::query(&stmt).execute(&self.pool).await.map_err(InfraError::from)?;
        Ok(())
    }

    async fn vacuum(&self) -> Result<()> {
        match sqlx::query("VACUUM").execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                if message.to_lowercase().contains("database is locked") {
                    Err(AppError::Infra(InfraError::StorageLocked(message)))
                } else {
                    Err(AppError::Infra(InfraError::from(e)))
                }
            }
        }
    }

    fn record(&self, report: Option<MaintenanceReport>, failed: bool) {
        let mut metrics = self.metrics.lock();
        metrics.run_count += 1;
        if failed {
            metrics.error_count += 1;
        }
        if let Some(report) = report {
            metrics.bytes_reclaimed_total += report.bytes_reclaimed();
        }
    }
}

#[async_trait]
impl MaintenanceCoordinator for WalMaintenanceCoordinator {
    async fn acquire_operation_lock(&self) -> OperationGuard {
        OperationGuard::Leased(Arc::clone(&self.lease).read_owned().await)
    }

    async fn run_maintenance(&self, cancel: &CancellationToken) -> Result<MaintenanceReport> {
        if cancel.is_cancelled() {
            return Err(AppError::Domain(DomainError::Cancelled));
        }

        let _write_lease = self.lease.write().await;
        let start = Instant::now();
        let size_before_bytes = self.database_size_bytes().await?;

        let mut first_err = None;

        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "WAL checkpoint failed during maintenance pass");
            first_err = Some(e);
        }

        if let Err(e) = self.vacuum().await {
            if matches!(&e, AppError::Infra(infra) if infra.is_storage_locked()) {
                warn!(error = %e, "vacuum skipped: database is locked");
            } else {
                warn!(error = %e, "vacuum failed during maintenance pass");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        let size_after_bytes = self.database_size_bytes().await.unwrap_or(size_before_bytes);
        let report = MaintenanceReport {
            size_before_bytes,
            size_after_bytes,
            duration: start.elapsed(),
        };

        info!(
            bytes_reclaimed = report.bytes_reclaimed(),
            duration_ms = report.duration.as_millis(),
            "maintenance pass complete"
        );
        self.record(Some(report), first_err.is_some());

        first_err.map_or(Ok(report), Err)
    }

    async fn start(self: Arc<Self>, cancel: CancellationToken) {
        if !self.config.enabled {
            return;
        }

        let worker_cancel = cancel.child_token();
        *self.worker_cancel.lock() = Some(worker_cancel.clone());

        let coordinator = Arc::clone(&self);
        let check_interval = self.config.check_interval;
        let vacuum_on_startup = self.config.vacuum_on_startup;

        let handle = tokio::spawn(async move {
            if vacuum_on_startup {
                if let Err(e) = coordinator.run_maintenance(&worker_cancel).await {
                    warn!(error = %e, "startup maintenance pass failed");
                }
            }

            let mut ticker = tokio::time::interval(check_interval);
            ticker.tick().await; // first tick fires immediately; consume it

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.run_maintenance(&worker_cancel).await {
                            warn!(error = %e, "periodic maintenance pass failed");
                        }
                    }
                    () = worker_cancel.cancelled() => break,
                }
            }
        });

        *self.worker_handle.lock() = Some(handle);
    }

    async fn stop(&self) {
        if let Some(cancel) = self.worker_cancel.lock().take() {
            cancel.cancel();
        }
        let handle = self.worker_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn metrics(&self) -> MaintenanceMetrics {
        *self.metrics.lock()
    }
}

/// No-op coordinator satisfying the same interface; every call is
/// inert. Keeps tests and tools that don't care about maintenance
/// simple.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMaintenance;

#[async_trait]
impl MaintenanceCoordinator for NoOpMaintenance {
    async fn acquire_operation_lock(&self) -> OperationGuard {
        OperationGuard::Inert
    }

    async fn run_maintenance(&self, _cancel: &CancellationToken) -> Result<MaintenanceReport> {
        Ok(MaintenanceReport {
            size_before_bytes: 0,
            size_after_bytes: 0,
            duration: Duration::ZERO,
        })
    }

    async fn start(self: Arc<Self>, _cancel: CancellationToken) {}

    async fn stop(&self) {}

    fn metrics(&self) -> MaintenanceMetrics {
        MaintenanceMetrics::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        use sqlx::sqlite::SqlitePoolOptions;
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn run_maintenance_reports_zero_reclaim_on_empty_db() {
        let pool = memory_pool().await;
        let coordinator = WalMaintenanceCoordinator::new(pool, MaintenanceConfig::default());
        let cancel = CancellationToken::new();

        let report = coordinator.run_maintenance(&cancel).await.unwrap();
        assert!(report.bytes_reclaimed() >= 0);
        assert_eq!(coordinator.metrics().run_count, 1);
    }

    #[tokio::test]
    async fn run_maintenance_short_circuits_when_cancelled() {
        let pool = memory_pool().await;
        let coordinator = WalMaintenanceCoordinator::new(pool, MaintenanceConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = coordinator.run_maintenance(&cancel).await;
        assert!(matches!(result, Err(AppError::Domain(DomainError::Cancelled))));
    }

    #[tokio::test]
    async fn operation_lock_does_not_block_concurrent_readers() {
        let pool = memory_pool().await;
        let coordinator = Arc::new(WalMaintenanceCoordinator::new(pool, MaintenanceConfig::default()));

        let guard1 = coordinator.acquire_operation_lock().await;
        let guard2 = coordinator.acquire_operation_lock().await;
        drop(guard1);
        drop(guard2);
    }

    #[tokio::test]
    async fn start_stop_cycles_cleanly_when_disabled() {
        let pool = memory_pool().await;
        let coordinator = Arc::new(WalMaintenanceCoordinator::new(pool, MaintenanceConfig::default()));
        let cancel = CancellationToken::new();

        Arc::clone(&coordinator).start(cancel).await;
        coordinator.stop().await;
        assert_eq!(coordinator.metrics().run_count, 0);
    }

    #[tokio::test]
    async fn noop_coordinator_never_errors() {
        let coordinator = NoOpMaintenance;
        let cancel = CancellationToken::new();
        let report = coordinator.run_maintenance(&cancel).await.unwrap();
        assert_eq!(report.bytes_reclaimed(), 0);
        assert_eq!(coordinator.metrics().run_count, 0);
    }

    #[test]
    fn coordinators_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WalMaintenanceCoordinator>();
        assert_send_sync::<NoOpMaintenance>();
    }
}
