//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files, in a layered builder
//! pattern: defaults first, then `config/default`, then an
//! environment-specific file, then `INDEXER_`-prefixed env vars.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::retry::RetryConfig;
use crate::types::Finality;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// RPC adapter configuration.
    pub rpc: RpcSettings,
    /// Embedded store configuration.
    pub store: StoreSettings,
    /// Finality policy.
    pub finality: FinalitySettings,
    /// Retry/backoff configuration.
    pub retry: RetrySettings,
    /// Backfill/driver loop configuration.
    pub indexer: IndexerSettings,
    /// Retention-sweep configuration.
    pub retention: RetentionSettings,
    /// Maintenance coordinator configuration.
    pub maintenance: MaintenanceSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Metrics configuration.
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `INDEXER_` prefix
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("rpc.url", "http://localhost:8545")?
            .set_default("rpc.chunk_size", 2000)?
            .set_default("rpc.max_batch_headers", 100)?
            .set_default("store.database_path", "indexer.db")?
            .set_default("store.busy_timeout_ms", 5000)?
            .set_default("store.cache_size", 10_000)?
            .set_default("store.max_open_connections", 25)?
            .set_default("store.max_idle_connections", 5)?
            .set_default("finality.policy", "finalized")?
            .set_default("finality.lag", 0)?
            .set_default("retry.max_attempts", 5)?
            .set_default("retry.initial_backoff_ms", 1000)?
            .set_default("retry.max_backoff_ms", 30_000)?
            .set_default("retry.backoff_multiplier", 2.0)?
            .set_default("indexer.backfill_chunk_size", 2000)?
            .set_default("indexer.live_poll_interval_ms", 2000)?
            .set_default("indexer.reorg_fingerprint_window", 512)?
            .set_default("retention.max_db_size_mb", 0)?
            .set_default("retention.max_blocks", 0)?
            .set_default("retention.logs_weight", 3)?
            .set_default("retention.coverage_weight", 1)?
            .set_default("maintenance.enabled", false)?
            .set_default("maintenance.check_interval_secs", 1800)?
            .set_default("maintenance.vacuum_on_startup", false)?
            .set_default("maintenance.wal_checkpoint_mode", "truncate")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.host", "0.0.0.0")?
            .set_default("metrics.port", 9090)?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("INDEXER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path, bypassing the layered
    /// default/environment/env-var precedence. Used by tests.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rpc.url.is_empty() {
            errors.push("rpc.url cannot be empty".into());
        }
        if self.rpc.chunk_size == 0 {
            errors.push("rpc.chunk_size must be non-zero".into());
        }

        if self.store.database_path.is_empty() {
            errors.push("store.database_path cannot be empty".into());
        }
        if self.store.max_open_connections == 0 {
            errors.push("store.max_open_connections must be non-zero".into());
        }
        if self.store.max_idle_connections > self.store.max_open_connections {
            errors.push("store.max_idle_connections cannot exceed max_open_connections".into());
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be non-zero".into());
        }
        if self.retry.backoff_multiplier < 1.0 {
            errors.push("retry.backoff_multiplier must be >= 1.0".into());
        }

        if self.indexer.backfill_chunk_size == 0 {
            errors.push("indexer.backfill_chunk_size must be non-zero".into());
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            errors.push("metrics.port must be non-zero when metrics are enabled".into());
        }

        if self.maintenance.enabled && self.maintenance.check_interval_secs == 0 {
            errors.push("maintenance.check_interval_secs must be non-zero when maintenance is enabled".into());
        }
        if let Err(e) = self.maintenance.to_maintenance_config() {
            errors.push(format!("maintenance.{e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// RPC adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    /// HTTP RPC endpoint URL.
    pub url: String,
    /// Preferred block range per `eth_getLogs` call before the adapter
    /// splits further on a "too many results" error.
    pub chunk_size: u64,
    /// Suggested maximum batch size for header lookups.
    pub max_batch_headers: usize,
}

/// Embedded SQLite store configuration, surfaced to
/// [`crate::store::sqlite::SqliteStoreConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Path to the SQLite database file.
    pub database_path: String,
    /// `busy_timeout` in milliseconds.
    pub busy_timeout_ms: u64,
    /// SQLite `cache_size` pragma.
    pub cache_size: i64,
    /// Maximum open connections in the pool.
    pub max_open_connections: u32,
    /// Connections kept idle in the pool.
    pub max_idle_connections: u32,
}

impl StoreSettings {
    /// Convert into the store's own config type.
    #[must_use]
    pub const fn to_store_config(&self) -> crate::store::sqlite::SqliteStoreConfig {
        crate::store::sqlite::SqliteStoreConfig {
            busy_timeout_ms: self.busy_timeout_ms,
            cache_size: self.cache_size,
            max_open_connections: self.max_open_connections,
            max_idle_connections: self.max_idle_connections,
        }
    }
}

/// Which finality policy to apply.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalitySettings {
    /// One of `"finalized"`, `"safe"`, `"latest"`.
    pub policy: String,
    /// Lag behind `latest`, only meaningful when `policy == "latest"`.
    pub lag: u64,
}

impl FinalitySettings {
    /// Resolve into the domain [`Finality`] enum.
    ///
    /// # Errors
    /// Returns an error string if `policy` is not recognized.
    pub fn resolve(&self) -> Result<Finality, String> {
        match self.policy.as_str() {
            "finalized" => Ok(Finality::Finalized),
            "safe" => Ok(Finality::Safe),
            "latest" => Ok(Finality::Latest { lag: self.lag }),
            other => Err(format!("unrecognized finality policy: {other}")),
        }
    }
}

/// Retry/backoff configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Ceiling on any single backoff wait, in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied after each retryable failure.
    pub backoff_multiplier: f64,
}

impl RetrySettings {
    /// Convert into the retry wrapper's own config type.
    #[must_use]
    pub const fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Driver loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerSettings {
    /// Block stride used during backfill.
    pub backfill_chunk_size: u64,
    /// Polling interval once caught up to the finality horizon.
    pub live_poll_interval_ms: u64,
    /// How many non-finalized fingerprints to retain for reorg
    /// detection.
    pub reorg_fingerprint_window: u64,
}

impl IndexerSettings {
    /// The live-mode poll interval as a `Duration`.
    #[must_use]
    pub const fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_interval_ms)
    }
}

/// Retention-sweep configuration, applied after every `store_logs`
/// commit.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSettings {
    /// Database-size cap in megabytes that triggers pruning. 0 = unbounded.
    pub max_db_size_mb: u64,
    /// Cap on the stored block span. 0 = unbounded.
    pub max_blocks: u64,
    /// Relative weight of a `raw_logs` row in the size-based estimate.
    pub logs_weight: u32,
    /// Relative weight of a coverage row in the same estimate.
    pub coverage_weight: u32,
}

impl RetentionSettings {
    /// Convert into the store's own retention config type.
    #[must_use]
    pub const fn to_retention_config(&self) -> crate::store::RetentionConfig {
        crate::store::RetentionConfig {
            max_blocks: self.max_blocks,
            max_db_size_mb: self.max_db_size_mb,
            logs_weight: self.logs_weight,
            coverage_weight: self.coverage_weight,
        }
    }
}

/// Maintenance coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceSettings {
    /// Whether the periodic maintenance worker runs at all.
    pub enabled: bool,
    /// Period between maintenance passes, in seconds.
    pub check_interval_secs: u64,
    /// Run one pass immediately on startup, before the first tick.
    pub vacuum_on_startup: bool,
    /// One of `"passive"`, `"full"`, `"restart"`, `"truncate"`.
    pub wal_checkpoint_mode: String,
}

impl MaintenanceSettings {
    /// The check interval as a `Duration`.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Resolve into the maintenance coordinator's own config type.
    ///
    /// # Errors
    /// Returns an error string if `wal_checkpoint_mode` is not recognized.
    pub fn to_maintenance_config(&self) -> Result<crate::maintenance::MaintenanceConfig, String> {
        use crate::maintenance::WalCheckpointMode;

        let wal_checkpoint_mode = match self.wal_checkpoint_mode.as_str() {
            "passive" => WalCheckpointMode::Passive,
            "full" => WalCheckpointMode::Full,
            "restart" => WalCheckpointMode::Restart,
            "truncate" => WalCheckpointMode::Truncate,
            other => return Err(format!("unrecognized wal_checkpoint_mode: {other}")),
        };

        Ok(crate::maintenance::MaintenanceConfig {
            enabled: self.enabled,
            check_interval: self.check_interval(),
            vacuum_on_startup: self.vacuum_on_startup,
            wal_checkpoint_mode,
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether the Prometheus exporter is enabled.
    pub enabled: bool,
    /// Host to bind the metrics server to.
    pub host: String,
    /// Port for the metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// The metrics socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
