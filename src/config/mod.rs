//! Configuration loading and validation.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest, `INDEXER_` prefix)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use chainfinity_indexer::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("RPC URL: {}", settings.rpc.url);
//! ```

mod settings;

pub use settings::{
    FinalitySettings, IndexerSettings, LoggingSettings, MaintenanceSettings, MetricsSettings,
    RetentionSettings, RetrySettings, RpcSettings, Settings, StoreSettings,
};
