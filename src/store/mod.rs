//! Data persistence layer (adapters for the store ports).
//!
//! This module provides the one concrete implementation of the three
//! storage ports defined in [`crate::ports`]: a single embedded SQLite
//! database per indexer instance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Store Adapters                            │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                    SqliteStore                            │  │
//! │   │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │  │
//! │   │   │ BlockFingers │  │   RawLogs +  │  │  SyncState   │   │  │
//! │   │   │    -prints   │  │   Coverage   │  │  (1 row)     │   │  │
//! │   │   └──────────────┘  └──────────────┘  └──────────────┘   │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                               │                                  │
//! │                               ▼                                  │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                SQLx Connection Pool                       │  │
//! │   │     (SQLite, WAL journaling, bounded connections)          │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chainfinity_indexer::store::{SqliteStore, SqliteStoreConfig};
//!
//! let store = SqliteStore::connect("indexer.db", SqliteStoreConfig::default()).await?;
//! store.ensure_schema().await?;
//! ```

pub mod sqlite;

pub use sqlite::{RetentionConfig, SqliteStore, SqliteStoreConfig};
