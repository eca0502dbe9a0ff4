//! Core indexing logic: reorg detection, sync-state keeping, and the
//! driver loop that ties them to the RPC adapter and log store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Indexer Core                             │
//! │                                                                 │
//! │  ┌──────────────────┐     ┌──────────────────┐                 │
//! │  │   RPC Adapter    │────▶│  ReorgDetector   │                 │
//! │  │   (raw logs,     │     │  (fingerprint    │                 │
//! │  │    headers)      │     │   verification)  │                 │
//! │  └──────────────────┘     └────────┬─────────┘                 │
//! │                                     │                           │
//! │                                     ▼                           │
//! │                            ┌──────────────────┐                 │
//! │                            │   IndexerDriver  │                 │
//! │                            │  (fetch_next /   │                 │
//! │                            │   fetch_range)   │                 │
//! │                            └────────┬─────────┘                 │
//! │                                     │                           │
//! │              ┌──────────────────────┼──────────────────┐        │
//! │              ▼                      ▼                  ▼        │
//! │       ┌─────────────┐      ┌─────────────────┐   ┌───────────┐ │
//! │       │  LogStore    │      │ SyncStateKeeper │   │  Domain   │ │
//! │       │ (coverage)   │      │  (checkpoint)   │   │  Indexer  │ │
//! │       └─────────────┘      └─────────────────┘   └───────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod driver;
mod reorg;
mod sync_state;

pub use driver::{DriverConfig, IndexerDriver};
pub use reorg::ReorgDetector;
pub use sync_state::SyncStateKeeper;
