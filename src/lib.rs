//! Reorg-aware log indexing engine for EVM-compatible chains.
//!
//! Incrementally pulls events emitted by a set of smart-contract
//! addresses from an Ethereum-compatible JSON-RPC node, verifies their
//! provenance against the canonical chain, stores them in a local
//! embedded database, and detects and repairs blockchain
//! reorganizations so stored state always matches a suffix of the
//! current canonical chain.
//!
//! # Architecture
//!
//! The core follows a hexagonal (ports-and-adapters) architecture:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          INDEXER CORE                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Reorg     │  │  Sync-state  │  │    Driver    │           │
//! │  │   Detector    │─▶│   Keeper     │─▶│    Loop      │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! │                                              │                  │
//! │              ┌───────────────────────────────┼──────────────┐   │
//! │              ▼                               ▼              ▼   │
//! │       ┌──────────────┐              ┌──────────────┐  ┌───────┐ │
//! │       │ RPC Adapter  │              │  Log Store   │  │ Maint.│ │
//! │       └──────────────┘              └──────────────┘  └───────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything the core touches outside itself (the chain peer, the
//! database, the clock, downstream domain indexers) is behind a trait
//! in [`ports`]; concrete adapters live in [`rpc`] and [`store`].
//!
//! # Modules
//!
//! - [`types`] - Domain types (primitives, entities)
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`ports`] - Trait boundaries the core depends on
//! - [`rpc`] - RPC adapter implementations
//! - [`store`] - Embedded SQLite store implementing the storage ports
//! - [`indexer`] - Reorg detection, sync-state keeping, and the driver loop
//! - [`retry`] - Retry + backoff wrapper for RPC calls
//! - [`maintenance`] - Background database compaction coordinator
//!
//! # Getting Started
//!
//! ```bash
//! cp config/default.example.toml config/default.toml
//! # Edit config/default.toml with your RPC endpoint
//!
//! cargo run
//! ```

#![doc(html_root_url = "https://docs.rs/chainfinity-indexer")]

pub mod config;
pub mod error;
pub mod indexer;
pub mod maintenance;
pub mod ports;
pub mod retry;
pub mod rpc;
pub mod store;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}
