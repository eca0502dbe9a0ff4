//! Port definitions for dependency injection and testability.
//!
//! Ports are trait definitions that describe what the core's
//! components need. Following hexagonal architecture, adapters (in
//! `crate::store` and `crate::rpc`) implement these traits to provide
//! concrete functionality.
//!
//! | Category | Ports | Purpose |
//! |----------|-------|---------|
//! | Storage | [`ReorgStore`], [`LogStore`], [`SyncStateStore`] | Data persistence, split by disjoint relation group |
//! | Chain access | [`RpcAdapter`] | JSON-RPC peer capability set |
//! | Extension | [`DomainIndexer`] | Pluggable consumer of fetched logs |
//! | Time | [`Clock`] | Testable time operations |

mod clock;
mod domain_indexer;
mod rpc;
mod store;

pub use clock::{Clock, SystemClock};
pub use domain_indexer::DomainIndexer;
pub use rpc::{BlockTag, Header, LogFilter, RpcAdapter, TopicFilter};
pub use store::{LogStore, ReorgStore, SyncStateStore};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::FakeClock;
