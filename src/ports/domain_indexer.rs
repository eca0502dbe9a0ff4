//! Domain indexer port: the capability set a pluggable consumer
//! implements to translate raw logs into its own domain tables. The
//! core never defines or depends on any concrete domain schema — it
//! passes raw log bytes and 20-/32-byte identifiers only.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BlockNumber, Digest, EthAddress, RawLog};

/// A pluggable consumer of the core's fetched logs and reorg
/// notifications. Polymorphic over an open set of implementations —
/// realized via dynamic dispatch (`dyn DomainIndexer`) so new domain
/// indexers can be added without touching the core.
#[async_trait]
pub trait DomainIndexer: Send + Sync {
    /// A human-readable, process-unique name for logging.
    fn name(&self) -> &str;

    /// Addresses and the `topic0` signatures this indexer wants,
    /// used to construct RPC filters.
    fn events_to_index(&self) -> HashMap<EthAddress, HashSet<Digest>>;

    /// The block to start indexing from if no checkpoint exists yet.
    fn start_block(&self) -> BlockNumber;

    /// Invoked after a successful fetch-range commit; expected to
    /// persist its own domain tables in its own transaction.
    async fn handle_logs(&self, logs: &[RawLog]) -> Result<()>;

    /// Invoked during the reorg repair protocol.
    async fn handle_reorg(&self, from_block: BlockNumber) -> Result<()>;

    /// Release any resources held by this indexer.
    async fn close(&self) -> Result<()>;
}
