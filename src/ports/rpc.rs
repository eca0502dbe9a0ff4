//! RPC adapter port: the capability set the core assumes over a
//! remote JSON-RPC peer. Implementation-independent — the core only
//! depends on this trait, never on a concrete client.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BlockNumber, Digest, EthAddress};

/// Which chain tag to resolve a header for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// The peer's `latest` tag.
    Latest,
    /// The peer's `safe` tag.
    Safe,
    /// The peer's `finalized` tag.
    Finalized,
}

/// Minimal header shape: number, hash, parent hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The block's height.
    pub number: BlockNumber,
    /// The block's own hash.
    pub hash: Digest,
    /// The hash of the preceding block.
    pub parent_hash: Digest,
}

/// A 2-D topic filter: outer = positional slots, inner = accepted
/// alternatives at that position (an OR within a slot, AND across
/// slots), matching `eth_getLogs` filter semantics.
pub type TopicFilter = Vec<Vec<Digest>>;

/// A single `get_logs` query.
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Contract addresses to match (OR'd).
    pub addresses: Vec<EthAddress>,
    /// Positional topic filter.
    pub topics: TopicFilter,
    /// Inclusive lower bound.
    pub from_block: BlockNumber,
    /// Inclusive upper bound.
    pub to_block: BlockNumber,
}

/// The capability set the core assumes over an RPC peer.
#[async_trait]
pub trait RpcAdapter: Send + Sync {
    /// Fetch a single header by block number.
    async fn header_by_number(&self, number: BlockNumber) -> Result<Header>;

    /// Fetch a single header by chain tag.
    async fn header_by_tag(&self, tag: BlockTag) -> Result<Header>;

    /// Fetch logs matching one filter.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<crate::types::RawLog>>;

    /// Fetch logs for several filters in one round-trip where the
    /// transport supports batching.
    async fn batch_get_logs(&self, filters: &[LogFilter]) -> Result<Vec<Vec<crate::types::RawLog>>>;

    /// Fetch headers for several block numbers, preserving input
    /// ordering. Implementations may chunk internally; a batch size of
    /// 100 is the suggested maximum.
    async fn batch_headers(&self, numbers: &[BlockNumber]) -> Result<Vec<Header>>;
}
