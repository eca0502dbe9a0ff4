//! Storage ports: the trait boundary between the core's components and
//! the embedded relational store.
//!
//! The sync-state keeper, reorg detector, and log store each own
//! disjoint relations and never touch each other's rows — so they get
//! three separate traits rather than one monolithic store trait, each
//! implemented by the same concrete `SqliteStore` (see
//! `crate::store::sqlite`).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    BlockFingerprint, BlockNumber, Digest, EthAddress, FetchMode, FullCoverageRange, RawLog,
    SyncState, TopicCoverageRange,
};

/// Persists the rolling window of non-finalized block fingerprints
/// used by the reorg detector.
#[async_trait]
pub trait ReorgStore: Send + Sync {
    /// All stored fingerprints with `block_number > after`, ordered
    /// ascending by block number.
    async fn fingerprints_after(&self, after: BlockNumber) -> Result<Vec<BlockFingerprint>>;

    /// The stored fingerprint at exactly `block_number`, if any.
    async fn fingerprint_at(&self, block_number: BlockNumber) -> Result<Option<BlockFingerprint>>;

    /// Insert or update fingerprints by block number (upsert).
    async fn upsert_fingerprints(&self, fingerprints: &[BlockFingerprint]) -> Result<()>;

    /// Delete all fingerprints with `block_number <= finalized_block`.
    async fn prune_finalized(&self, finalized_block: BlockNumber) -> Result<u64>;

    /// Delete all fingerprints with `block_number >= from_block`, used
    /// during reorg repair.
    async fn truncate_from(&self, from_block: BlockNumber) -> Result<u64>;
}

/// Persists raw logs plus the two coverage relations.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert logs (conflict-ignored on `(block_number, tx_index,
    /// log_index)`) and record full/topic coverage for `[from_block,
    /// to_block]`. A single transaction; empty `logs` is valid.
    async fn store_logs(
        &self,
        addresses: &[EthAddress],
        topics_per_address: &[(EthAddress, Vec<Digest>)],
        logs: &[RawLog],
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<()>;

    /// Logs for `address` in `[from, to]`, ordered by `(block_number,
    /// log_index)`, plus coverage rows overlapping the query.
    async fn get_logs(
        &self,
        address: EthAddress,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<(Vec<RawLog>, Vec<FullCoverageRange>)>;

    /// For each `(address, topic0)` pair, return it iff coverage does
    /// not continuously reach `up_to_block` from the oldest retained
    /// block for that address.
    async fn get_unsynced_topics(
        &self,
        addresses_and_topics: &[(EthAddress, Vec<Digest>)],
        up_to_block: BlockNumber,
    ) -> Result<Vec<(EthAddress, Digest)>>;

    /// Truncate all logs and coverage at or after `from_block`, as
    /// part of reorg repair.
    async fn handle_reorg(&self, from_block: BlockNumber) -> Result<()>;

    /// Delete logs and coverage wholly below `before_block`, then
    /// vacuum (non-fatal if vacuum fails).
    async fn prune_logs_before(&self, before_block: BlockNumber) -> Result<u64>;

    /// Raw topic coverage rows for an address, used by retention-sweep
    /// estimation and tests.
    async fn topic_coverage_for(&self, address: EthAddress) -> Result<Vec<TopicCoverageRange>>;

    /// Current on-disk database size in bytes, for retention sizing.
    async fn database_size_bytes(&self) -> Result<u64>;

    /// Approximate row counts `(logs, coverage)`, for retention sizing.
    async fn row_counts(&self) -> Result<(u64, u64)>;
}

/// Persists the single-row sync-state checkpoint.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Record a successful `fetch_range` commit.
    async fn save_checkpoint(
        &self,
        block_num: BlockNumber,
        block_hash: Digest,
        mode: FetchMode,
    ) -> Result<()>;

    /// Record a mode transition without moving the checkpoint block.
    async fn set_mode(&self, mode: FetchMode) -> Result<()>;

    /// Forcibly rewind to `start_block`, preserving mode unless the
    /// caller also calls `set_mode`.
    async fn reset(&self, start_block: BlockNumber) -> Result<()>;

    /// The last committed block number, or `None` if never indexed.
    async fn get_last_indexed_block(&self) -> Result<Option<BlockNumber>>;

    /// The full current state row, or `None` if never indexed.
    async fn get_state(&self) -> Result<Option<SyncState>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    fn check_reorg_store<T: ReorgStore>() {
        assert_send_sync::<T>();
    }
    fn check_log_store<T: LogStore>() {
        assert_send_sync::<T>();
    }
    fn check_sync_state_store<T: SyncStateStore>() {
        assert_send_sync::<T>();
    }

    #[test]
    fn all_store_ports_are_send_sync() {
        // Instantiating these generic fns is itself the compile-time check.
        let _ = check_reorg_store::<crate::store::sqlite::SqliteStore>;
        let _ = check_log_store::<crate::store::sqlite::SqliteStore>;
        let _ = check_sync_state_store::<crate::store::sqlite::SqliteStore>;
    }
}
