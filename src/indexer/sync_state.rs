//! Sync-state keeper: tracks the single-row checkpoint that tells the
//! driver loop where to resume and which [`FetchMode`] it was in.
//!
//! Follows a load/get-start-block/update/reset-to shape; there's no
//! separate reindex/genesis recovery mode, just
//! resume-from-checkpoint-or-start-block and an explicit reset for
//! reorg repair.

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::ports::SyncStateStore;
use crate::types::{BlockNumber, Digest, FetchMode, SyncState};

/// Keeps the sync-state checkpoint current and exposes the start-block
/// decision the driver needs on launch.
#[derive(Debug)]
pub struct SyncStateKeeper<S> {
    store: S,
}

impl<S> SyncStateKeeper<S>
where
    S: SyncStateStore,
{
    /// Wrap a store implementing [`SyncStateStore`].
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The block to resume indexing from: one past the last committed
    /// checkpoint, or `start_block` if nothing has been indexed yet.
    #[instrument(skip(self))]
    pub async fn resume_from(&self, start_block: BlockNumber) -> Result<BlockNumber> {
        match self.store.get_last_indexed_block().await? {
            Some(last) => {
                info!(last_indexed = last.get(), "resuming from checkpoint");
                Ok(last.next())
            }
            None => {
                info!(start_block = start_block.get(), "no checkpoint, starting fresh");
                Ok(start_block)
            }
        }
    }

    /// The full persisted state, if any has been recorded.
    pub async fn current_state(&self) -> Result<Option<SyncState>> {
        self.store.get_state().await
    }

    /// Record a successful `fetch_range` commit.
    #[instrument(skip(self))]
    pub async fn commit(&self, block_num: BlockNumber, block_hash: Digest, mode: FetchMode) -> Result<()> {
        self.store.save_checkpoint(block_num, block_hash, mode).await?;
        debug!(block = block_num.get(), ?mode, "checkpoint committed");
        Ok(())
    }

    /// Switch fetch mode without moving the checkpoint (backfill → live
    /// transition).
    #[instrument(skip(self))]
    pub async fn transition_mode(&self, mode: FetchMode) -> Result<()> {
        info!(?mode, "fetch mode transition");
        self.store.set_mode(mode).await
    }

    /// Rewind the checkpoint to `from_block` as part of reorg repair;
    /// preserves whatever mode was active.
    #[instrument(skip(self))]
    pub async fn rewind(&self, from_block: BlockNumber) -> Result<()> {
        info!(from_block = from_block.get(), "rewinding checkpoint for reorg repair");
        self.store.reset(from_block).await
    }
}
