//! Chain reorganization detection.
//!
//! `verify_and_record` re-derives confidence in the canonical chain on
//! every call rather than trusting a single boundary comparison: it
//! re-verifies every fingerprint still on record against freshly
//! fetched headers before forgetting any of it, cross-checks the logs
//! just observed against the requested range's headers, and only then
//! records that range. A mismatch anywhere in that process is a
//! reorg; nothing is upserted or pruned on that path. The requested
//! range is always fetched and recorded, whether or not it falls at
//! or below the finalized block — finality only governs what's safe
//! to forget, never what's safe to skip checking.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{DomainError, Result};
use crate::ports::{BlockTag, Header, ReorgStore, RpcAdapter};
use crate::retry::{self, RetryConfig};
use crate::types::{BlockFingerprint, BlockNumber, Digest, RawLog};

/// Detects reorgs against a [`ReorgStore`] and keeps its fingerprint
/// window pruned.
#[derive(Debug)]
pub struct ReorgDetector<S> {
    store: S,
}

impl<S> ReorgDetector<S>
where
    S: ReorgStore,
{
    /// Wrap a store implementing [`ReorgStore`].
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Verify the canonical chain against everything this indexer
    /// currently believes, record the new range, and return the
    /// headers fetched for it.
    ///
    /// A single pass does the following, in order:
    ///
    /// 1. **Finalized baseline.** Fetch the current `finalized` header.
    /// 2. **Re-verify everything still on record.** Batch-fetch current
    ///    headers for every fingerprint the store still has, whether
    ///    or not it falls below the finalized block — a finalized
    ///    horizon that jumps forward between two calls must not let
    ///    anything skip this check on its way to being forgotten. Any
    ///    stored hash that no longer matches is a reorg.
    /// 3. **Forget what's now safe to forget.** Everything just
    ///    re-verified at or below the finalized block is pruned.
    /// 4. **Fetch headers for `[from_block, to_block]`**, unconditionally
    ///    — finality governs what gets pruned later, not what gets
    ///    checked now.
    /// 5. **Cross-verify against the supplied logs.** If `logs` claims
    ///    a different hash than the header we just fetched for the
    ///    same block, the chain moved between `get_logs` and this
    ///    call.
    /// 6. **Chain continuity.** Each fetched header's `parent_hash`
    ///    must equal the previous header's hash — the previous fetched
    ///    header, or (for the first one) whatever hash steps 1/2
    ///    already established for its predecessor.
    /// 7. **Record.** Upsert the fetched headers as fingerprints.
    ///
    /// # Errors
    /// Returns `DomainError::ReorgDetected` if any step above finds a
    /// divergence, or propagates RPC/store errors.
    #[instrument(skip(self, rpc, retry_config, cancel, logs), fields(from = from_block.get(), to = to_block.get()))]
    pub async fn verify_and_record<R: RpcAdapter>(
        &self,
        rpc: &R,
        retry_config: &RetryConfig,
        cancel: &CancellationToken,
        logs: &[RawLog],
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<Header>> {
        let finalized_header = retry::retry(retry_config, "reorg:finalized_header", cancel, || {
            rpc.header_by_tag(BlockTag::Finalized)
        })
        .await?;
        let finalized_block = finalized_header.number;

        let mut known_hashes: HashMap<u64, Digest> = HashMap::new();
        known_hashes.insert(finalized_block.get(), finalized_header.hash);

        // `fingerprints_after` is exclusive, so this returns everything
        // on record — deliberately not scoped to the finalized block,
        // so a horizon that jumps forward can't skip re-verifying
        // whatever it's about to make us forget.
        let stored = self.store.fingerprints_after(BlockNumber::ZERO).await?;
        if !stored.is_empty() {
            let numbers: Vec<BlockNumber> = stored.iter().map(|f| f.block_number).collect();
            let canonical = retry::retry(retry_config, "reorg:batch_headers:stored", cancel, || {
                rpc.batch_headers(&numbers)
            })
            .await?;

            for (fingerprint, current) in stored.iter().zip(canonical.iter()) {
                if fingerprint.block_hash != current.hash {
                    let depth = stored
                        .iter()
                        .filter(|f| f.block_number >= fingerprint.block_number)
                        .count() as u64;
                    warn!(
                        block = fingerprint.block_number.get(),
                        stored_hash = %fingerprint.block_hash.hex_prefix(8),
                        canonical_hash = %current.hash.hex_prefix(8),
                        "reorg: previously stored fingerprint no longer matches canonical chain"
                    );
                    return Err(DomainError::reorg_detected(
                        fingerprint.block_number,
                        fingerprint.block_hash,
                        current.hash,
                        depth,
                    )
                    .into());
                }
                known_hashes.insert(current.number.get(), current.hash);
            }
        }

        self.store.prune_finalized(finalized_block).await?;

        let range_numbers: Vec<BlockNumber> = (from_block.get()..=to_block.get()).map(BlockNumber::new).collect();
        let headers = retry::retry(retry_config, "reorg:batch_headers:range", cancel, || {
            rpc.batch_headers(&range_numbers)
        })
        .await?;

        let mut logged_hash_at: HashMap<u64, Digest> = HashMap::new();
        for log in logs {
            logged_hash_at.insert(log.block_number.get(), log.block_hash);
        }
        for header in &headers {
            if let Some(observed) = logged_hash_at.get(&header.number.get()) {
                if *observed != header.hash {
                    warn!(
                        block = header.number.get(),
                        logged_hash = %observed.hex_prefix(8),
                        header_hash = %header.hash.hex_prefix(8),
                        "reorg: logs observed a different block hash than the freshly fetched header"
                    );
                    return Err(
                        DomainError::reorg_detected(header.number, *observed, header.hash, 1).into(),
                    );
                }
            }
        }

        for (i, header) in headers.iter().enumerate() {
            let expected_parent = if header.number == BlockNumber::ZERO {
                None
            } else if i == 0 {
                known_hashes.get(&header.number.prev().get()).copied()
            } else {
                Some(headers[i - 1].hash)
            };

            if let Some(expected) = expected_parent {
                if header.parent_hash != expected {
                    warn!(
                        block = header.number.get(),
                        expected_parent = %expected.hex_prefix(8),
                        actual_parent = %header.parent_hash.hex_prefix(8),
                        "reorg: chain continuity broken"
                    );
                    return Err(DomainError::reorg_detected(
                        header.number,
                        expected,
                        header.parent_hash,
                        1,
                    )
                    .into());
                }
            }
        }

        let fingerprints: Vec<BlockFingerprint> = headers
            .iter()
            .map(|h| BlockFingerprint::new(h.number, h.hash, h.parent_hash))
            .collect();
        self.store.upsert_fingerprints(&fingerprints).await?;

        debug!(n = headers.len(), "range verified and recorded");
        Ok(headers)
    }

    /// Discard fingerprints from `from_block` onward, as part of reorg
    /// repair.
    pub async fn truncate_from(&self, from_block: BlockNumber) -> Result<u64> {
        self.store.truncate_from(from_block).await
    }
}
