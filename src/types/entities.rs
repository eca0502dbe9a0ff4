//! Semantic entities: the persisted and transient shapes that flow
//! between the reorg detector, log store, sync-state keeper, and
//! driver loop.

use serde::{Deserialize, Serialize};

use super::primitives::{BlockNumber, Digest, EthAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK FINGERPRINT
// ═══════════════════════════════════════════════════════════════════════════════

/// A minimal chain-identity record: enough to detect a reorg by
/// hash/parent-hash comparison without validating consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFingerprint {
    /// The block's height.
    pub block_number: BlockNumber,
    /// The block's own hash.
    pub block_hash: Digest,
    /// The hash of the preceding block.
    pub parent_hash: Digest,
}

impl BlockFingerprint {
    /// Construct a fingerprint from an RPC-reported header.
    #[must_use]
    pub const fn new(block_number: BlockNumber, block_hash: Digest, parent_hash: Digest) -> Self {
        Self {
            block_number,
            block_hash,
            parent_hash,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// A single event log exactly as observed on-chain, identified by its
/// `(block_number, tx_index, log_index)` position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract address.
    pub address: EthAddress,
    /// Block the log was emitted in.
    pub block_number: BlockNumber,
    /// Hash of the emitting block.
    pub block_hash: Digest,
    /// Hash of the emitting transaction.
    pub tx_hash: Digest,
    /// Index of the transaction within its block.
    pub tx_index: u32,
    /// Index of the log within its block.
    pub log_index: u32,
    /// Up to four indexed topics (`topic0` is the event signature).
    pub topics: Vec<Digest>,
    /// Opaque ABI-encoded log data.
    pub data: Vec<u8>,
}

impl RawLog {
    /// The event signature digest, if present.
    #[must_use]
    pub fn topic0(&self) -> Option<Digest> {
        self.topics.first().copied()
    }

    /// Unique key within a store: `(block_number, tx_index, log_index)`.
    #[must_use]
    pub const fn key(&self) -> (u64, u32, u32) {
        (self.block_number.get(), self.tx_index, self.log_index)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COVERAGE RANGES
// ═══════════════════════════════════════════════════════════════════════════════

/// "All logs for this address across `[from_block, to_block]` are in
/// the store."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullCoverageRange {
    /// The covered address.
    pub address: EthAddress,
    /// Inclusive lower bound.
    pub from_block: BlockNumber,
    /// Inclusive upper bound.
    pub to_block: BlockNumber,
}

/// As [`FullCoverageRange`] but scoped to a single `topic0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCoverageRange {
    /// The covered address.
    pub address: EthAddress,
    /// The covered event-signature topic.
    pub topic0: Digest,
    /// Inclusive lower bound.
    pub from_block: BlockNumber,
    /// Inclusive upper bound.
    pub to_block: BlockNumber,
}

/// Shared continuity check used by both coverage kinds: does a sorted
/// run of `[from_block, to_block]` ranges continuously cover `[from,
/// to]` with no gaps?
///
/// Sorts ranges by `from_block`, walks `cursor = from`; for each range,
/// if `range.from > cursor` returns false, else advances
/// `cursor = max(cursor, range.to + 1)`; returns `cursor > to`.
#[must_use]
pub fn ranges_cover_continuously(
    ranges: &[(BlockNumber, BlockNumber)],
    from: BlockNumber,
    to: BlockNumber,
) -> bool {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|(from, _)| *from);

    let mut cursor = from;
    for (range_from, range_to) in sorted {
        if range_from > cursor {
            return false;
        }
        cursor = cursor.max(range_to.next());
        if range_to.get() == u64::MAX {
            // Pathological but keep `next()` saturation from looping forever.
            cursor = range_to;
            break;
        }
    }
    cursor > to
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNC STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether the driver is catching up on history or tailing the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchMode {
    /// Catching up on history, fetching in `chunk_size` strides up to
    /// the finalized block.
    Backfill,
    /// Tailing the chain head.
    Live,
}

impl FetchMode {
    /// SQL-friendly string form for persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backfill => "backfill",
            Self::Live => "live",
        }
    }

    /// Parse back from the persisted string form.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "backfill" => Some(Self::Backfill),
            "live" => Some(Self::Live),
            _ => None,
        }
    }
}

/// The single-row checkpoint per indexer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Highest block committed to the log store.
    pub last_indexed_block: BlockNumber,
    /// Hash of `last_indexed_block` on the chain as last observed.
    pub last_indexed_block_hash: Digest,
    /// Unix timestamp of the last successful commit.
    pub last_indexed_timestamp: i64,
    /// Current fetch mode.
    pub mode: FetchMode,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FINALITY POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// Which chain tag defines the "safe to persist" horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finality {
    /// The RPC peer's `finalized` tag.
    Finalized,
    /// The RPC peer's `safe` tag.
    Safe,
    /// `latest` minus a fixed lag, clamped at zero.
    Latest {
        /// Blocks behind head.
        lag: u64,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// FETCH RESULT (transient)
// ═══════════════════════════════════════════════════════════════════════════════

/// The output of one `fetch_range` call. Never persisted directly —
/// its contents are committed to the log store, reorg detector, and
/// sync-state keeper individually.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Inclusive lower bound of the range just fetched.
    pub from_block: BlockNumber,
    /// Inclusive upper bound of the range just fetched.
    pub to_block: BlockNumber,
    /// Logs observed in the range, ordered by `(block_number, log_index)`.
    pub logs: Vec<RawLog>,
    /// Fingerprint of every block in `[from_block, to_block]`.
    pub headers: Vec<BlockFingerprint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuity_detects_gap() {
        let ranges = vec![(BlockNumber::new(0), BlockNumber::new(50))];
        assert!(!ranges_cover_continuously(
            &ranges,
            BlockNumber::new(0),
            BlockNumber::new(100)
        ));
    }

    #[test]
    fn continuity_detects_full_coverage() {
        let ranges = vec![
            (BlockNumber::new(0), BlockNumber::new(50)),
            (BlockNumber::new(51), BlockNumber::new(100)),
        ];
        assert!(ranges_cover_continuously(
            &ranges,
            BlockNumber::new(0),
            BlockNumber::new(100)
        ));
    }

    #[test]
    fn continuity_tolerates_overlap() {
        let ranges = vec![
            (BlockNumber::new(0), BlockNumber::new(60)),
            (BlockNumber::new(40), BlockNumber::new(100)),
        ];
        assert!(ranges_cover_continuously(
            &ranges,
            BlockNumber::new(0),
            BlockNumber::new(100)
        ));
    }

    #[test]
    fn continuity_unordered_input() {
        let ranges = vec![
            (BlockNumber::new(51), BlockNumber::new(100)),
            (BlockNumber::new(0), BlockNumber::new(50)),
        ];
        assert!(ranges_cover_continuously(
            &ranges,
            BlockNumber::new(0),
            BlockNumber::new(100)
        ));
    }

    #[test]
    fn fetch_mode_round_trips_through_str() {
        assert_eq!(FetchMode::from_str_opt("live"), Some(FetchMode::Live));
        assert_eq!(FetchMode::Backfill.as_str(), "backfill");
        assert_eq!(FetchMode::from_str_opt("bogus"), None);
    }
}
