//! Core types for the log indexing engine.
//!
//! - [`primitives`] — validated newtypes (`EthAddress`, `Digest`, `BlockNumber`)
//! - [`entities`] — semantic entities (`BlockFingerprint`, `RawLog`,
//!   coverage ranges, `SyncState`, `Finality`, `FetchResult`)

pub mod entities;
pub mod primitives;

pub use entities::{
    BlockFingerprint, FetchMode, FetchResult, Finality, FullCoverageRange, RawLog, SyncState,
    TopicCoverageRange, ranges_cover_continuously,
};
pub use primitives::{BlockNumber, Digest, EthAddress};
