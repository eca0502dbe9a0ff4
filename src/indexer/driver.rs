//! The log fetcher / driver loop and the reorg repair orchestration it
//! falls back to.
//!
//! Computes a target height, decides a bounded range, fetches, and
//! loops, with an explicit `Backfill`/`Live` mode switch driven by the
//! configured [`Finality`] policy, reorg verification before every
//! commit, and orchestration of an open set of [`DomainIndexer`]s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{AppError, DomainError, Result};
use crate::ports::{BlockTag, DomainIndexer, LogFilter, LogStore, ReorgStore, RpcAdapter, SyncStateStore};
use crate::retry::{self, RetryConfig};
use crate::types::{BlockFingerprint, BlockNumber, Digest, EthAddress, FetchMode, FetchResult, Finality};

use super::reorg::ReorgDetector;
use super::sync_state::SyncStateKeeper;

/// Driver-loop configuration, minus `addresses`/`topics` which are
/// derived from the registered [`DomainIndexer`]s' `events_to_index`.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Block stride per `fetch_range` call.
    pub chunk_size: u64,
    /// Which chain tag defines the "safe to persist" horizon.
    pub finality: Finality,
    /// How long to suspend between polls once live mode is caught up.
    pub live_poll_interval: Duration,
}

/// Orchestrates the RPC adapter, reorg detector, log store, sync-state
/// keeper, maintenance lease, and registered domain indexers into the
/// backfill/live driver loop.
pub struct IndexerDriver<R, RS, L, SS> {
    rpc: R,
    reorg: ReorgDetector<RS>,
    log_store: L,
    sync_state: SyncStateKeeper<SS>,
    domain_indexers: Vec<Arc<dyn DomainIndexer>>,
    mode: Mutex<FetchMode>,
    config: DriverConfig,
    retry_config: RetryConfig,
}

impl<R, RS, L, SS> IndexerDriver<R, RS, L, SS>
where
    R: RpcAdapter,
    RS: ReorgStore,
    L: LogStore,
    SS: SyncStateStore,
{
    /// Build a driver over the given adapters and registered domain
    /// indexers. Starts in [`FetchMode::Backfill`]; call [`Self::run`]
    /// which reconciles with whatever mode was last persisted.
    pub fn new(
        rpc: R,
        reorg_store: RS,
        log_store: L,
        sync_state_store: SS,
        domain_indexers: Vec<Arc<dyn DomainIndexer>>,
        config: DriverConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            rpc,
            reorg: ReorgDetector::new(reorg_store),
            log_store,
            sync_state: SyncStateKeeper::new(sync_state_store),
            domain_indexers,
            mode: Mutex::new(FetchMode::Backfill),
            config,
            retry_config,
        }
    }

    fn start_block(&self) -> BlockNumber {
        self.domain_indexers
            .iter()
            .map(|idx| idx.start_block())
            .min()
            .unwrap_or(BlockNumber::ZERO)
    }

    /// Union of every registered domain indexer's `events_to_index`,
    /// merged per address.
    fn topics_per_address(&self) -> Vec<(EthAddress, Vec<Digest>)> {
        let mut merged: HashMap<EthAddress, HashSet<Digest>> = HashMap::new();
        for indexer in &self.domain_indexers {
            for (address, topics) in indexer.events_to_index() {
                merged.entry(address).or_default().extend(topics);
            }
        }
        merged.into_iter().map(|(a, t)| (a, t.into_iter().collect())).collect()
    }

    fn build_filter(&self, from: BlockNumber, to: BlockNumber, addresses_and_topics: &[(EthAddress, Vec<Digest>)]) -> LogFilter {
        let addresses = addresses_and_topics.iter().map(|(a, _)| *a).collect();
        let topic0: Vec<Digest> = addresses_and_topics.iter().flat_map(|(_, ts)| ts.iter().copied()).collect();
        LogFilter {
            addresses,
            topics: if topic0.is_empty() { vec![] } else { vec![topic0] },
            from_block: from,
            to_block: to,
        }
    }

    fn current_mode(&self) -> FetchMode {
        *self.mode.lock()
    }

    async fn transition_to_live(&self) -> Result<()> {
        *self.mode.lock() = FetchMode::Live;
        info!("backfill complete, transitioning to live mode");
        self.sync_state.transition_mode(FetchMode::Live).await
    }

    /// Resolve the configured finality policy to a concrete block
    /// number.
    #[instrument(skip(self, cancel))]
    async fn finalized_block(&self, cancel: &CancellationToken) -> Result<BlockNumber> {
        match self.config.finality {
            Finality::Finalized => {
                let header = retry::retry(&self.retry_config, "header_by_tag:finalized", cancel, || {
                    self.rpc.header_by_tag(BlockTag::Finalized)
                })
                .await?;
                Ok(header.number)
            }
            Finality::Safe => {
                let header = retry::retry(&self.retry_config, "header_by_tag:safe", cancel, || {
                    self.rpc.header_by_tag(BlockTag::Safe)
                })
                .await?;
                Ok(header.number)
            }
            Finality::Latest { lag } => {
                let header = retry::retry(&self.retry_config, "header_by_tag:latest", cancel, || {
                    self.rpc.header_by_tag(BlockTag::Latest)
                })
                .await?;
                Ok(header.number.saturating_sub_lag(lag))
            }
        }
    }

    /// Fetch and verify one bounded range: get logs (narrowing `to` if
    /// the peer reports "too many results"), re-verify the canonical
    /// chain and cross-check it against those logs, batch-fetch
    /// headers, return the result. Does not commit anything.
    ///
    /// # Errors
    /// Propagates RPC/store errors, or `DomainError::ReorgDetected` if
    /// the reorg detector reports a fork — the caller routes this to
    /// repair instead of treating it as fatal.
    #[instrument(skip(self, cancel), fields(from = from.get(), to = to.get()))]
    pub async fn fetch_range(&self, from: BlockNumber, to: BlockNumber, cancel: &CancellationToken) -> Result<FetchResult> {
        let addresses_and_topics = self.topics_per_address();
        let base_filter = self.build_filter(from, to, &addresses_and_topics);
        let narrowed_to = std::cell::Cell::new(to);

        let logs = retry::retry(&self.retry_config, "get_logs", cancel, || {
            let mut filter = base_filter.clone();
            filter.to_block = narrowed_to.get();
            async move {
                let result = self.rpc.get_logs(&filter).await;
                if let Err(err) = &result {
                    if let Some((_, suggested_to)) = retry::parse_suggested_range(&err.to_string()) {
                        let candidate = BlockNumber::new(suggested_to);
                        if candidate < narrowed_to.get() && candidate >= from {
                            warn!(suggested_to = candidate.get(), "narrowing range after too-many-results error");
                            narrowed_to.set(candidate);
                        }
                    }
                }
                result
            }
        })
        .await?;

        let to = narrowed_to.get();

        let verified_headers = self
            .reorg
            .verify_and_record(&self.rpc, &self.retry_config, cancel, &logs, from, to)
            .await?;

        let headers: Vec<BlockFingerprint> = verified_headers
            .iter()
            .map(|h| BlockFingerprint::new(h.number, h.hash, h.parent_hash))
            .collect();

        Ok(FetchResult {
            from_block: from,
            to_block: to,
            logs,
            headers,
        })
    }

    /// Choose the next range to fetch given `last_indexed_block`.
    /// Blocks cooperatively (but cancellably) when live mode is caught
    /// up to the finality horizon.
    ///
    /// # Errors
    /// Propagates `fetch_range` errors, or `DomainError::Cancelled` if
    /// `cancel` triggers while waiting for new blocks.
    #[instrument(skip(self, cancel))]
    pub async fn fetch_next(&self, last_indexed_block: BlockNumber, cancel: &CancellationToken) -> Result<FetchResult> {
        loop {
            let finalized_block = self.finalized_block(cancel).await?;
            let from = last_indexed_block.next();
            let mode = self.current_mode();

            if mode == FetchMode::Backfill && from > finalized_block {
                self.transition_to_live().await?;
                continue;
            }

            if from > finalized_block {
                tokio::select! {
                    () = tokio::time::sleep(self.config.live_poll_interval) => continue,
                    () = cancel.cancelled() => return Err(AppError::Domain(DomainError::Cancelled)),
                }
            }

            let to = match mode {
                FetchMode::Backfill => BlockNumber::new((from.get() + self.config.chunk_size - 1).min(finalized_block.get())),
                FetchMode::Live => {
                    let span = finalized_block.get() - from.get() + 1;
                    if span > self.config.chunk_size {
                        BlockNumber::new(from.get() + self.config.chunk_size - 1)
                    } else {
                        finalized_block
                    }
                }
            };

            return self.fetch_range(from, to, cancel).await;
        }
    }

    async fn commit(&self, result: &FetchResult) -> Result<()> {
        let addresses_and_topics = self.topics_per_address();
        let addresses: Vec<EthAddress> = addresses_and_topics.iter().map(|(a, _)| *a).collect();

        self.log_store
            .store_logs(&addresses, &addresses_and_topics, &result.logs, result.from_block, result.to_block)
            .await?;

        for indexer in &self.domain_indexers {
            indexer.handle_logs(&result.logs).await?;
        }

        if let Some(last_header) = result.headers.last() {
            self.sync_state
                .commit(last_header.block_number, last_header.block_hash, self.current_mode())
                .await?;
        }

        Ok(())
    }

    /// Reorg repair protocol: truncate the log store and
    /// reorg-detector fingerprints at `from_block`, notify every domain
    /// indexer in parallel, then rewind the sync-state checkpoint to
    /// `from_block - 1`.
    #[instrument(skip(self))]
    async fn repair_reorg(&self, from_block: BlockNumber) -> Result<()> {
        warn!(from_block = from_block.get(), "repairing reorg");

        self.log_store.handle_reorg(from_block).await?;

        let notifications = self.domain_indexers.iter().map(|idx| idx.handle_reorg(from_block));
        for result in join_all(notifications).await {
            result?;
        }

        self.reorg.truncate_from(from_block).await?;
        self.sync_state.rewind(from_block.prev()).await?;

        Ok(())
    }

    /// Run the driver loop until `cancel` triggers or a non-recoverable
    /// error surfaces. Resumes from the persisted checkpoint, or the
    /// minimum `start_block` across registered domain indexers if
    /// nothing has been indexed yet.
    ///
    /// # Errors
    /// Returns the first storage-fatal or config error encountered.
    /// Cancellation and reorg repair are handled internally and never
    /// returned as errors.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut last_indexed_block = match self.sync_state.current_state().await? {
            Some(state) => {
                *self.mode.lock() = state.mode;
                state.last_indexed_block
            }
            None => self.start_block().prev(),
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.fetch_next(last_indexed_block, &cancel).await {
                Ok(result) => {
                    self.commit(&result).await?;
                    last_indexed_block = result.to_block;
                }
                Err(err) if err.is_cancelled() => return Ok(()),
                Err(err) => {
                    if let Some((first_divergent_block, _depth)) = err.as_reorg() {
                        self.repair_reorg(first_divergent_block).await?;
                        last_indexed_block = first_divergent_block.prev();
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }
}
