//! Test fixtures for integration tests.
//!
//! No external database is required: the store adapter under test is
//! an embedded, single-file SQLite database, so fixtures here spin up
//! a tempfile-backed instance instead of a container.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chainfinity_indexer::error::Result;
use chainfinity_indexer::ports::{BlockTag, DomainIndexer, Header, LogFilter, RpcAdapter};
use chainfinity_indexer::store::{SqliteStore, SqliteStoreConfig};
use chainfinity_indexer::types::{BlockNumber, Digest, EthAddress, RawLog};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Open an in-memory store for tests that don't care about on-disk
/// durability.
pub async fn memory_store() -> SqliteStore {
    SqliteStore::connect_in_memory().await.expect("connect in-memory store")
}

/// Open a tempfile-backed store, returning the store and the
/// `TempDir` that owns its directory. The directory must outlive the
/// store (and any reconnects against the same path).
pub async fn temp_store() -> (SqliteStore, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("indexer.db");
    let store = SqliteStore::connect(path.to_str().expect("utf8 path"), SqliteStoreConfig::default())
        .await
        .expect("connect temp store");
    (store, dir)
}

fn deterministic_header(number: BlockNumber, seed: u8, parent_seed: u8) -> Header {
    Header {
        number,
        hash: Digest::new([number.get() as u8 ^ seed; 32]),
        parent_hash: if number == BlockNumber::ZERO {
            Digest::ZERO
        } else {
            Digest::new([number.prev().get() as u8 ^ parent_seed; 32])
        },
    }
}

struct ChainRpcState {
    chain_len: AtomicU64,
    finalized: AtomicU64,
    seed: AtomicU64,
    fork_seed: Mutex<HashMap<u64, u8>>,
    logs: Mutex<Vec<RawLog>>,
}

/// A scripted chain of deterministic headers plus a log set, standing
/// in for a real JSON-RPC peer. Headers for block `n` hash to
/// `n ^ seed`; calling [`ChainRpc::fork_from`] bumps the seed for every
/// block from a given height onward, simulating a reorg the way a real
/// chain re-deriving blocks on a new fork would.
///
/// Cloning shares the same underlying chain state (it's an `Arc`
/// handle), so a test can keep a clone to mutate after handing another
/// clone to an `IndexerDriver` that owns its adapter by value.
#[derive(Clone)]
pub struct ChainRpc(Arc<ChainRpcState>);

impl ChainRpc {
    #[must_use]
    pub fn new(chain_len: u64, finalized: u64) -> Self {
        Self(Arc::new(ChainRpcState {
            chain_len: AtomicU64::new(chain_len),
            finalized: AtomicU64::new(finalized),
            seed: AtomicU64::new(0),
            fork_seed: Mutex::new(HashMap::new()),
            logs: Mutex::new(Vec::new()),
        }))
    }

    pub fn set_finalized(&self, number: u64) {
        self.0.finalized.store(number, Ordering::SeqCst);
    }

    pub fn extend_chain(&self, to_len: u64) {
        self.0.chain_len.fetch_max(to_len, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: RawLog) {
        self.0.logs.lock().push(log);
    }

    /// Simulate a reorg: every block from `from` onward now hashes
    /// differently than it did before.
    pub fn fork_from(&self, from: u64) {
        let base_seed = self.0.seed.fetch_add(1, Ordering::SeqCst) as u8 + 1;
        let mut guard = self.0.fork_seed.lock();
        let chain_len = self.0.chain_len.load(Ordering::SeqCst);
        for n in from..=chain_len {
            guard.insert(n, base_seed);
        }
    }

    /// Simulate a reorg bounded to `[from, to]`: blocks in that span
    /// rehash differently, but the chain's current tip and anything
    /// past `to` keep whatever hash they already had. Unlike
    /// `fork_from`, this can leave a later range's immediate
    /// predecessor completely untouched, so a check that only compares
    /// the block right before a query won't observe anything wrong.
    pub fn fork_range(&self, from: u64, to: u64) {
        let base_seed = self.0.seed.fetch_add(1, Ordering::SeqCst) as u8 + 1;
        let mut guard = self.0.fork_seed.lock();
        for n in from..=to {
            guard.insert(n, base_seed);
        }
    }

    fn seed_for(&self, number: u64) -> u8 {
        self.0.fork_seed.lock().get(&number).copied().unwrap_or(0)
    }

    fn header(&self, number: BlockNumber) -> Header {
        let parent_seed = if number == BlockNumber::ZERO { 0 } else { self.seed_for(number.prev().get()) };
        deterministic_header(number, self.seed_for(number.get()), parent_seed)
    }
}

#[async_trait]
impl RpcAdapter for ChainRpc {
    async fn header_by_number(&self, number: BlockNumber) -> Result<Header> {
        Ok(self.header(number))
    }

    async fn header_by_tag(&self, _tag: BlockTag) -> Result<Header> {
        let finalized = self.0.finalized.load(Ordering::SeqCst);
        Ok(self.header(BlockNumber::new(finalized)))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let logs = self.0.logs.lock();
        Ok(logs
            .iter()
            .filter(|log| {
                log.block_number >= filter.from_block
                    && log.block_number <= filter.to_block
                    && (filter.addresses.is_empty() || filter.addresses.contains(&log.address))
            })
            .cloned()
            .collect())
    }

    async fn batch_get_logs(&self, filters: &[LogFilter]) -> Result<Vec<Vec<RawLog>>> {
        let mut out = Vec::with_capacity(filters.len());
        for filter in filters {
            out.push(self.get_logs(filter).await?);
        }
        Ok(out)
    }

    async fn batch_headers(&self, numbers: &[BlockNumber]) -> Result<Vec<Header>> {
        Ok(numbers.iter().map(|n| self.header(*n)).collect())
    }
}

/// A [`DomainIndexer`] that records every batch of logs and reorg
/// notification it receives, for assertion in integration tests.
pub struct RecordingIndexer {
    name: String,
    start: BlockNumber,
    watched: HashMap<EthAddress, HashSet<Digest>>,
    received_logs: Mutex<Vec<RawLog>>,
    reorgs: Mutex<Vec<BlockNumber>>,
}

impl RecordingIndexer {
    #[must_use]
    pub fn new(name: &str, start: BlockNumber, watched: HashMap<EthAddress, HashSet<Digest>>) -> Self {
        Self {
            name: name.to_string(),
            start,
            watched,
            received_logs: Mutex::new(Vec::new()),
            reorgs: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn received_logs(&self) -> Vec<RawLog> {
        self.received_logs.lock().clone()
    }

    #[must_use]
    pub fn reorgs_seen(&self) -> Vec<BlockNumber> {
        self.reorgs.lock().clone()
    }
}

#[async_trait]
impl DomainIndexer for RecordingIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn events_to_index(&self) -> HashMap<EthAddress, HashSet<Digest>> {
        self.watched.clone()
    }

    fn start_block(&self) -> BlockNumber {
        self.start
    }

    async fn handle_logs(&self, logs: &[RawLog]) -> Result<()> {
        self.received_logs.lock().extend_from_slice(logs);
        Ok(())
    }

    async fn handle_reorg(&self, from_block: BlockNumber) -> Result<()> {
        self.reorgs.lock().push(from_block);
        self.received_logs.lock().retain(|log| log.block_number < from_block);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub fn addr(n: u8) -> EthAddress {
    EthAddress::new([n; 20])
}

pub fn digest(n: u8) -> Digest {
    Digest::new([n; 32])
}

pub fn sample_log(address: EthAddress, block: u64, log_index: u32, topic0: Digest) -> RawLog {
    RawLog {
        address,
        block_number: BlockNumber::new(block),
        block_hash: digest(block as u8),
        tx_hash: digest(200),
        tx_index: 0,
        log_index,
        topics: vec![topic0],
        data: vec![0xde, 0xad, 0xbe, 0xef],
    }
}
