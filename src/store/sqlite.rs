//! Embedded SQLite store implementing the three storage ports.
//!
//! A single-file SQLite database: a `pool.begin()` / bind / `tx.commit()`
//! transaction pattern with an upsert-by-conflict idiom, WAL mode, a
//! tuned busy-timeout, and a bounded connection pool.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, instrument};

use crate::error::{InfraError, Result};
use crate::ports::{LogStore, ReorgStore, SyncStateStore};
use crate::types::{
    BlockFingerprint, BlockNumber, Digest, EthAddress, FetchMode, FullCoverageRange, RawLog,
    SyncState, TopicCoverageRange,
};

/// Tuning knobs for the embedded store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SqliteStoreConfig {
    /// `busy_timeout` in milliseconds before `SQLITE_BUSY` is surfaced.
    pub busy_timeout_ms: u64,
    /// SQLite `cache_size` pragma (negative = KiB, positive = pages).
    pub cache_size: i64,
    /// Maximum open connections in the pool.
    pub max_open_connections: u32,
    /// Connections kept idle in the pool.
    pub max_idle_connections: u32,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            cache_size: 10_000,
            max_open_connections: 25,
            max_idle_connections: 5,
        }
    }
}

/// Retention-sweep tuning: caps beyond which `store_logs` prunes the
/// oldest blocks after each commit. Both caps default to disabled (0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionConfig {
    /// Cap on the stored block span (`newest - oldest`). 0 = unbounded.
    pub max_blocks: u64,
    /// Cap on database size in megabytes. 0 = unbounded.
    pub max_db_size_mb: u64,
    /// Relative weight of a `raw_logs` row when estimating bytes per
    /// block for the size-based sweep.
    pub logs_weight: u32,
    /// Relative weight of a coverage row (full or topic) in the same
    /// estimate.
    pub coverage_weight: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_blocks: 0,
            max_db_size_mb: 0,
            logs_weight: 3,
            coverage_weight: 1,
        }
    }
}

/// SQLite-backed store implementation of [`ReorgStore`], [`LogStore`],
/// and [`SyncStateStore`]. A single instance owns one database file,
/// covering three disjoint relation groups: fingerprints, logs, and
/// sync state.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    retention: RetentionConfig,
}

impl SqliteStore {
    /// Open (creating if absent) the database file at `path`, with WAL
    /// journaling and the given tuning.
    ///
    /// # Errors
    /// Returns `InfraError::Database` if the connection or schema
    /// creation fails.
    pub async fn connect(path: &str, config: SqliteStoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(InfraError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .pragma("cache_size", config.cache_size.to_string());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_open_connections)
            .min_connections(config.max_idle_connections)
            .connect_with(options)
            .await
            .map_err(InfraError::Database)?;

        let store = Self {
            pool,
            retention: RetentionConfig::default(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database for unit tests.
    ///
    /// # Errors
    /// Returns `InfraError::Database` if the connection fails.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(InfraError::Database)?;
        let store = Self {
            pool,
            retention: RetentionConfig::default(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Apply retention-sweep tuning. Disabled (all caps 0) by default.
    #[must_use]
    pub const fn with_retention_config(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    /// Create the relations this store owns if they don't already
    /// exist. Schema/migration DDL is normally the external migrations
    /// collaborator's responsibility; this is kept as a self-contained
    /// convenience so the store works without a separate migrator, and
    /// is idempotent.
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS block_fingerprints (
                block_number INTEGER PRIMARY KEY,
                block_hash   BLOB NOT NULL,
                parent_hash  BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS raw_logs (
                block_number INTEGER NOT NULL,
                tx_index     INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                address      BLOB NOT NULL,
                block_hash   BLOB NOT NULL,
                tx_hash      BLOB NOT NULL,
                topic0       BLOB,
                topic1       BLOB,
                topic2       BLOB,
                topic3       BLOB,
                data         BLOB NOT NULL,
                PRIMARY KEY (block_number, tx_index, log_index)
            );

            CREATE TABLE IF NOT EXISTS full_coverage (
                address    BLOB NOT NULL,
                from_block INTEGER NOT NULL,
                to_block   INTEGER NOT NULL,
                PRIMARY KEY (address, from_block, to_block)
            );

            CREATE TABLE IF NOT EXISTS topic_coverage (
                address    BLOB NOT NULL,
                topic0     BLOB NOT NULL,
                from_block INTEGER NOT NULL,
                to_block   INTEGER NOT NULL,
                PRIMARY KEY (address, topic0, from_block, to_block)
            );

            CREATE TABLE IF NOT EXISTS sync_state (
                id                       INTEGER PRIMARY KEY CHECK (id = 0),
                last_indexed_block       INTEGER NOT NULL,
                last_indexed_block_hash  BLOB NOT NULL,
                last_indexed_timestamp   INTEGER NOT NULL,
                mode                     TEXT NOT NULL
            );
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(())
    }

    /// Access to the underlying pool, for the maintenance coordinator's
    /// WAL checkpoint/vacuum operations.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Oldest and newest block covered by `full_coverage`, or `None` if
    /// nothing has been indexed yet.
    async fn block_span(&self) -> Result<Option<(BlockNumber, BlockNumber)>> {
        let row: (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(from_block), MAX(to_block) FROM full_coverage")
                .fetch_one(&self.pool)
                .await
                .map_err(InfraError::Database)?;
        Ok(match row {
            (Some(oldest), Some(newest)) => Some((
                BlockNumber::new(oldest as u64),
                BlockNumber::new(newest as u64),
            )),
            _ => None,
        })
    }

    /// Prune the oldest blocks if either retention cap is exceeded.
    /// Returns the number of log rows removed (0 if retention is
    /// disabled or neither cap is exceeded).
    #[instrument(skip(self))]
    async fn run_retention_sweep(&self) -> Result<u64> {
        if self.retention.max_blocks == 0 && self.retention.max_db_size_mb == 0 {
            return Ok(0);
        }
        let Some((oldest, newest)) = self.block_span().await? else {
            return Ok(0);
        };
        let total_blocks = newest.get().saturating_sub(oldest.get()).saturating_add(1);

        let age_based = if self.retention.max_blocks > 0 && total_blocks > self.retention.max_blocks
        {
            total_blocks - self.retention.max_blocks
        } else {
            0
        };

        let size_based = self.size_based_blocks_to_delete(total_blocks).await?;

        let blocks_to_delete = age_based.max(size_based).min(total_blocks);
        if blocks_to_delete == 0 {
            return Ok(0);
        }

        let prune_before = BlockNumber::new(oldest.get() + blocks_to_delete);
        debug!(
            blocks_to_delete,
            prune_before = prune_before.get(),
            "retention sweep pruning"
        );
        LogStore::prune_logs_before(self, prune_before).await
    }

    /// Estimate how many of the oldest blocks to drop to bring the
    /// database back under `max_db_size_mb`. 0 if size retention is
    /// disabled or the database is already under the limit.
    async fn size_based_blocks_to_delete(&self, total_blocks: u64) -> Result<u64> {
        if self.retention.max_db_size_mb == 0 {
            return Ok(0);
        }
        let limit_bytes = self.retention.max_db_size_mb * 1024 * 1024;
        let current_bytes = LogStore::database_size_bytes(self).await?;
        if current_bytes < limit_bytes {
            return Ok(0);
        }
        let target_bytes = (current_bytes - limit_bytes) as f64;

        let (log_rows, coverage_rows) = LogStore::row_counts(self).await?;
        let total_rows = log_rows + coverage_rows;

        let estimate = if total_rows == 0 || total_blocks == 0 {
            0
        } else {
            let avg_bytes_per_row = current_bytes as f64 / total_rows as f64;
            let weighted_rows_per_block = (log_rows as f64 * f64::from(self.retention.logs_weight)
                + coverage_rows as f64 * f64::from(self.retention.coverage_weight))
                / total_blocks as f64;
            let bytes_per_block = avg_bytes_per_row * weighted_rows_per_block;
            if bytes_per_block > 0.0 {
                let raw = (target_bytes / bytes_per_block).ceil() as u64;
                raw + raw / 10 // 10% safety margin
            } else {
                0
            }
        };

        let blocks = if estimate == 0 {
            (total_blocks as f64 * 0.10).ceil() as u64 // fallback: 10% of blocks
        } else {
            estimate
        };
        Ok(blocks.min(total_blocks))
    }
}

fn digest_from_blob(bytes: &[u8]) -> Result<Digest> {
    Digest::from_slice(bytes)
        .map_err(|e| InfraError::StorageFatal(format!("corrupt digest in store: {e}")).into())
}

fn address_from_blob(bytes: &[u8]) -> Result<EthAddress> {
    EthAddress::from_slice(bytes)
        .map_err(|e| InfraError::StorageFatal(format!("corrupt address in store: {e}")).into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// REORG STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(FromRow)]
struct FingerprintRow {
    block_number: i64,
    block_hash: Vec<u8>,
    parent_hash: Vec<u8>,
}

impl FingerprintRow {
    fn into_fingerprint(self) -> Result<BlockFingerprint> {
        Ok(BlockFingerprint::new(
            BlockNumber::new(self.block_number as u64),
            digest_from_blob(&self.block_hash)?,
            digest_from_blob(&self.parent_hash)?,
        ))
    }
}

#[async_trait]
impl ReorgStore for SqliteStore {
    #[instrument(skip(self))]
    async fn fingerprints_after(&self, after: BlockNumber) -> Result<Vec<BlockFingerprint>> {
        let rows: Vec<FingerprintRow> = sqlx::query_as(
            "SELECT block_number, block_hash, parent_hash FROM block_fingerprints WHERE block_number > ? ORDER BY block_number ASC",
        )
        .bind(after.get() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter().map(FingerprintRow::into_fingerprint).collect()
    }

    #[instrument(skip(self))]
    async fn fingerprint_at(&self, block_number: BlockNumber) -> Result<Option<BlockFingerprint>> {
        let row: Option<FingerprintRow> = sqlx::query_as(
            "SELECT block_number, block_hash, parent_hash FROM block_fingerprints WHERE block_number = ?",
        )
        .bind(block_number.get() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        row.map(FingerprintRow::into_fingerprint).transpose()
    }

    #[instrument(skip(self, fingerprints), fields(count = fingerprints.len()))]
    async fn upsert_fingerprints(&self, fingerprints: &[BlockFingerprint]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for fp in fingerprints {
            sqlx::query(
                r"
                INSERT INTO block_fingerprints (block_number, block_hash, parent_hash)
                VALUES (?, ?, ?)
                ON CONFLICT (block_number) DO UPDATE SET
                    block_hash = excluded.block_hash,
                    parent_hash = excluded.parent_hash
                ",
            )
            .bind(fp.block_number.get() as i64)
            .bind(fp.block_hash.as_bytes().as_slice())
            .bind(fp.parent_hash.as_bytes().as_slice())
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        debug!("fingerprints upserted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prune_finalized(&self, finalized_block: BlockNumber) -> Result<u64> {
        let result = sqlx::query("DELETE FROM block_fingerprints WHERE block_number <= ?")
            .bind(finalized_block.get() as i64)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn truncate_from(&self, from_block: BlockNumber) -> Result<u64> {
        let result = sqlx::query("DELETE FROM block_fingerprints WHERE block_number >= ?")
            .bind(from_block.get() as i64)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(result.rows_affected())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOG STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(FromRow)]
struct RawLogRow {
    block_number: i64,
    tx_index: i64,
    log_index: i64,
    address: Vec<u8>,
    block_hash: Vec<u8>,
    tx_hash: Vec<u8>,
    topic0: Option<Vec<u8>>,
    topic1: Option<Vec<u8>>,
    topic2: Option<Vec<u8>>,
    topic3: Option<Vec<u8>>,
    data: Vec<u8>,
}

impl RawLogRow {
    fn into_raw_log(self) -> Result<RawLog> {
        let mut topics = Vec::with_capacity(4);
        for slot in [self.topic0, self.topic1, self.topic2, self.topic3] {
            match slot {
                Some(bytes) => topics.push(digest_from_blob(&bytes)?),
                None => break,
            }
        }
        Ok(RawLog {
            address: address_from_blob(&self.address)?,
            block_number: BlockNumber::new(self.block_number as u64),
            block_hash: digest_from_blob(&self.block_hash)?,
            tx_hash: digest_from_blob(&self.tx_hash)?,
            tx_index: self.tx_index as u32,
            log_index: self.log_index as u32,
            topics,
            data: self.data,
        })
    }
}

#[derive(FromRow)]
struct FullCoverageRow {
    address: Vec<u8>,
    from_block: i64,
    to_block: i64,
}

impl FullCoverageRow {
    fn into_range(self) -> Result<FullCoverageRange> {
        Ok(FullCoverageRange {
            address: address_from_blob(&self.address)?,
            from_block: BlockNumber::new(self.from_block as u64),
            to_block: BlockNumber::new(self.to_block as u64),
        })
    }
}

#[derive(FromRow)]
struct TopicCoverageRow {
    address: Vec<u8>,
    topic0: Vec<u8>,
    from_block: i64,
    to_block: i64,
}

impl TopicCoverageRow {
    fn into_range(self) -> Result<TopicCoverageRange> {
        Ok(TopicCoverageRange {
            address: address_from_blob(&self.address)?,
            topic0: digest_from_blob(&self.topic0)?,
            from_block: BlockNumber::new(self.from_block as u64),
            to_block: BlockNumber::new(self.to_block as u64),
        })
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    #[instrument(skip(self, addresses, topics_per_address, logs), fields(n_logs = logs.len()))]
    async fn store_logs(
        &self,
        addresses: &[EthAddress],
        topics_per_address: &[(EthAddress, Vec<Digest>)],
        logs: &[RawLog],
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        for log in logs {
            let topics: Vec<Option<&[u8]>> = (0..4)
                .map(|i| log.topics.get(i).map(|d| d.as_bytes().as_slice()))
                .collect();
            sqlx::query(
                r"
                INSERT INTO raw_logs
                    (block_number, tx_index, log_index, address, block_hash, tx_hash,
                     topic0, topic1, topic2, topic3, data)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (block_number, tx_index, log_index) DO NOTHING
                ",
            )
            .bind(log.block_number.get() as i64)
            .bind(i64::from(log.tx_index))
            .bind(i64::from(log.log_index))
            .bind(log.address.as_slice())
            .bind(log.block_hash.as_bytes().as_slice())
            .bind(log.tx_hash.as_bytes().as_slice())
            .bind(topics[0])
            .bind(topics[1])
            .bind(topics[2])
            .bind(topics[3])
            .bind(log.data.as_slice())
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        for address in addresses {
            sqlx::query(
                r"
                INSERT INTO full_coverage (address, from_block, to_block)
                VALUES (?, ?, ?)
                ON CONFLICT (address, from_block, to_block) DO NOTHING
                ",
            )
            .bind(address.as_slice())
            .bind(from_block.get() as i64)
            .bind(to_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        for (address, topics) in topics_per_address {
            for topic0 in topics {
                sqlx::query(
                    r"
                    INSERT INTO topic_coverage (address, topic0, from_block, to_block)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (address, topic0, from_block, to_block) DO NOTHING
                    ",
                )
                .bind(address.as_slice())
                .bind(topic0.as_bytes().as_slice())
                .bind(from_block.get() as i64)
                .bind(to_block.get() as i64)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
            }
        }

        tx.commit().await.map_err(InfraError::Database)?;
        debug!("logs and coverage committed");

        if let Err(e) = self.run_retention_sweep().await {
            tracing::warn!(error = %e, "retention sweep failed after store_logs commit (non-fatal)");
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_logs(
        &self,
        address: EthAddress,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<(Vec<RawLog>, Vec<FullCoverageRange>)> {
        let log_rows: Vec<RawLogRow> = sqlx::query_as(
            r"
            SELECT block_number, tx_index, log_index, address, block_hash, tx_hash,
                   topic0, topic1, topic2, topic3, data
            FROM raw_logs
            WHERE address = ? AND block_number >= ? AND block_number <= ?
            ORDER BY block_number ASC, log_index ASC
            ",
        )
        .bind(address.as_slice())
        .bind(from_block.get() as i64)
        .bind(to_block.get() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let coverage_rows: Vec<FullCoverageRow> = sqlx::query_as(
            r"
            SELECT address, from_block, to_block FROM full_coverage
            WHERE address = ? AND from_block <= ? AND to_block >= ?
            ORDER BY from_block ASC
            ",
        )
        .bind(address.as_slice())
        .bind(to_block.get() as i64)
        .bind(from_block.get() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let logs = log_rows
            .into_iter()
            .map(RawLogRow::into_raw_log)
            .collect::<Result<Vec<_>>>()?;
        let coverage = coverage_rows
            .into_iter()
            .map(FullCoverageRow::into_range)
            .collect::<Result<Vec<_>>>()?;

        Ok((logs, coverage))
    }

    #[instrument(skip(self, addresses_and_topics))]
    async fn get_unsynced_topics(
        &self,
        addresses_and_topics: &[(EthAddress, Vec<Digest>)],
        up_to_block: BlockNumber,
    ) -> Result<Vec<(EthAddress, Digest)>> {
        let mut unsynced = Vec::new();

        for (address, topics) in addresses_and_topics {
            let oldest_retained: Option<i64> =
                sqlx::query_scalar("SELECT MIN(from_block) FROM full_coverage WHERE address = ?")
                    .bind(address.as_slice())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(InfraError::Database)?;
            let oldest_retained = BlockNumber::new(oldest_retained.unwrap_or(0) as u64);

            for topic0 in topics {
                let rows: Vec<(i64, i64)> = sqlx::query_as(
                    "SELECT from_block, to_block FROM topic_coverage WHERE address = ? AND topic0 = ?",
                )
                .bind(address.as_slice())
                .bind(topic0.as_bytes().as_slice())
                .fetch_all(&self.pool)
                .await
                .map_err(InfraError::Database)?;

                let ranges: Vec<(BlockNumber, BlockNumber)> = rows
                    .into_iter()
                    .map(|(f, t)| (BlockNumber::new(f as u64), BlockNumber::new(t as u64)))
                    .collect();

                if !crate::types::ranges_cover_continuously(&ranges, oldest_retained, up_to_block) {
                    unsynced.push((*address, *topic0));
                }
            }
        }

        Ok(unsynced)
    }

    #[instrument(skip(self))]
    async fn handle_reorg(&self, from_block: BlockNumber) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let truncate_to = from_block.prev().get() as i64;

        sqlx::query("DELETE FROM raw_logs WHERE block_number >= ?")
            .bind(from_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        sqlx::query(
            "UPDATE full_coverage SET to_block = ? WHERE from_block < ? AND to_block >= ?",
        )
        .bind(truncate_to)
        .bind(from_block.get() as i64)
        .bind(from_block.get() as i64)
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        sqlx::query("DELETE FROM full_coverage WHERE from_block >= ?")
            .bind(from_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        sqlx::query(
            "UPDATE topic_coverage SET to_block = ? WHERE from_block < ? AND to_block >= ?",
        )
        .bind(truncate_to)
        .bind(from_block.get() as i64)
        .bind(from_block.get() as i64)
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        sqlx::query("DELETE FROM topic_coverage WHERE from_block >= ?")
            .bind(from_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        tx.commit().await.map_err(InfraError::Database)?;
        debug!(from_block = from_block.get(), "reorg truncation committed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prune_logs_before(&self, before_block: BlockNumber) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        let result = sqlx::query("DELETE FROM raw_logs WHERE block_number < ?")
            .bind(before_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        let pruned = result.rows_affected();

        sqlx::query("DELETE FROM full_coverage WHERE to_block < ?")
            .bind(before_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        sqlx::query("DELETE FROM topic_coverage WHERE to_block < ?")
            .bind(before_block.get() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        tx.commit().await.map_err(InfraError::Database)?;

        if let Err(e) = sqlx::query("VACUUM").execute(&self.pool).await {
            tracing::warn!(error = %e, "vacuum after retention prune failed (non-fatal)");
        }

        Ok(pruned)
    }

    #[instrument(skip(self))]
    async fn topic_coverage_for(&self, address: EthAddress) -> Result<Vec<TopicCoverageRange>> {
        let rows: Vec<TopicCoverageRow> = sqlx::query_as(
            "SELECT address, topic0, from_block, to_block FROM topic_coverage WHERE address = ?",
        )
        .bind(address.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter().map(TopicCoverageRow::into_range).collect()
    }

    #[instrument(skip(self))]
    async fn database_size_bytes(&self) -> Result<u64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok((page_count * page_size) as u64)
    }

    #[instrument(skip(self))]
    async fn row_counts(&self) -> Result<(u64, u64)> {
        let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_logs")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        let full: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM full_coverage")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        let topic: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topic_coverage")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok((logs as u64, (full + topic) as u64))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNC STATE STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(FromRow)]
struct SyncStateRow {
    last_indexed_block: i64,
    last_indexed_block_hash: Vec<u8>,
    last_indexed_timestamp: i64,
    mode: String,
}

impl SyncStateRow {
    fn into_sync_state(self) -> Result<SyncState> {
        let mode = FetchMode::from_str_opt(&self.mode).ok_or_else(|| {
            InfraError::StorageFatal(format!("unrecognized fetch mode in store: {}", self.mode))
        })?;
        Ok(SyncState {
            last_indexed_block: BlockNumber::new(self.last_indexed_block as u64),
            last_indexed_block_hash: digest_from_blob(&self.last_indexed_block_hash)?,
            last_indexed_timestamp: self.last_indexed_timestamp,
            mode,
        })
    }
}

#[async_trait]
impl SyncStateStore for SqliteStore {
    #[instrument(skip(self))]
    async fn save_checkpoint(
        &self,
        block_num: BlockNumber,
        block_hash: Digest,
        mode: FetchMode,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r"
            INSERT INTO sync_state (id, last_indexed_block, last_indexed_block_hash, last_indexed_timestamp, mode)
            VALUES (0, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                last_indexed_block = excluded.last_indexed_block,
                last_indexed_block_hash = excluded.last_indexed_block_hash,
                last_indexed_timestamp = excluded.last_indexed_timestamp,
                mode = excluded.mode
            ",
        )
        .bind(block_num.get() as i64)
        .bind(block_hash.as_bytes().as_slice())
        .bind(now)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_mode(&self, mode: FetchMode) -> Result<()> {
        sqlx::query("UPDATE sync_state SET mode = ? WHERE id = 0")
            .bind(mode.as_str())
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset(&self, start_block: BlockNumber) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r"
            INSERT INTO sync_state (id, last_indexed_block, last_indexed_block_hash, last_indexed_timestamp, mode)
            VALUES (0, ?, ?, ?, 'backfill')
            ON CONFLICT (id) DO UPDATE SET
                last_indexed_block = excluded.last_indexed_block,
                last_indexed_block_hash = excluded.last_indexed_block_hash,
                last_indexed_timestamp = excluded.last_indexed_timestamp
            ",
        )
        .bind(start_block.get() as i64)
        .bind(crate::types::Digest::ZERO.as_bytes().as_slice())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_last_indexed_block(&self) -> Result<Option<BlockNumber>> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT last_indexed_block FROM sync_state WHERE id = 0")
                .fetch_optional(&self.pool)
                .await
                .map_err(InfraError::Database)?;
        Ok(row.map(|v| BlockNumber::new(v as u64)))
    }

    #[instrument(skip(self))]
    async fn get_state(&self) -> Result<Option<SyncState>> {
        let row: Option<SyncStateRow> = sqlx::query_as(
            "SELECT last_indexed_block, last_indexed_block_hash, last_indexed_timestamp, mode FROM sync_state WHERE id = 0",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        row.map(SyncStateRow::into_sync_state).transpose()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> EthAddress {
        EthAddress::new([n; 20])
    }

    fn digest(n: u8) -> Digest {
        Digest::new([n; 32])
    }

    async fn store() -> SqliteStore {
        SqliteStore::connect_in_memory().await.expect("connect")
    }

    #[tokio::test]
    async fn sqlite_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteStore>();
    }

    #[tokio::test]
    async fn upsert_fingerprints_then_read_back() {
        let s = store().await;
        let fp = BlockFingerprint::new(BlockNumber::new(10), digest(1), digest(0));
        s.upsert_fingerprints(&[fp]).await.unwrap();
        let got = s.fingerprint_at(BlockNumber::new(10)).await.unwrap();
        assert_eq!(got, Some(fp));
    }

    #[tokio::test]
    async fn fingerprints_after_orders_ascending() {
        let s = store().await;
        let fps = [
            BlockFingerprint::new(BlockNumber::new(3), digest(3), digest(2)),
            BlockFingerprint::new(BlockNumber::new(1), digest(1), digest(0)),
            BlockFingerprint::new(BlockNumber::new(2), digest(2), digest(1)),
        ];
        s.upsert_fingerprints(&fps).await.unwrap();
        let got = s.fingerprints_after(BlockNumber::ZERO).await.unwrap();
        let numbers: Vec<u64> = got.iter().map(|f| f.block_number.get()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn prune_finalized_removes_at_or_below() {
        let s = store().await;
        let fps = [
            BlockFingerprint::new(BlockNumber::new(1), digest(1), digest(0)),
            BlockFingerprint::new(BlockNumber::new(2), digest(2), digest(1)),
            BlockFingerprint::new(BlockNumber::new(3), digest(3), digest(2)),
        ];
        s.upsert_fingerprints(&fps).await.unwrap();
        let pruned = s.prune_finalized(BlockNumber::new(2)).await.unwrap();
        assert_eq!(pruned, 2);
        assert!(s.fingerprint_at(BlockNumber::new(1)).await.unwrap().is_none());
        assert!(s.fingerprint_at(BlockNumber::new(3)).await.unwrap().is_some());
    }

    fn sample_log(block: u64, log_index: u32, topic0: Digest) -> RawLog {
        RawLog {
            address: addr(1),
            block_number: BlockNumber::new(block),
            block_hash: digest(block as u8),
            tx_hash: digest(99),
            tx_index: 0,
            log_index,
            topics: vec![topic0],
            data: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn store_logs_is_idempotent() {
        let s = store().await;
        let log = sample_log(10, 0, digest(7));
        let addrs = [addr(1)];
        let topics = [(addr(1), vec![digest(7)])];

        s.store_logs(&addrs, &topics, &[log.clone()], BlockNumber::new(10), BlockNumber::new(10))
            .await
            .unwrap();
        s.store_logs(&addrs, &topics, &[log], BlockNumber::new(10), BlockNumber::new(10))
            .await
            .unwrap();

        let (logs, coverage) = s
            .get_logs(addr(1), BlockNumber::new(10), BlockNumber::new(10))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(coverage.len(), 1);
    }

    #[tokio::test]
    async fn store_logs_with_empty_logs_still_records_coverage() {
        let s = store().await;
        let addrs = [addr(2)];
        s.store_logs(&addrs, &[], &[], BlockNumber::new(0), BlockNumber::new(50))
            .await
            .unwrap();
        let (logs, coverage) = s
            .get_logs(addr(2), BlockNumber::new(0), BlockNumber::new(50))
            .await
            .unwrap();
        assert!(logs.is_empty());
        assert_eq!(coverage.len(), 1);
    }

    #[tokio::test]
    async fn get_unsynced_topics_empty_when_continuous() {
        let s = store().await;
        let topics = [(addr(3), vec![digest(9)])];
        s.store_logs(&[addr(3)], &topics, &[], BlockNumber::new(0), BlockNumber::new(50))
            .await
            .unwrap();
        s.store_logs(&[addr(3)], &topics, &[], BlockNumber::new(51), BlockNumber::new(100))
            .await
            .unwrap();

        let unsynced = s
            .get_unsynced_topics(&topics, BlockNumber::new(100))
            .await
            .unwrap();
        assert!(unsynced.is_empty());
    }

    #[tokio::test]
    async fn handle_reorg_truncates_spanning_range() {
        let s = store().await;
        let topics = [(addr(4), vec![digest(5)])];
        s.store_logs(&[addr(4)], &topics, &[], BlockNumber::new(0), BlockNumber::new(100))
            .await
            .unwrap();
        s.store_logs(&[addr(4)], &topics, &[], BlockNumber::new(101), BlockNumber::new(200))
            .await
            .unwrap();

        s.handle_reorg(BlockNumber::new(150)).await.unwrap();

        let unsynced = s
            .get_unsynced_topics(&topics, BlockNumber::new(200))
            .await
            .unwrap();
        assert_eq!(unsynced, vec![(addr(4), digest(5))]);
    }

    #[tokio::test]
    async fn handle_reorg_zero_wipes_everything() {
        let s = store().await;
        let log = sample_log(5, 0, digest(1));
        s.store_logs(
            &[addr(1)],
            &[(addr(1), vec![digest(1)])],
            &[log],
            BlockNumber::new(0),
            BlockNumber::new(10),
        )
        .await
        .unwrap();

        s.handle_reorg(BlockNumber::ZERO).await.unwrap();

        let (logs, coverage) = s
            .get_logs(addr(1), BlockNumber::new(0), BlockNumber::new(10))
            .await
            .unwrap();
        assert!(logs.is_empty());
        assert!(coverage.is_empty());
    }

    #[tokio::test]
    async fn retention_sweep_disabled_by_default() {
        let s = store().await;
        let log = sample_log(0, 0, digest(3));
        s.store_logs(
            &[addr(1)],
            &[(addr(1), vec![digest(3)])],
            &[log],
            BlockNumber::new(0),
            BlockNumber::new(5000),
        )
        .await
        .unwrap();
        let (logs, _) = s
            .get_logs(addr(1), BlockNumber::new(0), BlockNumber::new(5000))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1, "no retention cap configured, nothing should be pruned");
    }

    #[tokio::test]
    async fn store_logs_triggers_age_based_retention_sweep() {
        let s = store().await.with_retention_config(RetentionConfig {
            max_blocks: 5,
            ..RetentionConfig::default()
        });
        let log = sample_log(0, 0, digest(1));
        s.store_logs(
            &[addr(1)],
            &[(addr(1), vec![digest(1)])],
            &[log],
            BlockNumber::new(0),
            BlockNumber::new(20),
        )
        .await
        .unwrap();

        // Span is 21 blocks, over the cap of 5, so the oldest blocks
        // (including block 0's log) are swept after the commit.
        let (logs, _) = s
            .get_logs(addr(1), BlockNumber::new(0), BlockNumber::new(20))
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn store_logs_triggers_size_based_retention_sweep() {
        let s = store().await.with_retention_config(RetentionConfig {
            max_db_size_mb: 1,
            ..RetentionConfig::default()
        });

        let logs: Vec<RawLog> = (0u64..200)
            .map(|b| RawLog {
                data: vec![0u8; 10_000],
                ..sample_log(b, 0, digest(9))
            })
            .collect();

        s.store_logs(
            &[addr(1)],
            &[(addr(1), vec![digest(9)])],
            &logs,
            BlockNumber::new(0),
            BlockNumber::new(199),
        )
        .await
        .unwrap();

        let (remaining, _) = s
            .get_logs(addr(1), BlockNumber::new(0), BlockNumber::new(199))
            .await
            .unwrap();
        assert!(
            remaining.len() < 200,
            "2MB of log data against a 1MB cap should trigger pruning of the oldest blocks"
        );
        assert!(remaining.iter().all(|l| l.block_number.get() > 0));
    }

    #[tokio::test]
    async fn sync_state_round_trips() {
        let s = store().await;
        assert!(s.get_state().await.unwrap().is_none());

        s.save_checkpoint(BlockNumber::new(42), digest(8), FetchMode::Backfill)
            .await
            .unwrap();
        let state = s.get_state().await.unwrap().unwrap();
        assert_eq!(state.last_indexed_block, BlockNumber::new(42));
        assert_eq!(state.mode, FetchMode::Backfill);

        s.set_mode(FetchMode::Live).await.unwrap();
        assert_eq!(s.get_state().await.unwrap().unwrap().mode, FetchMode::Live);

        s.reset(BlockNumber::new(0)).await.unwrap();
        assert_eq!(
            s.get_last_indexed_block().await.unwrap(),
            Some(BlockNumber::ZERO)
        );
    }
}
