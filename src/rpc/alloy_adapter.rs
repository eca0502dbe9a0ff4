//! `alloy`-backed implementation of [`RpcAdapter`].
//!
//! Uses `Provider::get_block_number`/`get_logs`/`get_block_by_number`,
//! with concurrent per-filter fetch via `futures::future::join_all`
//! and timeout/error classification mapped onto the `RpcAdapter`
//! port's header/log/batch shape.

use alloy::eips::BlockNumberOrTag;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::error::{InfraError, Result};
use crate::ports::{BlockTag, Header, LogFilter, RpcAdapter};
use crate::types::{BlockNumber, Digest, RawLog};

/// Suggested maximum batch size for `batch_headers`.
const DEFAULT_MAX_BATCH_SIZE: usize = 100;

fn log_filter_to_alloy(filter: &LogFilter) -> Filter {
    let mut f = Filter::new()
        .from_block(filter.from_block.get())
        .to_block(filter.to_block.get());

    if !filter.addresses.is_empty() {
        let addresses: Vec<_> = filter.addresses.iter().map(|a| (*a).into()).collect();
        f = f.address(addresses);
    }

    for (slot, topics) in filter.topics.iter().enumerate().take(4) {
        if topics.is_empty() {
            continue;
        }
        let values: Vec<alloy::primitives::B256> = topics.iter().map(|t| (*t).into()).collect();
        f = match slot {
            0 => f.event_signature(values),
            1 => f.topic1(values),
            2 => f.topic2(values),
            3 => f.topic3(values),
            _ => unreachable!("take(4) bounds slot"),
        };
    }

    f
}

fn alloy_log_to_raw(log: &alloy::rpc::types::Log) -> Result<RawLog> {
    let block_number = log
        .block_number
        .ok_or_else(|| InfraError::EventDecoding("log missing block_number".into()))?;
    let block_hash = log
        .block_hash
        .ok_or_else(|| InfraError::EventDecoding("log missing block_hash".into()))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| InfraError::EventDecoding("log missing transaction_hash".into()))?;
    let tx_index = log
        .transaction_index
        .ok_or_else(|| InfraError::EventDecoding("log missing transaction_index".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| InfraError::EventDecoding("log missing log_index".into()))?;

    let topics = log.topics().iter().map(|t| Digest::from(*t)).collect();

    Ok(RawLog {
        address: log.address().into(),
        block_number: BlockNumber::new(block_number),
        block_hash: block_hash.into(),
        tx_hash: tx_hash.into(),
        #[allow(clippy::cast_possible_truncation)]
        tx_index: tx_index as u32,
        #[allow(clippy::cast_possible_truncation)]
        log_index: log_index as u32,
        topics,
        data: log.data().data.to_vec(),
    })
}

/// `RpcAdapter` implementation backed by an `alloy` `Provider`.
///
/// Generic over the concrete provider type so callers can plug in
/// HTTP, WebSocket, or a test double interchangeably.
#[derive(Debug, Clone)]
pub struct AlloyRpcAdapter<P> {
    provider: P,
    max_batch_size: usize,
}

impl<P> AlloyRpcAdapter<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    /// Wrap an existing provider.
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Override the batch chunk size used by `batch_headers`.
    #[must_use]
    pub const fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    fn map_rpc_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> InfraError {
        let message = err.to_string();
        if message.to_lowercase().contains("timeout") {
            InfraError::Timeout(message)
        } else {
            InfraError::Rpc(Box::new(err))
        }
    }
}

#[async_trait::async_trait]
impl<P> RpcAdapter for AlloyRpcAdapter<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn header_by_number(&self, number: BlockNumber) -> Result<Header> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number.get()))
            .await
            .map_err(Self::map_rpc_error)?
            .ok_or_else(|| InfraError::NotFound)?;

        Ok(Header {
            number: BlockNumber::new(block.header.number),
            hash: block.header.hash.into(),
            parent_hash: block.header.parent_hash.into(),
        })
    }

    #[instrument(skip(self))]
    async fn header_by_tag(&self, tag: BlockTag) -> Result<Header> {
        let alloy_tag = match tag {
            BlockTag::Latest => BlockNumberOrTag::Latest,
            BlockTag::Safe => BlockNumberOrTag::Safe,
            BlockTag::Finalized => BlockNumberOrTag::Finalized,
        };

        let block = self
            .provider
            .get_block_by_number(alloy_tag)
            .await
            .map_err(Self::map_rpc_error)?
            .ok_or_else(|| InfraError::NotFound)?;

        Ok(Header {
            number: BlockNumber::new(block.header.number),
            hash: block.header.hash.into(),
            parent_hash: block.header.parent_hash.into(),
        })
    }

    #[instrument(skip(self, filter), fields(from = filter.from_block.get(), to = filter.to_block.get()))]
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let alloy_filter = log_filter_to_alloy(filter);

        let logs = self
            .provider
            .get_logs(&alloy_filter)
            .await
            .map_err(Self::map_rpc_error)?;

        let mut raw_logs: Vec<RawLog> = logs
            .iter()
            .map(alloy_log_to_raw)
            .collect::<Result<Vec<_>>>()?;

        raw_logs.sort_by_key(RawLog::key);
        Ok(raw_logs)
    }

    #[instrument(skip(self, filters), fields(n_filters = filters.len()))]
    async fn batch_get_logs(&self, filters: &[LogFilter]) -> Result<Vec<Vec<RawLog>>> {
        let futures: Vec<_> = filters.iter().map(|f| self.get_logs(f)).collect();
        let results = join_all(futures).await;

        let mut out = Vec::with_capacity(results.len());
        for result in results {
            out.push(result?);
        }
        Ok(out)
    }

    #[instrument(skip(self, numbers), fields(n = numbers.len()))]
    async fn batch_headers(&self, numbers: &[BlockNumber]) -> Result<Vec<Header>> {
        let mut headers = Vec::with_capacity(numbers.len());

        for chunk in numbers.chunks(self.max_batch_size) {
            debug!(chunk_size = chunk.len(), "fetching header chunk");
            let futures: Vec<_> = chunk.iter().map(|n| self.header_by_number(*n)).collect();
            let results = join_all(futures).await;
            for result in results {
                headers.push(result?);
            }
        }

        Ok(headers)
    }
}

/// Connect an HTTP-transport `alloy` provider for `rpc_url` and wrap it
/// in an [`AlloyRpcAdapter`].
///
/// # Errors
/// Returns `InfraError::Rpc` if `rpc_url` cannot be parsed.
pub fn connect_http(rpc_url: &str) -> Result<AlloyRpcAdapter<impl Provider + Clone + Send + Sync + 'static>> {
    let url: url::Url = rpc_url
        .parse()
        .map_err(|e: url::ParseError| InfraError::Rpc(Box::new(e)))?;
    let provider = ProviderBuilder::new().on_http(url);
    Ok(AlloyRpcAdapter::new(provider))
}
