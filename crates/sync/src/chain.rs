//! Abstraction over the JSON-RPC node so the fetcher can be driven by a
//! hand-built fake in tests instead of a live chain.
//!
//! Grounded in `chainindex-evm::fetcher::EvmRpcClient` (a trait separating
//! "what RPC calls does the fetcher need" from "how are they made"), adapted
//! to return `alloy` types directly rather than hand-parsed JSON, since our
//! stack already depends on `alloy` for that.

use std::future::Future;

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};

/// The minimal block header shape the engine needs: number, hash, timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// The RPC surface the synchronizer depends on (§6: `eth_getLogs`,
/// `eth_getBlockByNumber`).
pub trait ChainClient: Send + Sync {
    fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> impl Future<Output = anyhow::Result<Vec<Log>>> + Send;

    fn get_block_header(
        &self,
        number: u64,
    ) -> impl Future<Output = anyhow::Result<Option<BlockHeader>>> + Send;

    fn get_latest_block_header(
        &self,
    ) -> impl Future<Output = anyhow::Result<BlockHeader>> + Send;
}

/// The production `ChainClient`, backed by an `alloy` HTTP provider.
pub struct HttpChainClient<P> {
    provider: P,
}

impl HttpChainClient<alloy::providers::RootProvider> {
    pub fn connect(jsonrpc_url: &str) -> anyhow::Result<Self> {
        let provider = ProviderBuilder::new().connect_http(jsonrpc_url.parse()?);
        Ok(Self { provider })
    }
}

impl<P: Provider> HttpChainClient<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: Provider + Send + Sync> ChainClient for HttpChainClient<P> {
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> anyhow::Result<Vec<Log>> {
        let mut filter = Filter::new().from_block(from).to_block(to);
        if !addresses.is_empty() {
            filter = filter.address(addresses.to_vec());
        }
        Ok(self.provider.get_logs(&filter).await?)
    }

    async fn get_block_header(&self, number: u64) -> anyhow::Result<Option<BlockHeader>> {
        let block = self.provider.get_block_by_number(number.into()).await?;
        Ok(block.map(|b| BlockHeader {
            number: b.header.number,
            hash: b.header.hash,
            timestamp: b.header.timestamp,
        }))
    }

    async fn get_latest_block_header(&self) -> anyhow::Result<BlockHeader> {
        let block = self
            .provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow::anyhow!("node returned no latest block"))?;
        Ok(BlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        })
    }
}
