use alloy::{
    eips::BlockNumberOrTag,
    network::AnyNetwork,
    primitives::{Address, Bytes},
    providers::{Provider, RootProvider},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::*;
use url::Url;

use crate::chain::{Block, ChainIdentity, redact};

/// Read access to a chain node.
///
/// Absence is not an error: a block that has not been produced yet is `Ok(None)` and an account without code is
/// `Ok` with empty bytes. `Err` is reserved for transport and RPC failures.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn current_height(&self) -> Result<u64>;

    /// The block at `height`, with full transaction bodies.
    async fn block(&self, height: u64) -> Result<Option<Block>>;

    async fn code(&self, address: Address) -> Result<Bytes>;
}

/// A [ChainProvider] backed by a JSON-RPC node over HTTP. The node may belong to any EVM network; transaction types
/// other than Ethereum's are decoded generically.
#[derive(Debug, Clone)]
pub struct RpcProvider {
    provider: RootProvider<AnyNetwork>,
}

impl RpcProvider {
    pub fn new(url: Url) -> Self {
        RpcProvider {
            provider: RootProvider::new_http(url),
        }
    }

    /// Tries each of `urls` in order and returns the first endpoint that answers with `chain_id`, along with the
    /// identity of the chain bound to that endpoint.
    pub async fn connect(
        name: &str,
        chain_id: u64,
        urls: &[String],
    ) -> Result<(ChainIdentity, RpcProvider)> {
        for url in urls {
            match Self::try_connect(name, chain_id, url).await {
                Ok(provider) => {
                    let chain = ChainIdentity::new(name, chain_id, url);
                    info!(chain = name, chain_id, "Connected to {}", chain.endpoint());
                    return Ok((chain, provider));
                }
                Err(e) => {
                    warn!(chain = name, chain_id, "Skipping endpoint {}: {e}", redact(url));
                }
            }
        }
        Err(anyhow!(
            "none of the {} endpoints of chain {name} could be used",
            urls.len()
        ))
    }

    async fn try_connect(name: &str, chain_id: u64, url: &str) -> Result<RpcProvider> {
        let provider = RpcProvider::new(Url::parse(url)?);
        let remote_chain_id = provider.provider.get_chain_id().await?;
        if remote_chain_id != chain_id {
            return Err(anyhow!(
                "Chain id mismatch - network {name} wanted chain id {chain_id} but got {remote_chain_id}"
            ));
        }
        Ok(provider)
    }
}

#[async_trait]
impl ChainProvider for RpcProvider {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block(&self, height: u64) -> Result<Option<Block>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .full()
            .await?;
        Ok(block.map(Block::from))
    }

    async fn code(&self, address: Address) -> Result<Bytes> {
        Ok(self.provider.get_code_at(address).await?)
    }
}
