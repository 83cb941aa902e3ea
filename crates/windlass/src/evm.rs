use crate::config::RpcConfig;
use crate::errors::WindlassError;
use crate::retry::{try_endpoints_with_backoff, BackoffConfig};
use alloy::{
    eips::BlockId,
    primitives::{Address, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, Filter},
    sol,
    sol_types::SolEvent as _,
};
use eyre::Context as _;
use reqwest::Client;
use std::{str::FromStr as _, time::Duration};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type EvmProvider = RootProvider;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) returns (bool);
    }
}

sol! {
    #[sol(rpc)]
    contract IPositionToken {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        function balanceOf(address owner) external view returns (uint256);
        function ownerOf(uint256 tokenId) external view returns (address);
    }
}

/// Block number and timestamp, as read from a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub timestamp: u64,
}

/// The configured endpoint set for one chain.
#[derive(Debug, Clone)]
pub struct EvmNode {
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
}

/// A provider that answered a liveness probe on the expected chain.
/// One of these anchors a resolution pass; reads through it fail fast
/// rather than rotating endpoints mid-pass.
#[derive(Debug, Clone)]
pub struct NodeClient {
    provider: EvmProvider,
    pub chain_id: u64,
}

impl EvmNode {
    pub fn from_config(rpc: &RpcConfig) -> Self {
        Self {
            chain_id: rpc.chain_id,
            rpc_url: rpc.url.clone(),
            fallback_rpc_urls: rpc.fallback_urls.clone(),
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        if !self.rpc_url.trim().is_empty() {
            urls.push(self.rpc_url.trim().to_owned());
        }
        for u in &self.fallback_rpc_urls {
            let t = u.trim();
            if t.is_empty() {
                continue;
            }
            if urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        urls
    }

    /// Find an endpoint that answers on the expected chain, and snapshot its
    /// latest block. Every read in the pass is pinned to that snapshot's view.
    pub async fn connect(&self) -> eyre::Result<(NodeClient, BlockRef)> {
        let urls = self.all_rpc_urls();
        let cfg = BackoffConfig::default();
        let chain_id = self.chain_id;
        try_endpoints_with_backoff(
            &urls,
            &cfg,
            |u| {
                let u = u.clone();
                async move {
                    let provider = Self::provider_for_url(&u)?;
                    let got = provider.get_chain_id().await.context("get chain id")?;
                    if got != chain_id {
                        eyre::bail!("chain id mismatch on {u}: expected {chain_id}, got {got}");
                    }
                    let client = NodeClient { provider, chain_id };
                    let latest = client.latest_block().await?;
                    Ok((client, latest))
                }
            },
            "connect to rpc",
        )
        .await
        .map_err(|e| WindlassError::Rpc(format!("{e:#}")).into())
    }
}

impl NodeClient {
    pub fn provider(&self) -> &EvmProvider {
        &self.provider
    }

    pub async fn latest_block(&self) -> eyre::Result<BlockRef> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .context("get latest block")?
            .ok_or_else(|| eyre::eyre!("rpc returned no latest block"))?;
        Ok(BlockRef {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    pub async fn block_ref(&self, number: u64) -> eyre::Result<BlockRef> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .context("get block by number")?
            .ok_or_else(|| eyre::eyre!("block {number} not found"))?;
        Ok(BlockRef {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    /// True when the address held bytecode at the given block.
    pub async fn is_contract_at(&self, addr: Address, block_number: u64) -> eyre::Result<bool> {
        let code = self
            .provider
            .get_code_at(addr)
            .block_id(BlockId::number(block_number))
            .await
            .context("get code at block")?;
        Ok(!code.is_empty())
    }

    pub async fn erc20_balance_of(&self, token: Address, owner: Address) -> eyre::Result<U256> {
        let c = IERC20::new(token, &self.provider);
        let v = c.balanceOf(owner).call().await.context("erc20 balanceOf")?;
        Ok(v)
    }

    pub async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> eyre::Result<U256> {
        let c = IERC20::new(token, &self.provider);
        let v = c
            .allowance(owner, spender)
            .call()
            .await
            .context("erc20 allowance")?;
        Ok(v)
    }

    pub async fn erc20_decimals(&self, token: Address) -> eyre::Result<u8> {
        let c = IERC20::new(token, &self.provider);
        let v = c.decimals().call().await.context("erc20 decimals")?;
        Ok(v)
    }

    pub async fn erc20_symbol(&self, token: Address) -> String {
        let c = IERC20::new(token, &self.provider);
        c.symbol()
            .call()
            .await
            .unwrap_or_else(|_| "ERC20".to_owned())
    }

    pub async fn position_count(&self, nft: Address, owner: Address) -> eyre::Result<U256> {
        let c = IPositionToken::new(nft, &self.provider);
        let v = c.balanceOf(owner).call().await.context("nft balanceOf")?;
        Ok(v)
    }

    pub async fn position_owner(&self, nft: Address, token_id: U256) -> eyre::Result<Address> {
        let c = IPositionToken::new(nft, &self.provider);
        let v = c.ownerOf(token_id).call().await.context("nft ownerOf")?;
        Ok(v)
    }

    /// Token ids from `Transfer` logs delivered to `to` within the block
    /// range, inclusive on both ends. Duplicates are preserved; callers
    /// dedupe across chunks.
    pub async fn transfer_log_token_ids(
        &self,
        nft: Address,
        to: Address,
        from_block: u64,
        to_block: u64,
    ) -> eyre::Result<Vec<U256>> {
        let filter = Filter::new()
            .address(nft)
            .event_signature(IPositionToken::Transfer::SIGNATURE_HASH)
            .topic2(to.into_word())
            .from_block(from_block)
            .to_block(to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .context("get transfer logs")?;
        let mut ids = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(topic) = log.topics().get(3) {
                ids.push(U256::from_be_bytes(topic.0));
            }
        }
        Ok(ids)
    }
}

pub fn parse_address(s: &str) -> eyre::Result<Address> {
    Address::from_str(s)
        .map_err(|e| WindlassError::InvalidInput(format!("address '{s}': {e}")).into())
}

pub fn parse_tx_hash(s: &str) -> eyre::Result<B256> {
    let t = s.trim();
    B256::from_str(t)
        .map_err(|e| WindlassError::InvalidInput(format!("transaction hash '{t}': {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_list_trims_and_dedupes() {
        let node = EvmNode {
            chain_id: 1,
            rpc_url: "https://a.example".to_owned(),
            fallback_rpc_urls: vec![
                "https://a.example".to_owned(),
                " https://b.example ".to_owned(),
                String::new(),
                "https://b.example".to_owned(),
            ],
        };
        assert_eq!(
            node.all_rpc_urls(),
            vec!["https://a.example".to_owned(), "https://b.example".to_owned()]
        );
    }

    #[test]
    fn empty_primary_is_skipped() {
        let node = EvmNode {
            chain_id: 1,
            rpc_url: "  ".to_owned(),
            fallback_rpc_urls: vec!["https://b.example".to_owned()],
        };
        assert_eq!(node.all_rpc_urls(), vec!["https://b.example".to_owned()]);
    }

    #[test]
    fn address_parsing_rejects_garbage() {
        assert!(parse_address("0x889edC2eDab5f40e902b864aD4d7AdE8E412F9B1").is_ok());
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_address("0x1234").is_err());
    }
}
