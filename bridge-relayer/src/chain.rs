//! # Chain Client Adapter
//!
//! [`ChainClient`] is what the listeners and processors need from an EVM chain: new heads,
//! headers by number and logs by filter. [`AlloyChainClient`] implements it over an
//! HTTP alloy provider that also carries the validator's wallet, so the same provider
//! backs the contract calls in [`crate::contracts`].

use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U64};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::transports::http::reqwest::Url;
use alloy::transports::TransportError;
use async_trait::async_trait;
use bridge_core::event::{ChainHeader, ContractLog};
use futures::Stream;
use log::info;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::signer::BridgeSigner;

/// Provider instance type for EVM transactions.
/// This handles gas estimation, nonce management, and wallet signing.
pub type ProviderInstance = alloy::providers::fillers::FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::fillers::JoinFill<
            alloy::providers::Identity,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::GasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::BlobGasFiller,
                    alloy::providers::fillers::JoinFill<
                        alloy::providers::fillers::NonceFiller,
                        alloy::providers::fillers::ChainIdFiller,
                    >,
                >,
            >,
        >,
        alloy::providers::fillers::WalletFiller<EthereumWallet>,
    >,
    alloy::providers::RootProvider,
    alloy::network::Ethereum,
>;

/// Errors raised by chain clients.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The endpoint URL is malformed.
    #[snafu(display("Failed to parse URL '{url}': {source}"))]
    UrlParse {
        /// The rejected URL.
        url: String,
        /// Underlying parse error.
        source: url::ParseError,
    },

    /// The client cannot push new heads; poll instead.
    #[snafu(display("Header subscriptions are not supported by this client"))]
    SubscriptionUnsupported,

    /// A JSON-RPC request failed.
    #[snafu(display("RPC call {method} failed: {source}"))]
    Rpc {
        /// RPC method.
        method: &'static str,
        /// Underlying transport error.
        source: TransportError,
    },

    /// The node returned a log without its position in the chain.
    #[snafu(display("Log from {address} is missing its {field}"))]
    IncompleteLog {
        /// Emitting contract.
        address: Address,
        /// The missing field.
        field: &'static str,
    },

    /// The node has no block for a tag that must exist.
    #[snafu(display("Node returned no block for {block}"))]
    MissingBlock {
        /// The requested block.
        block: String,
    },
}

/// Result alias for chain client calls.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A stream of new heads.
pub type HeaderStream = Pin<Box<dyn Stream<Item = Result<ChainHeader>> + Send>>;

/// Access to one EVM chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The chain's id.
    fn chain_id(&self) -> u64;

    /// Pushes new heads as they arrive.
    ///
    /// Returns [`Error::SubscriptionUnsupported`] when the transport cannot push.
    async fn subscribe_new_heads(&self) -> Result<HeaderStream>;

    /// The current head.
    async fn latest_header(&self) -> Result<ChainHeader>;

    /// The header at `number`, `None` if the chain has not reached it.
    async fn header_by_number(&self, number: u64) -> Result<Option<ChainHeader>>;

    /// Logs emitted by `addresses` in `[from, to]`.
    async fn filter_logs(&self, addresses: &[Address], from: u64, to: u64)
        -> Result<Vec<ContractLog>>;
}

/// The header fields read from `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcHeader {
    number: U64,
    hash: B256,
    timestamp: U64,
    transactions_root: B256,
    receipts_root: B256,
}

impl RpcHeader {
    fn into_header(self, chain_id: u64) -> ChainHeader {
        ChainHeader {
            chain_id,
            number: self.number.to(),
            hash: self.hash,
            timestamp: self.timestamp.to(),
            transactions_root: self.transactions_root,
            receipts_root: self.receipts_root,
        }
    }
}

/// A [`ChainClient`] over an alloy HTTP provider.
pub struct AlloyChainClient {
    provider: Arc<ProviderInstance>,
    chain_id: u64,
}

impl AlloyChainClient {
    /// Connects to `rpc_url`, signing with `signer`, and reads the chain id.
    pub async fn connect(rpc_url: &str, signer: &BridgeSigner) -> Result<Self> {
        let url = Url::from_str(rpc_url).context(UrlParseSnafu { url: rpc_url })?;
        let wallet = EthereumWallet::from(signer.wallet_signer());
        let provider: Arc<ProviderInstance> =
            Arc::new(ProviderBuilder::new().wallet(wallet).on_http(url));

        let chain_id = provider.get_chain_id().await.context(RpcSnafu {
            method: "eth_chainId",
        })?;
        info!("🔌 Connected to chain {chain_id} at {rpc_url}");

        Ok(Self { provider, chain_id })
    }

    /// The provider, for binding contracts.
    pub fn provider(&self) -> Arc<ProviderInstance> {
        self.provider.clone()
    }

    async fn header(&self, tag: BlockNumberOrTag) -> Result<Option<ChainHeader>> {
        let header: Option<RpcHeader> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), (tag, false))
            .await
            .context(RpcSnafu {
                method: "eth_getBlockByNumber",
            })?;
        Ok(header.map(|header| header.into_header(self.chain_id)))
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream> {
        Err(Error::SubscriptionUnsupported)
    }

    async fn latest_header(&self) -> Result<ChainHeader> {
        self.header(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| Error::MissingBlock {
                block: "latest".to_string(),
            })
    }

    async fn header_by_number(&self, number: u64) -> Result<Option<ChainHeader>> {
        self.header(BlockNumberOrTag::Number(number)).await
    }

    async fn filter_logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
    ) -> Result<Vec<ContractLog>> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(from)
            .to_block(to);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .context(RpcSnafu {
                method: "eth_getLogs",
            })?;

        logs.into_iter()
            .map(|log| {
                let address = log.inner.address;
                Ok(ContractLog {
                    event_name: String::new(),
                    address,
                    topics: log.inner.data.topics().to_vec(),
                    data: log.inner.data.data.clone(),
                    tx_hash: log.transaction_hash.ok_or(Error::IncompleteLog {
                        address,
                        field: "transaction hash",
                    })?,
                    log_index: log.log_index.ok_or(Error::IncompleteLog {
                        address,
                        field: "log index",
                    })?,
                    block_number: log.block_number.ok_or(Error::IncompleteLog {
                        address,
                        field: "block number",
                    })?,
                })
            })
            .collect()
    }
}

/// Fetches the headers `[start, end]` in order.
pub async fn headers_in_range<C: ChainClient + ?Sized>(
    client: &C,
    start: u64,
    end: u64,
) -> Result<Option<Vec<ChainHeader>>> {
    let mut headers = Vec::new();
    for number in start..=end {
        match client.header_by_number(number).await? {
            Some(header) => headers.push(header),
            None => return Ok(None),
        }
    }
    Ok(Some(headers))
}
