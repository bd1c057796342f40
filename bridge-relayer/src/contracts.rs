//! Root-chain and child-chain contract bindings, and the calls the relayer makes on them.
#![allow(missing_docs)]
#![allow(clippy::too_many_arguments)]

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use async_trait::async_trait;
use bridge_core::checkpoint::HeaderBlock;
use log::info;
use snafu::{ResultExt, Snafu};

use crate::chain::ProviderInstance;

sol! {
    #[sol(rpc)]
    interface RootChain {
        event NewHeaderBlock(
            address indexed proposer,
            uint256 indexed headerBlockId,
            uint256 indexed reward,
            uint256 start,
            uint256 end,
            bytes32 root
        );

        function currentHeaderBlock() external view returns (uint256 id);
        function headerBlocks(uint256 headerBlockId) external view returns (
            bytes32 root,
            uint256 start,
            uint256 end,
            uint256 createdAt,
            address proposer
        );
        function getLastChildBlock() external view returns (uint256 lastChildBlock);
        function submitHeaderBlock(bytes calldata vote, bytes calldata sigs, bytes calldata txData) external;
    }
}

sol! {
    #[sol(rpc)]
    interface StakingInfo {
        event Staked(
            address indexed signer,
            uint256 indexed validatorId,
            uint256 nonce,
            uint256 indexed activationEpoch,
            uint256 amount,
            uint256 total,
            bytes signerPubkey
        );
        event UnstakeInit(
            address indexed user,
            uint256 indexed validatorId,
            uint256 nonce,
            uint256 deactivationEpoch,
            uint256 indexed amount
        );
        event StakeUpdate(uint256 indexed validatorId, uint256 indexed nonce, uint256 indexed newAmount);
        event SignerChange(
            uint256 indexed validatorId,
            uint256 nonce,
            address indexed oldSigner,
            address indexed newSigner,
            bytes signerPubkey
        );
        event TopUpFee(address indexed user, uint256 indexed fee);
    }
}

sol! {
    #[sol(rpc)]
    interface StateSender {
        event StateSynced(uint256 indexed id, address indexed contractAddress, bytes data);
    }
}

sol! {
    #[sol(rpc)]
    interface StateReceiver {
        function proposeState(uint256 stateId) external;
    }
}

/// Errors raised by contract calls.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A view call failed.
    #[snafu(display("Contract call {method} failed: {source}"))]
    Call {
        /// Method being called.
        method: &'static str,
        /// Underlying contract error.
        source: alloy::contract::Error,
    },

    /// A transaction could not be sent.
    #[snafu(display("Failed to send {method} transaction: {source}"))]
    Send {
        /// Method being sent.
        method: &'static str,
        /// Underlying contract error.
        source: alloy::contract::Error,
    },

    /// A uint256 result does not fit in 64 bits.
    #[snafu(display("Value returned by {method} overflows u64: {value}"))]
    Overflow {
        /// Method that returned the value.
        method: &'static str,
        /// The returned value.
        value: U256,
    },
}

/// Result alias for contract calls.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Narrows a uint256 contract value to `u64`.
pub fn to_u64(method: &'static str, value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Overflow { method, value })
}

/// Calls on the root-chain checkpoint contract.
#[async_trait]
pub trait RootChainCaller: Send + Sync {
    /// The next header block id.
    async fn current_header_block(&self) -> Result<u64>;

    /// A committed header block.
    async fn header_block(&self, id: u64) -> Result<HeaderBlock>;

    /// The last child block covered by a committed checkpoint.
    async fn last_child_block(&self) -> Result<u64>;

    /// Commits a consensus-approved checkpoint.
    async fn submit_header_block(&self, vote: Bytes, sigs: Bytes, tx_data: Bytes) -> Result<B256>;
}

/// Calls on child-chain contracts.
#[async_trait]
pub trait ChildChainCaller: Send + Sync {
    /// Submits `proposeState(id)` to the state receiver.
    async fn propose_state(&self, id: u64) -> Result<B256>;
}

/// The root-chain checkpoint contract behind an alloy provider.
pub struct RootChainContract {
    provider: Arc<ProviderInstance>,
    address: Address,
}

impl RootChainContract {
    /// Binds the contract at `address`.
    pub fn new(provider: Arc<ProviderInstance>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl RootChainCaller for RootChainContract {
    async fn current_header_block(&self) -> Result<u64> {
        let contract = RootChain::new(self.address, self.provider.clone());
        let result = contract
            .currentHeaderBlock()
            .call()
            .await
            .context(CallSnafu {
                method: "currentHeaderBlock",
            })?;
        to_u64("currentHeaderBlock", result.id)
    }

    async fn header_block(&self, id: u64) -> Result<HeaderBlock> {
        let contract = RootChain::new(self.address, self.provider.clone());
        let result = contract
            .headerBlocks(U256::from(id))
            .call()
            .await
            .context(CallSnafu {
                method: "headerBlocks",
            })?;
        Ok(HeaderBlock {
            root: result.root,
            start: to_u64("headerBlocks", result.start)?,
            end: to_u64("headerBlocks", result.end)?,
            created_at: to_u64("headerBlocks", result.createdAt)?,
            proposer: result.proposer,
        })
    }

    async fn last_child_block(&self) -> Result<u64> {
        let contract = RootChain::new(self.address, self.provider.clone());
        let result = contract
            .getLastChildBlock()
            .call()
            .await
            .context(CallSnafu {
                method: "getLastChildBlock",
            })?;
        to_u64("getLastChildBlock", result.lastChildBlock)
    }

    async fn submit_header_block(&self, vote: Bytes, sigs: Bytes, tx_data: Bytes) -> Result<B256> {
        let contract = RootChain::new(self.address, self.provider.clone());
        let tx = contract
            .submitHeaderBlock(vote, sigs, tx_data)
            .send()
            .await
            .context(SendSnafu {
                method: "submitHeaderBlock",
            })?;
        info!("📡 submitHeaderBlock tx sent: {}", tx.tx_hash());
        Ok(*tx.tx_hash())
    }
}

/// The child-chain state receiver behind an alloy provider.
pub struct StateReceiverContract {
    provider: Arc<ProviderInstance>,
    address: Address,
}

impl StateReceiverContract {
    /// Binds the contract at `address`.
    pub fn new(provider: Arc<ProviderInstance>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl ChildChainCaller for StateReceiverContract {
    async fn propose_state(&self, id: u64) -> Result<B256> {
        let contract = StateReceiver::new(self.address, self.provider.clone());
        let tx = contract
            .proposeState(U256::from(id))
            .send()
            .await
            .context(SendSnafu {
                method: "proposeState",
            })?;
        info!("📡 proposeState({id}) tx sent: {}", tx.tx_hash());
        Ok(*tx.tx_hash())
    }
}
