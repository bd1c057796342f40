//! # Transaction Broadcaster
//!
//! Signs and submits the relayer's transactions. Consensus-chain messages are signed over
//! their canonical sign document with the validator key and sent with `mode: "async"`;
//! child-chain calls go through the state receiver contract.
//!
//! The signer's account sequence is cached. The cache is filled from the consensus chain
//! when empty, incremented after every accepted submission and dropped when the chain
//! reports a sequence mismatch. Failures are returned without retry.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use base64::Engine;
use bridge_core::msgs::{sign_bytes, BridgeMsg, StdFee, StdSignDoc, StdTx};
use bridge_core::staking::Account;
use log::{error, info, warn};
use snafu::{ResultExt, Snafu};
use tokio::sync::Mutex;

use crate::contracts::ChildChainCaller;
use crate::heimdall::HeimdallApi;
use crate::signer::BridgeSigner;

/// Errors raised while broadcasting.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The signer has no account on the consensus chain.
    #[snafu(display("No consensus-chain account for {address}"))]
    AccountNotFound {
        /// Signer address.
        address: Address,
    },

    /// Talking to the consensus chain failed.
    #[snafu(display("Consensus chain request failed: {source}"))]
    Heimdall {
        /// Underlying client error.
        source: crate::heimdall::Error,
    },

    /// The sign document could not be encoded.
    #[snafu(display("Failed to encode sign document: {source}"))]
    Encode {
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// Signing failed.
    #[snafu(display("Failed to sign transaction: {source}"))]
    Sign {
        /// Underlying signer error.
        source: crate::signer::Error,
    },

    /// The child-chain call failed.
    #[snafu(display("Child chain call failed: {source}"))]
    ChildChain {
        /// Underlying contract error.
        source: crate::contracts::Error,
    },

    /// Building and sending took longer than the transaction timeout.
    #[snafu(display("Timed out after {timeout:?} sending {what}"))]
    Timeout {
        /// What was being sent.
        what: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// Result alias for broadcasts.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the failure is worth retrying later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::Encode { .. } | Error::Sign { .. })
    }
}

/// A call on the child chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChainCall {
    /// `proposeState(id)` on the state receiver.
    ProposeState {
        /// State-sync record id.
        id: u64,
    },
}

/// Submission of signed transactions.
#[async_trait]
pub trait TxBroadcast: Send + Sync {
    /// The address transactions are sent from.
    fn address(&self) -> Address;

    /// Signs and submits `msg` to the consensus chain, returning the transaction hash.
    async fn broadcast_to_heimdall(&self, msg: BridgeMsg) -> Result<String>;

    /// Submits `call` to the child chain, returning the transaction hash.
    async fn broadcast_to_child_chain(&self, call: ChildChainCall) -> Result<B256>;
}

/// The production [`TxBroadcast`].
pub struct TxBroadcaster {
    heimdall: Arc<dyn HeimdallApi>,
    child_chain: Arc<dyn ChildChainCaller>,
    signer: BridgeSigner,
    chain_id: String,
    account: Arc<Mutex<Option<Account>>>,
    tx_timeout: Duration,
}

impl TxBroadcaster {
    /// Creates a broadcaster signing with `signer` for consensus chain `chain_id`.
    pub fn new(
        heimdall: Arc<dyn HeimdallApi>,
        child_chain: Arc<dyn ChildChainCaller>,
        signer: BridgeSigner,
        chain_id: impl Into<String>,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            heimdall,
            child_chain,
            signer,
            chain_id: chain_id.into(),
            account: Arc::new(Mutex::new(None)),
            tx_timeout,
        }
    }

    /// Returns the account to sign with and advances the cached sequence.
    async fn reserve_sequence(&self) -> Result<Account> {
        if let Some(account) = self.take_cached().await {
            return Ok(account);
        }

        let address = self.signer.address();
        let fetched = self
            .heimdall
            .account(address)
            .await
            .context(HeimdallSnafu)?
            .ok_or(Error::AccountNotFound { address })?;

        let mut cached = self.account.lock().await;
        let account = cached.unwrap_or(fetched);
        *cached = Some(Account {
            sequence: account.sequence + 1,
            ..account
        });
        Ok(account)
    }

    async fn take_cached(&self) -> Option<Account> {
        let mut cached = self.account.lock().await;
        let account = (*cached)?;
        *cached = Some(Account {
            sequence: account.sequence + 1,
            ..account
        });
        Some(account)
    }

    async fn invalidate_sequence(&self) {
        *self.account.lock().await = None;
    }

    fn sign(&self, msg: &BridgeMsg, account: &Account) -> Result<StdTx> {
        let doc = StdSignDoc {
            account_number: account.account_number,
            chain_id: &self.chain_id,
            fee: StdFee::default(),
            memo: "",
            msgs: vec![msg],
            sequence: account.sequence,
        };
        let bytes = sign_bytes(&doc).context(EncodeSnafu)?;
        let signature = self
            .signer
            .sign_digest(&keccak256(&bytes))
            .context(SignSnafu)?;

        Ok(StdTx {
            msg: msg.clone(),
            signature: base64::engine::general_purpose::STANDARD.encode(signature),
            memo: String::new(),
        })
    }

    async fn send_to_heimdall(&self, msg: &BridgeMsg) -> Result<String> {
        let account = self.reserve_sequence().await?;
        let tx = self.sign(msg, &account)?;

        match self.heimdall.broadcast_tx(&tx).await {
            Ok(result) => Ok(result.tx_hash),
            Err(e) => {
                if e.is_sequence_mismatch() {
                    warn!(
                        "⚠️ Sequence {} rejected for {}; refreshing account",
                        account.sequence,
                        msg.name()
                    );
                }
                // Any failure leaves the cached sequence unreliable.
                self.invalidate_sequence().await;
                Err(Error::Heimdall { source: e })
            }
        }
    }
}

#[async_trait]
impl TxBroadcast for TxBroadcaster {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn broadcast_to_heimdall(&self, msg: BridgeMsg) -> Result<String> {
        let name = msg.name();
        let result = tokio::time::timeout(self.tx_timeout, self.send_to_heimdall(&msg))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    what: name.to_string(),
                    timeout: self.tx_timeout,
                })
            });

        match &result {
            Ok(hash) => info!("📡 Broadcast {name} to heimdall: {hash}"),
            Err(e) => error!("❌ Failed to broadcast {name} to heimdall: {e}"),
        }
        result
    }

    async fn broadcast_to_child_chain(&self, call: ChildChainCall) -> Result<B256> {
        let ChildChainCall::ProposeState { id } = call;
        let what = format!("proposeState({id})");
        let result = match tokio::time::timeout(self.tx_timeout, self.child_chain.propose_state(id))
            .await
        {
            Ok(sent) => sent.context(ChildChainSnafu),
            Err(_) => Err(Error::Timeout {
                what: what.clone(),
                timeout: self.tx_timeout,
            }),
        };

        match &result {
            Ok(hash) => info!("📡 Sent {what} to child chain: {hash}"),
            Err(e) => error!("❌ Failed to send {what} to child chain: {e}"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use bridge_core::msgs::MsgCheckpointNoAck;

    use super::*;
    use crate::testing::{test_signer, MockChildChain, MockHeimdall};

    fn broadcaster(heimdall: Arc<MockHeimdall>) -> TxBroadcaster {
        TxBroadcaster::new(
            heimdall,
            Arc::new(MockChildChain::default()),
            test_signer(),
            "heimdall-15001",
            Duration::from_secs(5),
        )
    }

    fn no_ack(from: Address) -> BridgeMsg {
        BridgeMsg::CheckpointNoAck(MsgCheckpointNoAck { from })
    }

    #[tokio::test]
    async fn we_can_advance_the_cached_sequence() {
        let heimdall = Arc::new(MockHeimdall::default());
        let broadcaster = broadcaster(heimdall.clone());
        heimdall.set_account(Account {
            address: broadcaster.address(),
            account_number: 3,
            sequence: 10,
        });

        let from = broadcaster.address();
        broadcaster.broadcast_to_heimdall(no_ack(from)).await.unwrap();
        broadcaster.broadcast_to_heimdall(no_ack(from)).await.unwrap();

        assert_eq!(heimdall.account_queries(), 1);
        assert_eq!(heimdall.broadcasts().len(), 2);
        let cached = broadcaster.account.lock().await.unwrap();
        assert_eq!(cached.sequence, 12);
    }

    #[tokio::test]
    async fn a_rejected_sequence_is_refetched() {
        let heimdall = Arc::new(MockHeimdall::default());
        let broadcaster = broadcaster(heimdall.clone());
        heimdall.set_account(Account {
            address: broadcaster.address(),
            account_number: 3,
            sequence: 10,
        });
        heimdall.reject_next_broadcast(4, "invalid sequence");

        let from = broadcaster.address();
        assert!(broadcaster.broadcast_to_heimdall(no_ack(from)).await.is_err());
        broadcaster.broadcast_to_heimdall(no_ack(from)).await.unwrap();

        assert_eq!(heimdall.account_queries(), 2);
    }

    #[tokio::test]
    async fn we_can_propose_state_on_the_child_chain() {
        let child_chain = Arc::new(MockChildChain::default());
        let broadcaster = TxBroadcaster::new(
            Arc::new(MockHeimdall::default()),
            child_chain.clone(),
            test_signer(),
            "heimdall-15001",
            Duration::from_secs(5),
        );

        let hash = broadcaster
            .broadcast_to_child_chain(ChildChainCall::ProposeState { id: 42 })
            .await
            .unwrap();
        assert_eq!(hash, B256::left_padding_from(&42_u64.to_be_bytes()));
        assert_eq!(child_chain.proposed(), vec![42]);
    }

    #[tokio::test]
    async fn we_cannot_broadcast_without_an_account() {
        let heimdall = Arc::new(MockHeimdall::default());
        let broadcaster = broadcaster(heimdall);
        let from = broadcaster.address();
        assert!(matches!(
            broadcaster.broadcast_to_heimdall(no_ack(from)).await,
            Err(Error::AccountNotFound { .. })
        ));
    }
}
