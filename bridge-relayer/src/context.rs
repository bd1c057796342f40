//! The application context shared by every listener and processor.

use std::sync::Arc;

use alloy::primitives::Address;
use log::{info, warn};
use snafu::{ResultExt, Snafu};

use crate::backoff::retry_with_backoff;
use crate::broadcaster::{TxBroadcast, TxBroadcaster};
use crate::broker::{Broker, SledQueueBackend};
use crate::chain::{AlloyChainClient, ChainClient};
use crate::config::BridgeConfig;
use crate::contracts::{RootChainCaller, RootChainContract, StateReceiverContract};
use crate::heimdall::{HeimdallApi, HeimdallClient};
use crate::signer::{self, BridgeSigner};
use crate::store::{self, BridgeStore};

/// Errors raised while assembling the context. All of them are fatal at startup.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The validator key could not be loaded.
    #[snafu(display("Failed to load signing key: {source}"))]
    SigningKey {
        /// Underlying signer error.
        source: signer::Error,
    },

    /// The bridge store could not be opened.
    #[snafu(display("Failed to open bridge store: {source}"))]
    Store {
        /// Underlying store error.
        source: store::Error,
    },

    /// The broker queues could not be declared.
    #[snafu(display("Failed to initialize queues: {source}"))]
    Broker {
        /// Underlying broker error.
        source: crate::broker::Error,
    },

    /// A chain endpoint could not be reached.
    #[snafu(display("Failed to connect to {chain}: {source}"))]
    Chain {
        /// Which chain.
        chain: &'static str,
        /// Underlying chain error.
        source: crate::chain::Error,
    },
}

/// Result alias for context construction.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything a component needs, constructed once and passed around by `Arc`.
pub struct BridgeContext {
    /// Runtime configuration.
    pub config: BridgeConfig,
    /// Local progress store. Flushed when the context is dropped.
    pub store: BridgeStore,
    /// The message broker.
    pub broker: Arc<Broker>,
    /// Consensus chain access.
    pub heimdall: Arc<dyn HeimdallApi>,
    /// Root chain access.
    pub root_chain: Arc<dyn ChainClient>,
    /// Child chain access.
    pub child_chain: Arc<dyn ChainClient>,
    /// The root-chain checkpoint contract.
    pub root_chain_contract: Arc<dyn RootChainCaller>,
    /// Transaction submission.
    pub broadcaster: Arc<dyn TxBroadcast>,
    /// Uncompressed public key of the validator.
    pub signer_public_key: Vec<u8>,
}

impl BridgeContext {
    /// Loads the key, opens the store, declares the queues and connects to every chain.
    pub async fn connect(config: BridgeConfig) -> Result<Arc<Self>> {
        let signer = signer::load_signing_key(&config.signing_key_path)
            .await
            .context(SigningKeySnafu)?;
        info!("🔑 Loaded signing key for {}", signer.address());

        let store = BridgeStore::open(config.common.bridge_db_path()).context(StoreSnafu)?;
        let broker = Broker::new(Arc::new(SledQueueBackend::new(store.db())));
        broker.initialize_queues().context(BrokerSnafu)?;

        let root_chain = retry_with_backoff("Connecting to the root chain", || {
            AlloyChainClient::connect(&config.root_chain_rpc_url, &signer)
        })
        .await
        .context(ChainSnafu {
            chain: "root chain",
        })?;
        let child_chain = retry_with_backoff("Connecting to the child chain", || {
            AlloyChainClient::connect(&config.child_chain_rpc_url, &signer)
        })
        .await
        .context(ChainSnafu {
            chain: "child chain",
        })?;
        info!(
            "🔌 Connected to root chain {} and child chain {}",
            root_chain.chain_id(),
            child_chain.chain_id()
        );
        if child_chain.chain_id().to_string() != config.common.bor_chain_id {
            warn!(
                "⚠️ Child chain reports id {} but --bor-chain-id is {}",
                child_chain.chain_id(),
                config.common.bor_chain_id
            );
        }

        let heimdall: Arc<dyn HeimdallApi> = Arc::new(HeimdallClient::new(
            &config.heimdall_rest_url,
            &config.tendermint_rpc_url,
        ));
        let root_chain_contract = Arc::new(RootChainContract::new(
            root_chain.provider(),
            config.root_chain_address,
        ));
        let state_receiver = Arc::new(StateReceiverContract::new(
            child_chain.provider(),
            config.state_receiver_address,
        ));
        let broadcaster = Arc::new(TxBroadcaster::new(
            heimdall.clone(),
            state_receiver,
            signer.clone(),
            &config.heimdall_chain_id,
            config.tx_timeout,
        ));

        Ok(Arc::new(Self {
            store,
            broker: Arc::new(broker),
            heimdall,
            root_chain: Arc::new(root_chain),
            child_chain: Arc::new(child_chain),
            root_chain_contract,
            broadcaster,
            signer_public_key: signer.public_key().to_vec(),
            config,
        }))
    }

    /// The validator's address.
    pub fn address(&self) -> Address {
        self.broadcaster.address()
    }

    /// Logs where the consensus chain stands and warns when its current span belongs to a
    /// different child chain. Returns whether the span matches, `None` when there is no span.
    pub async fn report_consensus_state(&self) -> Option<bool> {
        match self.heimdall.latest_checkpoint().await {
            Ok(Some(checkpoint)) => info!(
                "Latest consensus checkpoint covers {}-{}",
                checkpoint.start, checkpoint.end
            ),
            Ok(None) => info!("No checkpoint on the consensus chain yet"),
            Err(e) => warn!("⚠️ Could not read the latest checkpoint: {e}"),
        }

        let span = match self.heimdall.latest_span().await {
            Ok(span) => span?,
            Err(e) => {
                warn!("⚠️ Could not read the latest span: {e}");
                return None;
            }
        };
        let matches = span.bor_chain_id == self.config.common.bor_chain_id;
        if matches {
            info!(
                "Current span {} covers child blocks {}-{}",
                span.id, span.start_block, span.end_block
            );
        } else {
            warn!(
                "⚠️ Span {} is for child chain {} but --bor-chain-id is {}",
                span.id, span.bor_chain_id, self.config.common.bor_chain_id
            );
        }
        Some(matches)
    }

    /// Builds a context from already constructed parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config: BridgeConfig,
        store: BridgeStore,
        broker: Arc<Broker>,
        heimdall: Arc<dyn HeimdallApi>,
        root_chain: Arc<dyn ChainClient>,
        child_chain: Arc<dyn ChainClient>,
        root_chain_contract: Arc<dyn RootChainCaller>,
        broadcaster: Arc<dyn TxBroadcast>,
        signer: &BridgeSigner,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            broker,
            heimdall,
            root_chain,
            child_chain,
            root_chain_contract,
            broadcaster,
            signer_public_key: signer.public_key().to_vec(),
        })
    }
}
