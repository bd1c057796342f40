//! Root-chain log scanning.
//!
//! Each new head is turned into a confirmed window `[from, to]` that trails the head by the
//! configured confirmation depth. Logs of the checkpoint, staking-info and state-sender
//! contracts in that window are published to their domain queues, and `to` is persisted so the
//! next window starts after it.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use bridge_core::event::{ChainEvent, ChainHeader, ContractLog};
use bridge_core::queue::{Domain, SourceTag};
use log::{debug, info};

use super::{HeaderHandler, ListenerError};
use crate::context::BridgeContext;
use crate::contracts::{RootChain, StakingInfo, StateSender};
use crate::store::ProgressKey;

/// A root-chain event the relayer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WatchedEvent {
    address: Address,
    signature: B256,
    name: &'static str,
    domain: Domain,
}

/// Publishes root-chain contract logs.
pub struct RootChainHandler {
    ctx: Arc<BridgeContext>,
    watched: Vec<WatchedEvent>,
}

impl RootChainHandler {
    /// Watches the contracts configured in `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        let config = &ctx.config;
        let staking = |signature, name| WatchedEvent {
            address: config.staking_info_address,
            signature,
            name,
            domain: Domain::Staking,
        };
        let watched = vec![
            WatchedEvent {
                address: config.root_chain_address,
                signature: RootChain::NewHeaderBlock::SIGNATURE_HASH,
                name: "NewHeaderBlock",
                domain: Domain::Checkpoint,
            },
            WatchedEvent {
                address: config.state_sender_address,
                signature: StateSender::StateSynced::SIGNATURE_HASH,
                name: "StateSynced",
                domain: Domain::Clerk,
            },
            staking(StakingInfo::Staked::SIGNATURE_HASH, "Staked"),
            staking(StakingInfo::UnstakeInit::SIGNATURE_HASH, "UnstakeInit"),
            staking(StakingInfo::StakeUpdate::SIGNATURE_HASH, "StakeUpdate"),
            staking(StakingInfo::SignerChange::SIGNATURE_HASH, "SignerChange"),
            staking(StakingInfo::TopUpFee::SIGNATURE_HASH, "TopUpFee"),
        ];
        Self { ctx, watched }
    }

    fn classify(&self, log: &ContractLog) -> Option<&WatchedEvent> {
        let signature = log.topics.first()?;
        self.watched
            .iter()
            .find(|watched| watched.address == log.address && &watched.signature == signature)
    }

    fn contracts(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.watched.iter().map(|w| w.address).collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }
}

#[async_trait]
impl HeaderHandler for RootChainHandler {
    async fn process_header(&self, header: ChainHeader) -> Result<(), ListenerError> {
        let Some(to) = header
            .number
            .checked_sub(self.ctx.config.main_chain_confirmations)
        else {
            return Ok(());
        };
        let from = match self.ctx.store.last_block(ProgressKey::RootChainLastBlock)? {
            Some(last) => last + 1,
            None => to,
        };
        if from > to {
            return Ok(());
        }

        let logs = self
            .ctx
            .root_chain
            .filter_logs(&self.contracts(), from, to)
            .await?;

        let mut published = 0;
        for mut log in logs {
            let Some(watched) = self.classify(&log).copied() else {
                continue;
            };
            log.event_name = watched.name.to_string();
            debug!(
                "Root chain {} at block {} tx {}",
                watched.name, log.block_number, log.tx_hash
            );
            self.ctx.broker.publish_event(
                watched.domain,
                SourceTag::RootChain,
                watched.name,
                &ChainEvent::ContractLog(log),
            )?;
            published += 1;
        }

        self.ctx
            .store
            .set_last_block(ProgressKey::RootChainLastBlock, to)?;
        if published > 0 {
            info!("📡 Published {published} root chain events from blocks {from}-{to}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Bytes, U256};

    use super::*;
    use crate::testing::TestHarness;

    fn log(address: Address, topics: Vec<B256>, block_number: u64) -> ContractLog {
        ContractLog {
            event_name: String::new(),
            address,
            topics,
            data: Bytes::new(),
            tx_hash: B256::repeat_byte(block_number as u8),
            log_index: 0,
            block_number,
        }
    }

    #[tokio::test]
    async fn we_can_route_root_chain_logs_by_contract_and_event() {
        let harness = TestHarness::new();
        let config = &harness.ctx.config;
        harness.root_chain.push_log(log(
            config.state_sender_address,
            vec![StateSender::StateSynced::SIGNATURE_HASH, B256::from(U256::from(42))],
            94,
        ));
        harness.root_chain.push_log(log(
            config.root_chain_address,
            vec![RootChain::NewHeaderBlock::SIGNATURE_HASH],
            94,
        ));
        harness.root_chain.push_log(log(
            config.staking_info_address,
            vec![StakingInfo::TopUpFee::SIGNATURE_HASH],
            94,
        ));
        // Right event, wrong contract.
        harness.root_chain.push_log(log(
            config.staking_info_address,
            vec![StateSender::StateSynced::SIGNATURE_HASH],
            94,
        ));

        let handler = RootChainHandler::new(harness.ctx.clone());
        handler.process_header(harness.header(100)).await.unwrap();

        let broker = &harness.ctx.broker;
        assert_eq!(broker.pending(Domain::Clerk).unwrap(), 1);
        assert_eq!(broker.pending(Domain::Checkpoint).unwrap(), 1);
        assert_eq!(broker.pending(Domain::Staking).unwrap(), 1);
        assert_eq!(
            harness
                .ctx
                .store
                .last_block(ProgressKey::RootChainLastBlock)
                .unwrap(),
            Some(94)
        );
        assert_eq!(harness.root_chain.log_queries(), vec![(94, 94)]);
    }

    #[tokio::test]
    async fn we_can_resume_after_the_last_scanned_block() {
        let harness = TestHarness::new();
        harness
            .ctx
            .store
            .set_last_block(ProgressKey::RootChainLastBlock, 80)
            .unwrap();

        let handler = RootChainHandler::new(harness.ctx.clone());
        handler.process_header(harness.header(100)).await.unwrap();
        // Already scanned.
        handler.process_header(harness.header(90)).await.unwrap();
        // Not enough confirmations yet.
        handler.process_header(harness.header(3)).await.unwrap();

        assert_eq!(harness.root_chain.log_queries(), vec![(81, 94)]);
    }
}
