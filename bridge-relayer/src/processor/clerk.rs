//! State-sync relay.
//!
//! `StateSynced` logs on the root chain become `MsgEventRecord` transactions on the consensus
//! chain. Once the consensus chain emits the matching `record` event, the record is proposed
//! to the child chain's state receiver.

use std::sync::Arc;

use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use bridge_core::clerk::{bounded_record_data, carries_event_record, record_sequence};
use bridge_core::event::{ContractLog, StringEvent};
use bridge_core::msgs::{BridgeMsg, MsgEventRecord};
use bridge_core::queue::Domain;
use log::{debug, info, warn};

use super::{decode_log, event_u64, DomainProcessor, ProcessError, Result};
use crate::broadcaster::ChildChainCall;
use crate::context::BridgeContext;
use crate::contracts::StateSender;
use crate::heimdall::OldTxModule;
use crate::listener::heimdall::EVENT_TYPE_RECORD;

/// Attribute carrying a record's id.
const ATTRIBUTE_RECORD_ID: &str = "record-id";

/// The clerk domain.
pub struct ClerkProcessor {
    ctx: Arc<BridgeContext>,
}

impl ClerkProcessor {
    /// A processor acting through `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Relays a `StateSynced` log as a consensus-chain record.
    pub async fn handle_state_synced(&self, log: &ContractLog) -> Result<()> {
        let event: StateSender::StateSynced = decode_log(log)?;
        let id = event_u64("id", event.id)?;

        let sequence = record_sequence(log.block_number, log.log_index);
        if self.ctx.store.has_relayed_sequence(sequence)? {
            debug!("State sync {id} was already relayed");
            return Ok(());
        }
        if self
            .ctx
            .heimdall
            .is_old_tx(OldTxModule::Clerk, log.tx_hash, log.log_index)
            .await?
        {
            info!("State sync {id} is already recorded on the consensus chain");
            self.ctx.store.mark_relayed_sequence(sequence)?;
            return Ok(());
        }

        let height = self.ctx.heimdall.status().await?.latest_block_height;
        let limit = self.ctx.config.state_sync_size_limit(height);
        let size = event.data.len();
        let data = bounded_record_data(event.data, limit);
        if data.len() != size {
            warn!("⚠️ State sync {id} payload of {size} bytes exceeds {limit}, relaying it empty");
        }

        if self.pending_in_mempool(log).await {
            return Err(ProcessError::transient(format!(
                "state sync {id} is already waiting in the consensus mempool"
            )));
        }

        let msg = BridgeMsg::EventRecord(MsgEventRecord {
            from: self.ctx.address(),
            tx_hash: log.tx_hash,
            log_index: log.log_index,
            block_number: log.block_number,
            id,
            contract_address: event.contractAddress,
            data,
            chain_id: self.ctx.config.common.bor_chain_id.clone(),
        });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        self.ctx.store.mark_relayed_sequence(sequence)?;
        info!("✅ Relayed state sync {id} in {tx_hash}");
        Ok(())
    }

    /// Whether a record for `log` is already waiting in the consensus chain's mempool. An
    /// unreadable mempool counts as empty.
    async fn pending_in_mempool(&self, log: &ContractLog) -> bool {
        match self.ctx.heimdall.unconfirmed_txs().await {
            Ok(pending) => pending
                .iter()
                .any(|tx| carries_event_record(tx, &log.tx_hash, log.log_index)),
            Err(e) => {
                warn!("⚠️ Failed to read the consensus mempool: {e}");
                false
            }
        }
    }

    /// Proposes a committed record to the child chain.
    pub async fn handle_record(&self, event: &StringEvent) -> Result<()> {
        let Some(id) = event.u64_attribute(ATTRIBUTE_RECORD_ID) else {
            return Err(ProcessError::malformed("record event without a record-id"));
        };

        if self.ctx.store.has_proposed_state(id)? {
            debug!("State {id} was already proposed");
            return Ok(());
        }

        let tx_hash = self
            .ctx
            .broadcaster
            .broadcast_to_child_chain(ChildChainCall::ProposeState { id })
            .await?;
        self.ctx.store.mark_proposed_state(id)?;
        info!("📡 Proposed state {id} to the child chain in {tx_hash}");
        Ok(())
    }
}

#[async_trait]
impl DomainProcessor for ClerkProcessor {
    fn name(&self) -> &'static str {
        "clerk"
    }

    fn domain(&self) -> Domain {
        Domain::Clerk
    }

    async fn on_root_chain_log(&self, log: ContractLog) -> Result<()> {
        if log.topics.first() == Some(&StateSender::StateSynced::SIGNATURE_HASH) {
            self.handle_state_synced(&log).await
        } else {
            debug!("Clerk processor ignores {}", log.event_name);
            Ok(())
        }
    }

    async fn on_consensus_event(&self, event: StringEvent) -> Result<()> {
        if event.kind == EVENT_TYPE_RECORD {
            self.handle_record(&event).await
        } else {
            debug!("Clerk processor ignores {} event", event.kind);
            Ok(())
        }
    }
}
