//! # Checkpoint Engine
//!
//! Drives one checkpoint cycle across the three chains:
//!
//! 1. **Proposal**: on each child-chain header the current proposer computes the next range
//!    and sends `MsgCheckpoint` with the range's header root and the dividend account root.
//! 2. **Commit**: when the consensus chain confirms a checkpoint, the current proposer fetches
//!    the confirming transaction and its signatures and submits them to the root chain.
//! 3. **Acknowledgment**: when the root chain emits `NewHeaderBlock`, `MsgCheckpointAck` is
//!    sent if the consensus chain still buffers exactly that range.
//! 4. **No-ack**: a timer sends `MsgCheckpointNoAck` when checkpoints stall.

use std::sync::Arc;

use alloy::primitives::Bytes;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use bridge_core::checkpoint::{
    commit_decision, last_header_block_id, no_ack_index, no_ack_rate_limited, should_acknowledge,
    CheckpointParams, CommitDecision, ContractCheckpointState, HeaderBlock,
};
use bridge_core::event::{ChainHeader, ContractLog, StringEvent};
use bridge_core::msgs::{BridgeMsg, MsgCheckpoint, MsgCheckpointAck, MsgCheckpointNoAck};
use bridge_core::queue::Domain;
use bridge_core::staking::{in_proposer_rotation, is_first_proposer};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    child_range_root, decode_log, event_u64, spawn_ticker, unix_now, DomainProcessor, ProcessError,
    Result,
};
use crate::context::BridgeContext;
use crate::contracts::RootChain;
use crate::listener::heimdall::{EVENT_TYPE_CHECKPOINT, EVENT_TYPE_CHECKPOINT_ACK};

/// Attribute carrying a checkpoint's first block.
const ATTRIBUTE_START_BLOCK: &str = "start-block";

/// Attribute carrying a checkpoint's last block.
const ATTRIBUTE_END_BLOCK: &str = "end-block";

/// Attribute carrying an acknowledged header block id.
const ATTRIBUTE_HEADER_INDEX: &str = "header-index";

/// The checkpoint domain.
pub struct CheckpointProcessor {
    ctx: Arc<BridgeContext>,
}

impl CheckpointProcessor {
    /// A processor acting through `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn checkpoint_params(&self) -> CheckpointParams {
        match self.ctx.heimdall.checkpoint_params().await {
            Ok(params) => params,
            Err(e) => {
                warn!("⚠️ Using configured checkpoint params, consensus chain query failed: {e}");
                self.ctx.config.fallback_checkpoint_params()
            }
        }
    }

    /// The last header block submitted to the root chain.
    async fn last_header_block(&self, params: &CheckpointParams) -> Result<(u64, HeaderBlock)> {
        let contract = &self.ctx.root_chain_contract;
        let current = contract.current_header_block().await?;
        let id = last_header_block_id(current, params.child_block_interval);
        let last = if id == 0 {
            HeaderBlock::default()
        } else {
            contract.header_block(id).await?
        };
        Ok((current, last))
    }

    /// Evaluates the root-chain checkpoint contract against the child-chain head.
    pub async fn contract_state(
        &self,
        latest_child_block: u64,
        params: &CheckpointParams,
    ) -> Result<ContractCheckpointState> {
        let (current, last) = self.last_header_block(params).await?;
        Ok(ContractCheckpointState::evaluate(
            &last,
            current,
            latest_child_block,
            params,
            unix_now(),
        ))
    }

    /// Proposes the next checkpoint if this validator is the proposer.
    pub async fn handle_child_header(&self, header: &ChainHeader) -> Result<()> {
        let address = self.ctx.address();
        let proposers = self.ctx.heimdall.proposers(1).await?;
        if !is_first_proposer(&proposers, &address) {
            debug!("Not the checkpoint proposer, skipping header {}", header.number);
            return Ok(());
        }

        let params = self.checkpoint_params().await;
        let state = self.contract_state(header.number, &params).await?;
        let range = state.next;
        if !range.is_submittable() {
            debug!(
                "No checkpoint due at header {} (next range {}-{})",
                header.number, range.start, range.end
            );
            return Ok(());
        }

        if let Some(buffered) = self.ctx.heimdall.buffered_checkpoint().await? {
            debug!(
                "Checkpoint {}-{} is still buffered, not proposing {}-{}",
                buffered.start_block, buffered.end_block, range.start, range.end
            );
            return Ok(());
        }

        if range.forced {
            info!(
                "Force pushing checkpoint {}-{}, last checkpoint is {}s old",
                range.start,
                range.end,
                unix_now().saturating_sub(state.created_at)
            );
        }
        self.propose_checkpoint(range.start, range.end).await
    }

    async fn propose_checkpoint(&self, start: u64, end: u64) -> Result<()> {
        let Some(range_root) = child_range_root(self.ctx.child_chain.as_ref(), start, end).await?
        else {
            info!("Child blocks {start}-{end} are not all available yet");
            return Ok(());
        };
        let account_root_hash = self.ctx.heimdall.dividend_account_root().await?;

        let msg = BridgeMsg::Checkpoint(MsgCheckpoint {
            proposer: self.ctx.address(),
            start_block: start,
            end_block: end,
            root_hash: range_root.root,
            account_root_hash,
            bor_chain_id: self.ctx.config.common.bor_chain_id.clone(),
        });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        info!(
            "✅ Proposed checkpoint {start}-{end} with root {} in {tx_hash}",
            range_root.root
        );
        Ok(())
    }

    /// Commits a checkpoint the consensus chain confirmed, if this validator is the current
    /// proposer.
    pub async fn handle_checkpoint_confirmation(&self, event: &StringEvent) -> Result<()> {
        let (Some(start), Some(end)) = (
            event.u64_attribute(ATTRIBUTE_START_BLOCK),
            event.u64_attribute(ATTRIBUTE_END_BLOCK),
        ) else {
            return Err(ProcessError::malformed(
                "checkpoint event without start-block and end-block",
            ));
        };

        let address = self.ctx.address();
        let current = self.ctx.heimdall.current_proposer().await?;
        if !current.is_some_and(|proposer| proposer.signer == address) {
            info!("Not the current proposer, skipping commit of checkpoint {start}-{end}");
            return Ok(());
        }

        let tags = vec![
            ("checkpoint.start-block".to_string(), start.to_string()),
            ("checkpoint.end-block".to_string(), end.to_string()),
            ("message.action".to_string(), "checkpoint".to_string()),
        ];
        let found = self.ctx.heimdall.search_txs(&tags, 1, 1).await?;
        let Some(tx) = found.txs.first() else {
            return Err(ProcessError::transient(format!(
                "confirming transaction for checkpoint {start}-{end} is not indexed yet"
            )));
        };

        self.commit_checkpoint(tx.height, &tx.txhash, start, end).await
    }

    async fn commit_checkpoint(&self, height: u64, tx_hash: &str, start: u64, end: u64) -> Result<()> {
        let Some(confirmed) = self.ctx.heimdall.tx(tx_hash).await? else {
            return Err(ProcessError::transient(format!(
                "checkpoint transaction {tx_hash} not found"
            )));
        };
        let commit = self.ctx.heimdall.commit(height + 1).await?;

        let contract = &self.ctx.root_chain_contract;
        let last_child_block = contract.last_child_block().await?;
        match commit_decision(last_child_block, start) {
            CommitDecision::Submit => {
                let tx_data = confirmed.payload();
                let submission = contract.submit_header_block(
                    Bytes::from(commit.vote_bytes(tx_data)),
                    Bytes::from(commit.concatenated_signatures()),
                    Bytes::copy_from_slice(tx_data),
                );
                let root_tx = tokio::time::timeout(self.ctx.config.commit_timeout, submission)
                    .await
                    .map_err(|_| {
                        ProcessError::transient(format!(
                            "submitting checkpoint {start}-{end} timed out"
                        ))
                    })??;
                info!("📡 Committed checkpoint {start}-{end} to the root chain in {root_tx}");
            }
            CommitDecision::AlreadyCommitted => {
                info!(
                    "Checkpoint {start}-{end} already committed, root chain is at {last_child_block}"
                );
            }
            CommitDecision::Behind => {
                warn!(
                    "⚠️ Root chain at {last_child_block} cannot take checkpoint {start}-{end}"
                );
            }
        }
        Ok(())
    }

    /// Acknowledges a header block the root chain committed.
    pub async fn handle_new_header_block(&self, log: &ContractLog) -> Result<()> {
        let event: RootChain::NewHeaderBlock = decode_log(log)?;
        let header_block_id = event_u64("headerBlockId", event.headerBlockId)?;
        let start = event_u64("start", event.start)?;
        let end = event_u64("end", event.end)?;

        let buffered = self.ctx.heimdall.buffered_checkpoint().await?;
        if !should_acknowledge(buffered.as_ref(), start, end) {
            match buffered {
                None => debug!("Header block {header_block_id} already acknowledged"),
                Some(buffered) => info!(
                    "Buffered checkpoint {}-{} does not match header block {header_block_id} ({start}-{end}), not acknowledging",
                    buffered.start_block, buffered.end_block
                ),
            }
            return Ok(());
        }

        let msg = BridgeMsg::CheckpointAck(MsgCheckpointAck {
            from: self.ctx.address(),
            number: header_block_id,
            proposer: event.proposer,
            start_block: start,
            end_block: end,
            root_hash: event.root,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
        });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        info!("✅ Acknowledged header block {header_block_id} ({start}-{end}) in {tx_hash}");
        Ok(())
    }

    /// Sends a no-ack when checkpoints stalled and this validator holds the rotation slot.
    pub async fn handle_no_ack(&self) -> Result<bool> {
        let params = self.checkpoint_params().await;
        let (_, last) = self.last_header_block(&params).await?;
        let now = unix_now();
        let wait_time = self.ctx.config.no_ack_wait_time.as_secs();

        let index = no_ack_index(last.created_at, now, wait_time);
        if index == 0 {
            debug!("Last checkpoint is recent, no no-ack needed");
            return Ok(false);
        }

        let last_no_ack = self.ctx.heimdall.last_no_ack().await?;
        if no_ack_rate_limited(last_no_ack, now, params.checkpoint_buffer_time()) {
            debug!("A no-ack was sent {}s ago, waiting", now.saturating_sub(last_no_ack));
            return Ok(false);
        }

        let address = self.ctx.address();
        let proposers = self.ctx.heimdall.proposers(index + 1).await?;
        if !in_proposer_rotation(&proposers, index, &address) {
            debug!("Not in the no-ack rotation at offset {index}");
            return Ok(false);
        }

        let msg = BridgeMsg::CheckpointNoAck(MsgCheckpointNoAck { from: address });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        info!("📡 Sent checkpoint no-ack at rotation offset {index} in {tx_hash}");
        Ok(true)
    }
}

#[async_trait]
impl DomainProcessor for CheckpointProcessor {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn domain(&self) -> Domain {
        Domain::Checkpoint
    }

    async fn on_root_chain_log(&self, log: ContractLog) -> Result<()> {
        if log.topics.first() == Some(&RootChain::NewHeaderBlock::SIGNATURE_HASH) {
            self.handle_new_header_block(&log).await
        } else {
            debug!("Checkpoint processor ignores {}", log.event_name);
            Ok(())
        }
    }

    async fn on_child_chain_header(&self, header: ChainHeader) -> Result<()> {
        self.handle_child_header(&header).await
    }

    async fn on_consensus_event(&self, event: StringEvent) -> Result<()> {
        match event.kind.as_str() {
            EVENT_TYPE_CHECKPOINT => self.handle_checkpoint_confirmation(&event).await,
            EVENT_TYPE_CHECKPOINT_ACK => {
                match event.u64_attribute(ATTRIBUTE_HEADER_INDEX) {
                    Some(id) => info!("✅ Consensus chain acknowledged header block {id}"),
                    None => info!("✅ Consensus chain acknowledged a checkpoint"),
                }
                Ok(())
            }
            other => {
                debug!("Checkpoint processor ignores {other} event");
                Ok(())
            }
        }
    }

    fn spawn_timers(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let period = self.ctx.config.no_ack_poll_interval;
        let processor = self;
        vec![spawn_ticker("checkpoint no-ack", period, cancel, move || {
            let processor = processor.clone();
            async move { processor.handle_no_ack().await.map(|_| ()) }
        })]
    }
}
