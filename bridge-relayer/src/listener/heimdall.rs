//! Consensus-chain event scanning.
//!
//! The consensus chain has no header subscription, so its listener polls `/status` and treats
//! the latest height as a header. For every new height the handler searches the
//! transactions in `[from, to]` by message action and republishes the events the processors
//! act on.

use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use bridge_core::event::{ChainEvent, ChainHeader, StringEvent};
use bridge_core::queue::{Domain, SourceTag};
use log::{debug, error, info};

use super::{HeaderHandler, HeaderSource, ListenerError};
use crate::chain::{self, HeaderStream};
use crate::context::BridgeContext;
use crate::heimdall::HeimdallApi;
use crate::store::ProgressKey;

/// Transactions returned per search page.
pub const SEARCH_PAGE_LIMIT: u32 = 50;

/// Event type of a checkpoint accepted into the buffer.
pub const EVENT_TYPE_CHECKPOINT: &str = "checkpoint";

/// Event type of an acknowledged checkpoint.
pub const EVENT_TYPE_CHECKPOINT_ACK: &str = "checkpoint-ack";

/// Event type of a stored state-sync record.
pub const EVENT_TYPE_RECORD: &str = "record";

/// Message actions searched on every poll.
const SEARCHED_ACTIONS: [&str; 3] = ["checkpoint", "checkpoint-ack", "event-record"];

/// Reports the consensus chain's latest height as a header.
pub struct HeimdallHeaderSource {
    heimdall: Arc<dyn HeimdallApi>,
}

impl HeimdallHeaderSource {
    /// Polls `heimdall`.
    pub fn new(heimdall: Arc<dyn HeimdallApi>) -> Self {
        Self { heimdall }
    }
}

#[async_trait]
impl HeaderSource for HeimdallHeaderSource {
    fn name(&self) -> &str {
        "heimdall"
    }

    async fn subscribe(&self) -> Result<HeaderStream, ListenerError> {
        Err(chain::Error::SubscriptionUnsupported.into())
    }

    async fn latest(&self) -> Result<Option<ChainHeader>, ListenerError> {
        let status = self.heimdall.status().await?;
        if status.catching_up {
            debug!("Consensus node is catching up at {}", status.latest_block_height);
            return Ok(None);
        }
        Ok(Some(ChainHeader {
            chain_id: 0,
            number: status.latest_block_height,
            hash: B256::ZERO,
            timestamp: 0,
            transactions_root: B256::ZERO,
            receipts_root: B256::ZERO,
        }))
    }
}

/// The queue a consensus-chain event belongs on, if any.
pub fn event_domain(event: &StringEvent) -> Option<Domain> {
    match event.kind.as_str() {
        EVENT_TYPE_CHECKPOINT | EVENT_TYPE_CHECKPOINT_ACK => Some(Domain::Checkpoint),
        EVENT_TYPE_RECORD => Some(Domain::Clerk),
        _ => None,
    }
}

/// Searches and republishes consensus-chain events.
pub struct HeimdallHandler {
    ctx: Arc<BridgeContext>,
}

impl HeimdallHandler {
    /// Scans with the clients in `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn scan_action(&self, action: &str, from: u64, to: u64) -> Result<usize, ListenerError> {
        let tags = vec![
            ("message.action".to_string(), action.to_string()),
            ("tx.minheight".to_string(), from.to_string()),
            ("tx.maxheight".to_string(), to.to_string()),
        ];

        let mut published = 0;
        let mut page = 1;
        loop {
            debug!("Searching {action} transactions in {from}-{to}, page {page}");
            let result = self
                .ctx
                .heimdall
                .search_txs(&tags, page, SEARCH_PAGE_LIMIT)
                .await?;

            for tx in &result.txs {
                for event in tx.events() {
                    let Some(domain) = event_domain(event) else {
                        continue;
                    };
                    self.ctx.broker.publish_event(
                        domain,
                        SourceTag::Heimdall,
                        &event.kind,
                        &ChainEvent::ConsensusEvent(event.clone()),
                    )?;
                    published += 1;
                }
            }

            if result.txs.len() < SEARCH_PAGE_LIMIT as usize {
                return Ok(published);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl HeaderHandler for HeimdallHandler {
    async fn process_header(&self, header: ChainHeader) -> Result<(), ListenerError> {
        let to = header.number;
        let from = self
            .ctx
            .store
            .last_block(ProgressKey::HeimdallLastBlock)?
            .map_or(0, |last| last + 1);
        if from > to {
            return Ok(());
        }

        // A failed scan leaves the range unrecorded so the next header searches it again.
        let mut published = 0;
        for action in SEARCHED_ACTIONS {
            published += self.scan_action(action, from, to).await.inspect_err(|e| {
                error!("❌ Failed to search {action} events in {from}-{to}: {e}");
            })?;
        }

        self.ctx
            .store
            .set_last_block(ProgressKey::HeimdallLastBlock, to)?;
        if published > 0 {
            info!("📡 Published {published} consensus chain events from heights {from}-{to}");
        }
        Ok(())
    }
}
