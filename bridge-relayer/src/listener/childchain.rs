//! Child-chain header forwarding.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_core::event::{ChainEvent, ChainHeader};
use bridge_core::queue::{Domain, SourceTag};
use log::debug;

use super::{HeaderHandler, ListenerError};
use crate::broker::Broker;

/// Event kind of a forwarded child-chain header.
pub const NEW_HEADER_KIND: &str = "NewHeader";

/// Publishes every child-chain header to the checkpoint queue.
pub struct ChildChainHandler {
    broker: Arc<Broker>,
}

impl ChildChainHandler {
    /// Publishes through `broker`.
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl HeaderHandler for ChildChainHandler {
    async fn process_header(&self, header: ChainHeader) -> Result<(), ListenerError> {
        debug!("Child chain header {} ({})", header.number, header.hash);
        self.broker.publish_event(
            Domain::Checkpoint,
            SourceTag::ChildChain,
            NEW_HEADER_KIND,
            &ChainEvent::Header(header),
        )?;
        Ok(())
    }
}
