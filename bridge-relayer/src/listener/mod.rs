//! # Chain Listeners
//!
//! A [`ChainListener`] drives one chain. It pulls headers from a [`HeaderSource`], by
//! subscription when the source can push and by polling otherwise, and hands every header to
//! a [`HeaderHandler`] that turns it into broker messages.
//!
//! The producer and the handler run as two tasks joined by a bounded channel. Both observe the
//! listener's cancellation token, which is also how a failed subscription stops the listener.
//!
//! ## Specializations
//! - [`rootchain`]: scans confirmed root-chain logs.
//! - [`childchain`]: forwards child-chain headers to the checkpoint queue.
//! - [`heimdall`]: searches consensus-chain transactions by tag.

pub mod childchain;
pub mod heimdall;
pub mod rootchain;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::event::ChainHeader;
use futures::StreamExt;
use log::{debug, error, info, warn};
use snafu::Snafu;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chain::{self, ChainClient, HeaderStream};

/// Headers buffered between the producer and the handler.
const HEADER_CHANNEL_CAPACITY: usize = 64;

/// Errors raised by header sources and handlers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ListenerError {
    /// A chain client call failed.
    #[snafu(display("Chain request failed: {source}"))]
    Chain {
        /// Underlying chain error.
        source: chain::Error,
    },

    /// A consensus-chain query failed.
    #[snafu(display("Consensus chain request failed: {source}"))]
    Heimdall {
        /// Underlying REST error.
        source: crate::heimdall::Error,
    },

    /// Progress could not be read or written.
    #[snafu(display("Bridge store failed: {source}"))]
    Store {
        /// Underlying store error.
        source: crate::store::Error,
    },

    /// A derived message could not be published.
    #[snafu(display("Failed to publish: {source}"))]
    Publish {
        /// Underlying broker error.
        source: crate::broker::Error,
    },
}

impl ListenerError {
    /// Whether the source asked to be polled instead of subscribed to.
    pub fn is_subscription_unsupported(&self) -> bool {
        matches!(
            self,
            ListenerError::Chain {
                source: chain::Error::SubscriptionUnsupported
            }
        )
    }
}

impl From<chain::Error> for ListenerError {
    fn from(source: chain::Error) -> Self {
        ListenerError::Chain { source }
    }
}

impl From<crate::heimdall::Error> for ListenerError {
    fn from(source: crate::heimdall::Error) -> Self {
        ListenerError::Heimdall { source }
    }
}

impl From<crate::store::Error> for ListenerError {
    fn from(source: crate::store::Error) -> Self {
        ListenerError::Store { source }
    }
}

impl From<crate::broker::Error> for ListenerError {
    fn from(source: crate::broker::Error) -> Self {
        ListenerError::Publish { source }
    }
}

/// Where a listener gets its headers from.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Pushes new headers. An unsupported subscription makes the listener poll [`Self::latest`].
    async fn subscribe(&self) -> Result<HeaderStream, ListenerError>;

    /// The current head, or `None` when there is nothing to report yet.
    async fn latest(&self) -> Result<Option<ChainHeader>, ListenerError>;
}

/// What a listener does with each header.
#[async_trait]
pub trait HeaderHandler: Send + Sync {
    /// Handles one header. Errors are logged and the next header is processed.
    async fn process_header(&self, header: ChainHeader) -> Result<(), ListenerError>;
}

/// A [`HeaderSource`] over an EVM chain client.
pub struct ChainHeaderSource {
    name: String,
    client: Arc<dyn ChainClient>,
}

impl ChainHeaderSource {
    /// Wraps `client` under `name`.
    pub fn new(name: impl Into<String>, client: Arc<dyn ChainClient>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait]
impl HeaderSource for ChainHeaderSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<HeaderStream, ListenerError> {
        Ok(self.client.subscribe_new_heads().await?)
    }

    async fn latest(&self) -> Result<Option<ChainHeader>, ListenerError> {
        Ok(Some(self.client.latest_header().await?))
    }
}

/// Couples a header source with its handler.
pub struct ChainListener {
    source: Arc<dyn HeaderSource>,
    handler: Arc<dyn HeaderHandler>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ChainListener {
    /// A listener that stops when `cancel` fires.
    pub fn new(
        source: Arc<dyn HeaderSource>,
        handler: Arc<dyn HeaderHandler>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            handler,
            poll_interval,
            cancel,
        }
    }

    /// Stops the listener. Calling it again has no effect.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A token that stops this listener when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until stopped or until the subscription fails.
    pub async fn run(self) {
        let name = self.source.name().to_string();
        info!("🚀 Starting {name} listener");

        let (sender, mut receiver) = mpsc::channel(HEADER_CHANNEL_CAPACITY);
        let producer = tokio::spawn(produce_headers(
            self.source.clone(),
            self.poll_interval,
            sender,
            self.cancel.clone(),
        ));

        loop {
            let header = tokio::select! {
                _ = self.cancel.cancelled() => break,
                header = receiver.recv() => header,
            };
            let Some(header) = header else {
                break;
            };

            let number = header.number;
            if let Err(e) = self.handler.process_header(header).await {
                error!("❌ {name} failed to process header {number}: {e}");
            }
        }

        self.cancel.cancel();
        if let Err(e) = producer.await {
            error!("❌ {name} header producer panicked: {e}");
        }
        info!("{name} listener stopped");
    }
}

async fn produce_headers(
    source: Arc<dyn HeaderSource>,
    poll_interval: Duration,
    sender: mpsc::Sender<ChainHeader>,
    cancel: CancellationToken,
) {
    let name = source.name().to_string();
    let mut stream = match source.subscribe().await {
        Ok(stream) => stream,
        Err(e) if e.is_subscription_unsupported() => {
            info!(
                "🔌 {name} cannot push headers, polling every {}",
                humantime::format_duration(poll_interval)
            );
            poll_headers(source, poll_interval, sender, cancel).await;
            return;
        }
        Err(e) => {
            error!("❌ Failed to subscribe to {name} headers: {e}");
            cancel.cancel();
            return;
        }
    };

    info!("🔌 Subscribed to {name} headers");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(header)) => {
                if sender.send(header).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                error!("❌ {name} subscription failed: {e}");
                cancel.cancel();
                return;
            }
            None => {
                error!("❌ {name} subscription closed");
                cancel.cancel();
                return;
            }
        }
    }
}

async fn poll_headers(
    source: Arc<dyn HeaderSource>,
    poll_interval: Duration,
    sender: mpsc::Sender<ChainHeader>,
    cancel: CancellationToken,
) {
    let name = source.name().to_string();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen: Option<u64> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match source.latest().await {
            Ok(Some(header)) => {
                if last_seen.is_some_and(|seen| header.number <= seen) {
                    continue;
                }
                last_seen = Some(header.number);
                if sender.send(header).await.is_err() {
                    return;
                }
            }
            Ok(None) => debug!("{name} has no new head yet"),
            Err(e) => warn!("⚠️ Failed to poll {name} head: {e}"),
        }
    }
}
