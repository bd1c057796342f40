//! # Domain Processors
//!
//! A [`DomainProcessor`] holds the relay rules of one event domain. A [`ProcessorService`]
//! consumes the domain's queue, hands each delivery to the processor hook matching the
//! message's source tag and settles the delivery from the outcome:
//!
//! - `Ok` acknowledges it;
//! - [`ProcessError::Transient`] requeues it after a delay that doubles with every requeue;
//! - [`ProcessError::Malformed`] dead-letters it.
//!
//! Deliveries are handled concurrently on a bounded worker pool, so every hook must be
//! idempotent.

pub mod checkpoint;
pub mod clerk;
pub mod fee;
pub mod milestone;
pub mod staking;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::{B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use bridge_core::event::{ChainEvent, ChainHeader, ContractLog, StringEvent};
use bridge_core::queue::{Domain, QueueError, QueuedMessage, SourceTag};
use futures::StreamExt;
use log::{debug, error, info, warn};
use snafu::Snafu;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use checkpoint_tree::{checkpoint_root, HeaderLeaf};

use crate::broker::{Broker, Delivery};
use crate::chain::{headers_in_range, ChainClient};

/// Delay before a transiently failed delivery is put back on its queue the first time.
const REQUEUE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on the requeue delay of a message that keeps failing.
const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(120);

/// Doublings applied to the requeue delay before it is capped.
const MAX_REQUEUE_DOUBLINGS: u32 = 6;

/// How a processor failed, and therefore how the delivery is settled.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProcessError {
    /// The message can never be processed.
    #[snafu(display("Malformed message: {reason}"))]
    Malformed {
        /// What was wrong with it.
        reason: String,
    },

    /// The message may succeed later.
    #[snafu(display("Transient failure: {reason}"))]
    Transient {
        /// What failed.
        reason: String,
    },
}

impl ProcessError {
    /// A permanent failure.
    pub fn malformed(reason: impl Into<String>) -> Self {
        ProcessError::Malformed {
            reason: reason.into(),
        }
    }

    /// A retryable failure.
    pub fn transient(reason: impl ToString) -> Self {
        ProcessError::Transient {
            reason: reason.to_string(),
        }
    }
}

impl From<QueueError> for ProcessError {
    fn from(e: QueueError) -> Self {
        ProcessError::malformed(e.to_string())
    }
}

impl From<crate::heimdall::Error> for ProcessError {
    fn from(e: crate::heimdall::Error) -> Self {
        ProcessError::transient(e)
    }
}

impl From<crate::broadcaster::Error> for ProcessError {
    fn from(e: crate::broadcaster::Error) -> Self {
        if e.is_transient() {
            ProcessError::transient(e)
        } else {
            ProcessError::malformed(e.to_string())
        }
    }
}

impl From<crate::chain::Error> for ProcessError {
    fn from(e: crate::chain::Error) -> Self {
        ProcessError::transient(e)
    }
}

impl From<crate::contracts::Error> for ProcessError {
    fn from(e: crate::contracts::Error) -> Self {
        ProcessError::transient(e)
    }
}

impl From<crate::store::Error> for ProcessError {
    fn from(e: crate::store::Error) -> Self {
        ProcessError::transient(e)
    }
}

/// Result alias for processor hooks.
pub type Result<T, E = ProcessError> = std::result::Result<T, E>;

/// The relay rules of one domain.
#[async_trait]
pub trait DomainProcessor: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// The queue this processor consumes.
    fn domain(&self) -> Domain;

    /// Handles a root-chain contract log.
    async fn on_root_chain_log(&self, log: ContractLog) -> Result<()> {
        debug!("{} ignores root chain log {}", self.name(), log.event_name);
        Ok(())
    }

    /// Handles a child-chain header.
    async fn on_child_chain_header(&self, header: ChainHeader) -> Result<()> {
        debug!("{} ignores child chain header {}", self.name(), header.number);
        Ok(())
    }

    /// Handles a consensus-chain event.
    async fn on_consensus_event(&self, event: StringEvent) -> Result<()> {
        debug!("{} ignores consensus event {}", self.name(), event.kind);
        Ok(())
    }

    /// Starts the processor's periodic tasks. They stop when `cancel` fires.
    fn spawn_timers(self: Arc<Self>, _cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

/// Routes a queued message to the hook matching its source tag.
///
/// Messages from an unknown producer are accepted and dropped.
pub async fn dispatch<P: DomainProcessor + ?Sized>(
    processor: &P,
    message: &QueuedMessage,
) -> Result<()> {
    let Some(source) = message.source() else {
        warn!(
            "⚠️ {} dropping {} from unknown source '{}'",
            processor.name(),
            message.kind,
            message.app_id
        );
        return Ok(());
    };

    match (source, message.decode_event()?) {
        (SourceTag::RootChain, ChainEvent::ContractLog(log)) => {
            processor.on_root_chain_log(log).await
        }
        (SourceTag::ChildChain, ChainEvent::Header(header)) => {
            processor.on_child_chain_header(header).await
        }
        (SourceTag::Heimdall, ChainEvent::ConsensusEvent(event)) => {
            processor.on_consensus_event(event).await
        }
        (source, _) => Err(ProcessError::malformed(format!(
            "{} from {source} carries an unexpected event",
            message.kind
        ))),
    }
}

/// Consumes one domain queue with a bounded pool of workers.
pub struct ProcessorService {
    processor: Arc<dyn DomainProcessor>,
    broker: Arc<Broker>,
    workers: Arc<Semaphore>,
    requeue_delay: Duration,
}

impl ProcessorService {
    /// A service running at most `pool_size` handlers at once.
    pub fn new(processor: Arc<dyn DomainProcessor>, broker: Arc<Broker>, pool_size: usize) -> Self {
        Self {
            processor,
            broker,
            workers: Arc::new(Semaphore::new(pool_size.max(1))),
            requeue_delay: REQUEUE_DELAY,
        }
    }

    /// Overrides the delay before a transient failure is requeued.
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Runs until `cancel` fires, then waits for in-flight handlers and timers.
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.processor.name();
        let domain = self.processor.domain();
        info!("🚀 Starting {name} processor on {}", domain.queue_name());

        let timers = self.processor.clone().spawn_timers(cancel.clone());
        let deliveries = self.broker.consume(domain, cancel.clone());
        futures::pin_mut!(deliveries);
        let mut handlers = JoinSet::new();

        while let Some(delivery) = deliveries.next().await {
            while let Some(finished) = handlers.try_join_next() {
                if let Err(e) = finished {
                    error!("❌ {name} handler panicked: {e}");
                }
            }

            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("❌ {name} failed to read from {}: {e}", domain.queue_name());
                    continue;
                }
            };

            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let processor = self.processor.clone();
            let requeue_delay = self.requeue_delay;
            handlers.spawn(async move {
                handle_delivery(processor.as_ref(), delivery, requeue_delay).await;
                drop(permit);
            });
        }

        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                error!("❌ {name} handler panicked: {e}");
            }
        }
        for timer in timers {
            if let Err(e) = timer.await {
                error!("❌ {name} timer panicked: {e}");
            }
        }
        info!("{name} processor stopped");
    }
}

/// Processes one delivery and settles it.
pub async fn handle_delivery(
    processor: &dyn DomainProcessor,
    delivery: Delivery,
    requeue_delay: Duration,
) {
    let name = processor.name();
    let kind = delivery.message.kind.clone();
    let settled = match dispatch(processor, &delivery.message).await {
        Ok(()) => delivery.ack(),
        Err(ProcessError::Malformed { reason }) => {
            error!("❌ {name} dropping {kind}: {reason}");
            delivery.reject(false)
        }
        Err(ProcessError::Transient { reason }) => {
            let delay = requeue_delay_after(requeue_delay, delivery.message.requeue_count);
            warn!(
                "🔁 {name} will retry {kind} in {}: {reason}",
                humantime::format_duration(delay)
            );
            tokio::time::sleep(delay).await;
            delivery.reject(true)
        }
    };
    if let Err(e) = settled {
        error!("❌ {name} failed to settle {kind}: {e}");
    }
}

/// The wait before requeueing a message that was already requeued `requeue_count` times.
pub fn requeue_delay_after(base: Duration, requeue_count: u32) -> Duration {
    base.saturating_mul(1 << requeue_count.min(MAX_REQUEUE_DOUBLINGS))
        .min(MAX_REQUEUE_DELAY.max(base))
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// The root over a child-chain range and the hash of its last block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRoot {
    /// Merkle root over the range.
    pub root: B256,
    /// Hash of the range's last block.
    pub end_hash: B256,
}

/// Decodes a root-chain log as event `E`. A log that does not decode can never be processed.
pub fn decode_log<E: SolEvent>(log: &ContractLog) -> Result<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true).map_err(|e| {
        ProcessError::malformed(format!("undecodable {} log: {e}", log.event_name))
    })
}

/// Narrows an event field to `u64`.
pub fn event_u64(field: &'static str, value: U256) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| ProcessError::malformed(format!("{field} overflows u64: {value}")))
}

/// Computes the Merkle root over child-chain blocks `[start, end]`.
///
/// Returns `None` while any block in the range is not available yet.
pub async fn child_range_root(
    client: &dyn ChainClient,
    start: u64,
    end: u64,
) -> Result<Option<RangeRoot>> {
    let Some(headers) = headers_in_range(client, start, end).await? else {
        return Ok(None);
    };
    let Some(last) = headers.last() else {
        return Ok(None);
    };
    let end_hash = last.hash;

    let leaves: Vec<HeaderLeaf> = headers
        .iter()
        .map(|header| HeaderLeaf {
            number: header.number,
            timestamp: header.timestamp,
            transactions_root: header.transactions_root.0,
            receipts_root: header.receipts_root.0,
        })
        .collect();
    let root = checkpoint_root(&leaves).map_err(ProcessError::transient)?;

    Ok(Some(RangeRoot {
        root: B256::from(root),
        end_hash,
    }))
}

/// Runs `tick` every `period` until `cancel` fires. The first run happens after one period.
pub fn spawn_ticker<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = tick().await {
                warn!("⚠️ {name} failed: {e}");
            }
        }
        debug!("{name} stopped");
    })
}
