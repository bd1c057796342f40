//! # Message Broker
//!
//! A durable topic broker with AMQP semantics scaled down to one process. Messages are
//! published to the `broadcastexchange` exchange and routed by topic pattern to the domain
//! queues (`queue.name.staking`, `queue.name.span`, `queue.name.checkpoint`,
//! `queue.name.clerk`). Each consumer receives [`Delivery`] values that must be settled:
//!
//! - [`Delivery::ack`] removes the message for good;
//! - [`Delivery::reject`] with `requeue = true` puts it back at the tail, marked redelivered;
//! - [`Delivery::reject`] with `requeue = false` moves it to the queue's dead letters.
//!
//! Storage is pluggable through [`QueueBackend`]: [`SledQueueBackend`] survives restarts,
//! [`MemoryQueueBackend`] backs tests.

mod durable;
mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bridge_core::event::ChainEvent;
use bridge_core::queue::{topic_matches, Domain, QueueError, QueuedMessage, SourceTag, BROADCAST_EXCHANGE};
use futures::Stream;
use log::{debug, info, warn};
use snafu::Snafu;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub use self::durable::SledQueueBackend;
pub use self::memory::MemoryQueueBackend;

/// How long an idle consumer waits before looking at its queue again without a wake-up.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors raised by the broker.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The backing store failed.
    #[snafu(display("Queue storage error on '{queue}': {source}"))]
    Storage {
        /// Queue being accessed.
        queue: String,
        /// Underlying sled error.
        source: sled::Error,
    },

    /// A multi-tree move failed.
    #[snafu(display("Queue transaction on '{queue}' failed: {source}"))]
    Transaction {
        /// Queue being accessed.
        queue: String,
        /// Underlying transaction error.
        source: sled::transaction::TransactionError<std::io::Error>,
    },

    /// A stored message could not be encoded or decoded.
    #[snafu(display("Failed to encode or decode a message on '{queue}': {source}"))]
    Codec {
        /// Queue being accessed.
        queue: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// The queue was never declared.
    #[snafu(display("Queue '{queue}' is not declared"))]
    UnknownQueue {
        /// The queue name.
        queue: String,
    },

    /// The delivery tag is not in flight.
    #[snafu(display("Delivery {tag} is not in flight on '{queue}'"))]
    UnknownDelivery {
        /// Queue being accessed.
        queue: String,
        /// The delivery tag.
        tag: u64,
    },

    /// A lock guarding in-memory queues was poisoned.
    #[snafu(display("In-memory queue lock poisoned"))]
    Poisoned,

    /// An event could not be wrapped into a message.
    #[snafu(display("Failed to build message: {source}"))]
    Message {
        /// Underlying queue error.
        source: QueueError,
    },
}

/// Result alias for broker operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Storage for named FIFO queues with in-flight tracking.
pub trait QueueBackend: Send + Sync {
    /// Creates the queue if it does not exist.
    fn declare(&self, queue: &str) -> Result<()>;

    /// Appends a message.
    fn push(&self, queue: &str, message: &QueuedMessage) -> Result<()>;

    /// Moves the oldest pending message in flight and returns it with its delivery tag.
    fn take(&self, queue: &str) -> Result<Option<(u64, QueuedMessage)>>;

    /// Forgets an in-flight message.
    fn ack(&self, queue: &str, tag: u64) -> Result<()>;

    /// Returns an in-flight message to the tail of the queue, marked redelivered.
    fn requeue(&self, queue: &str, tag: u64) -> Result<()>;

    /// Moves an in-flight message to the dead letters.
    fn dead_letter(&self, queue: &str, tag: u64) -> Result<()>;

    /// Drops every pending and in-flight message, returning how many were removed.
    fn purge(&self, queue: &str) -> Result<usize>;

    /// Returns messages left in flight by a previous run to the queue.
    fn recover(&self, queue: &str) -> Result<usize>;

    /// Pending messages.
    fn len(&self, queue: &str) -> Result<usize>;

    /// Dead-lettered messages.
    fn dead_letter_count(&self, queue: &str) -> Result<usize>;
}

/// A queue bound to the exchange by a routing pattern.
#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    pattern: String,
}

/// The topic exchange and its domain queues.
pub struct Broker {
    backend: Arc<dyn QueueBackend>,
    bindings: Vec<Binding>,
    wakeups: HashMap<String, Arc<Notify>>,
}

impl Broker {
    /// A broker with one queue per [`Domain`], bound by the domain's routing key.
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        let bindings: Vec<Binding> = Domain::ALL
            .iter()
            .map(|domain| Binding {
                queue: domain.queue_name(),
                pattern: domain.routing_key().to_string(),
            })
            .collect();
        let wakeups = bindings
            .iter()
            .map(|binding| (binding.queue.clone(), Arc::new(Notify::new())))
            .collect();

        Self {
            backend,
            bindings,
            wakeups,
        }
    }

    /// Declares every queue and returns deliveries interrupted by a crash to their queues.
    pub fn initialize_queues(&self) -> Result<()> {
        for binding in &self.bindings {
            self.backend.declare(&binding.queue)?;
            let recovered = self.backend.recover(&binding.queue)?;
            if recovered > 0 {
                warn!(
                    "🔁 Returned {recovered} unsettled messages to {}",
                    binding.queue
                );
            }
            debug!(
                "Bound {} to {BROADCAST_EXCHANGE} with key '{}'",
                binding.queue, binding.pattern
            );
        }
        info!("✅ Declared {} queues on {BROADCAST_EXCHANGE}", self.bindings.len());
        Ok(())
    }

    /// Routes a message to every queue whose binding matches its routing key.
    ///
    /// A message that matches no binding is dropped, as an exchange would drop it.
    pub fn publish(&self, message: &QueuedMessage) -> Result<()> {
        let mut routed = false;
        for binding in &self.bindings {
            if topic_matches(&binding.pattern, &message.routing_key) {
                self.backend.push(&binding.queue, message)?;
                self.wake(&binding.queue);
                routed = true;
            }
        }

        if routed {
            debug!(
                "Published {} from {} to '{}'",
                message.kind, message.app_id, message.routing_key
            );
        } else {
            warn!(
                "⚠️ Dropped unroutable message {} with key '{}'",
                message.kind, message.routing_key
            );
        }
        Ok(())
    }

    /// Wraps `event` and publishes it to `domain`.
    pub fn publish_event(
        &self,
        domain: Domain,
        source: SourceTag,
        kind: &str,
        event: &ChainEvent,
    ) -> Result<()> {
        let message = QueuedMessage::from_event(domain, source, kind, event)
            .map_err(|source| Error::Message { source })?;
        self.publish(&message)
    }

    /// Streams deliveries from `domain`'s queue until `cancel` fires.
    pub fn consume(
        &self,
        domain: Domain,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Delivery>> + Send + 'static {
        let queue = domain.queue_name();
        let backend = self.backend.clone();
        let wakeup = self.wakeup(&queue);

        stream! {
            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match backend.take(&queue) {
                    Ok(Some((tag, message))) => {
                        yield Ok(Delivery {
                            backend: backend.clone(),
                            wakeup: wakeup.clone(),
                            queue: queue.clone(),
                            tag,
                            message,
                        });
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = wakeup.notified() => {}
                            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        }
                    }
                }
            }
        }
    }

    /// Empties one queue, or all of them, returning how many messages were dropped.
    pub fn purge(&self, domain: Option<Domain>) -> Result<usize> {
        let mut removed = 0;
        for binding in &self.bindings {
            if domain.is_some_and(|domain| domain.queue_name() != binding.queue) {
                continue;
            }
            self.backend.declare(&binding.queue)?;
            removed += self.backend.purge(&binding.queue)?;
        }
        Ok(removed)
    }

    /// Pending messages on `domain`'s queue.
    pub fn pending(&self, domain: Domain) -> Result<usize> {
        self.backend.len(&domain.queue_name())
    }

    /// Dead-lettered messages on `domain`'s queue.
    pub fn dead_letters(&self, domain: Domain) -> Result<usize> {
        self.backend.dead_letter_count(&domain.queue_name())
    }

    fn wakeup(&self, queue: &str) -> Arc<Notify> {
        self.wakeups
            .get(queue)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    fn wake(&self, queue: &str) {
        if let Some(wakeup) = self.wakeups.get(queue) {
            wakeup.notify_one();
        }
    }
}

/// A message handed to a consumer, awaiting settlement.
pub struct Delivery {
    backend: Arc<dyn QueueBackend>,
    wakeup: Arc<Notify>,
    queue: String,
    tag: u64,
    /// The delivered message.
    pub message: QueuedMessage,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("tag", &self.tag)
            .field("message", &self.message)
            .finish()
    }
}

impl Delivery {
    /// Settles the delivery as processed.
    pub fn ack(self) -> Result<()> {
        self.backend.ack(&self.queue, self.tag)
    }

    /// Settles the delivery as failed, requeueing it or dead-lettering it.
    pub fn reject(self, requeue: bool) -> Result<()> {
        if requeue {
            self.backend.requeue(&self.queue, self.tag)?;
            self.wakeup.notify_one();
            Ok(())
        } else {
            self.backend.dead_letter(&self.queue, self.tag)
        }
    }
}
