//! Broker naming and the message envelope.
//!
//! All listeners publish to a single topic exchange. Each domain owns one durable queue bound
//! to a fixed routing key, and every message carries the tag of the listener that produced
//! it so one queue can multiplex several event sources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::event::ChainEvent;

/// Name of the topic exchange every queue is bound under.
pub const BROADCAST_EXCHANGE: &str = "broadcastexchange";

/// Prefix shared by every queue name.
const QUEUE_PREFIX: &str = "queue.name.";

/// Errors produced while naming or decoding queued messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// A routing key or queue name does not belong to any domain.
    #[snafu(display("unknown domain: {name}"))]
    UnknownDomain {
        /// The name that failed to resolve.
        name: String,
    },

    /// An application id does not name a known listener.
    #[snafu(display("unknown source tag: {tag}"))]
    UnknownSource {
        /// The tag that failed to resolve.
        tag: String,
    },

    /// A message body could not be encoded or decoded.
    #[snafu(display("failed to encode or decode message body: {source}"))]
    Body {
        /// The underlying serde error.
        source: serde_json::Error,
    },
}

/// The event domains, one queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Validator lifecycle and fee top-ups.
    Staking,
    /// Span management. Declared for wire compatibility, no processor consumes it.
    Span,
    /// Checkpoint proposals, acks and child-chain headers.
    Checkpoint,
    /// State-sync records.
    Clerk,
}

impl Domain {
    /// Every domain, in declaration order.
    pub const ALL: [Domain; 4] = [
        Domain::Staking,
        Domain::Span,
        Domain::Checkpoint,
        Domain::Clerk,
    ];

    /// The routing key the domain's queue is bound to.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Domain::Staking => "staking",
            Domain::Span => "span",
            Domain::Checkpoint => "checkpoint",
            Domain::Clerk => "clerk",
        }
    }

    /// The durable queue name, e.g. `queue.name.clerk`.
    pub fn queue_name(&self) -> String {
        format!("{QUEUE_PREFIX}{}", self.routing_key())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for Domain {
    type Err = QueueError;

    /// Accepts either a routing key or a full queue name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.strip_prefix(QUEUE_PREFIX).unwrap_or(s);
        Domain::ALL
            .into_iter()
            .find(|domain| domain.routing_key() == key)
            .ok_or_else(|| QueueError::UnknownDomain { name: s.to_string() })
    }
}

/// The listener that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTag {
    /// The root-chain listener.
    RootChain,
    /// The child-chain listener.
    ChildChain,
    /// The consensus-chain listener.
    Heimdall,
}

impl SourceTag {
    /// The application id written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::RootChain => "rootchain",
            SourceTag::ChildChain => "maticchain",
            SourceTag::Heimdall => "heimdall",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rootchain" => Ok(SourceTag::RootChain),
            "maticchain" => Ok(SourceTag::ChildChain),
            "heimdall" => Ok(SourceTag::Heimdall),
            other => Err(QueueError::UnknownSource {
                tag: other.to_string(),
            }),
        }
    }
}

/// The envelope stored by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Application id of the producing listener. Kept as a raw string so that an unknown
    /// producer can be acknowledged and dropped instead of failing deserialization.
    pub app_id: String,
    /// Event name or event type.
    pub kind: String,
    /// Serialized [`ChainEvent`].
    pub body: Vec<u8>,
    /// Whether the broker has delivered this message before.
    #[serde(default)]
    pub redelivered: bool,
    /// Times the message was put back after a transient failure.
    #[serde(default)]
    pub requeue_count: u32,
}

impl QueuedMessage {
    /// Wraps an event for publication to `domain`.
    pub fn from_event(
        domain: Domain,
        source: SourceTag,
        kind: impl Into<String>,
        event: &ChainEvent,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            routing_key: domain.routing_key().to_string(),
            app_id: source.as_str().to_string(),
            kind: kind.into(),
            body: serde_json::to_vec(event).context(BodySnafu)?,
            redelivered: false,
            requeue_count: 0,
        })
    }

    /// The producing listener, if the application id is known.
    pub fn source(&self) -> Option<SourceTag> {
        self.app_id.parse().ok()
    }

    /// Decodes the body back into the event it was built from.
    pub fn decode_event(&self) -> Result<ChainEvent, QueueError> {
        serde_json::from_slice(&self.body).context(BodySnafu)
    }
}

/// Matches a routing key against an AMQP-style binding pattern.
///
/// Words are separated by `.`; `*` matches exactly one word and `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) if word == "*" || word == head => match_words(rest, tail),
            _ => false,
        },
    }
}
