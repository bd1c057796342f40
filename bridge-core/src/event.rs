//! Units of new chain state detected by the listeners.
//!
//! A [`ChainEvent`] is produced by exactly one listener, serialized into the body of a
//! [`QueuedMessage`](crate::queue::QueuedMessage) and consumed by exactly one processor.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A new block header on the root or child chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHeader {
    /// Chain id of the chain the header belongs to.
    pub chain_id: u64,
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Block timestamp in unix seconds.
    pub timestamp: u64,
    /// Root of the transaction trie.
    pub transactions_root: B256,
    /// Root of the receipt trie.
    pub receipts_root: B256,
}

/// A contract log emitted on the root chain, tagged with the event it was matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLog {
    /// Name of the matched event, e.g. `StateSynced`.
    pub event_name: String,
    /// Address of the emitting contract.
    pub address: Address,
    /// Indexed fields, the event signature first.
    pub topics: Vec<B256>,
    /// ABI-encoded unindexed fields.
    pub data: Bytes,
    /// Hash of the transaction that emitted the log.
    pub tx_hash: B256,
    /// Position of the log within its block.
    pub log_index: u64,
    /// Block the log was included in.
    pub block_number: u64,
}

/// A key/value attribute of a consensus-chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    /// Attribute key.
    pub key: String,
    /// Attribute value.
    #[serde(default)]
    pub value: String,
}

/// A typed event emitted by a consensus-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEvent {
    /// Event type, e.g. `checkpoint` or `record`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event attributes in emission order.
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl StringEvent {
    /// Returns the value of the first attribute named `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.key == key)
            .map(|attribute| attribute.value.as_str())
    }

    /// Returns the attribute named `key` parsed as an unsigned integer.
    pub fn u64_attribute(&self, key: &str) -> Option<u64> {
        self.attribute(key)?.trim().parse().ok()
    }
}

/// A detected unit of new chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// A new header.
    Header(ChainHeader),
    /// A decoded contract log.
    ContractLog(ContractLog),
    /// A consensus-chain event.
    ConsensusEvent(StringEvent),
}
