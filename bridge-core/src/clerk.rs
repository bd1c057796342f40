//! State-sync records.
//!
//! Every `StateSynced` event on the root chain becomes exactly one [`EventRecord`] on the
//! consensus chain. Records are keyed by id and guarded against replay by a sequence derived
//! from the emitting log's position.
//!
//! [`apply_event_record`] is the acceptance rule a component keeping the record ledger
//! applies. The relayer only proposes records, so it relies on the same sequence guard
//! locally and leaves storage to the consensus chain.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// Multiplier separating block numbers from log indices in a record sequence.
pub const SEQUENCE_BLOCK_MULTIPLIER: u128 = 100_000;

/// A state-sync record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// State id assigned by the state sender contract.
    pub id: u64,
    /// Receiving contract on the child chain.
    pub contract: Address,
    /// Opaque payload.
    pub data: Bytes,
    /// Root-chain transaction that emitted the event.
    pub tx_hash: B256,
    /// Position of the event's log within its block.
    pub log_index: u64,
    /// Root-chain block the event was included in.
    pub block_number: u64,
    /// Child chain id.
    pub bor_chain_id: String,
    /// Consensus-chain time the record was stored.
    pub record_time: u64,
}

impl EventRecord {
    /// The replay-guard sequence of this record.
    pub fn sequence(&self) -> u128 {
        record_sequence(self.block_number, self.log_index)
    }
}

/// `block_number * 100000 + log_index`.
pub fn record_sequence(block_number: u64, log_index: u64) -> u128 {
    u128::from(block_number) * SEQUENCE_BLOCK_MULTIPLIER + u128::from(log_index)
}

/// Picks the payload size limit in force at a consensus-chain height.
pub fn state_sync_size_limit(
    height: u64,
    override_height: u64,
    max_size: usize,
    legacy_max_size: usize,
) -> usize {
    if height > override_height {
        max_size
    } else {
        legacy_max_size
    }
}

/// Returns `data` unchanged if it fits in `limit` bytes, and an empty payload otherwise.
pub fn bounded_record_data(data: Bytes, limit: usize) -> Bytes {
    if data.len() > limit {
        Bytes::new()
    } else {
        data
    }
}

/// Storage for state-sync records on the consensus chain.
pub trait RecordLedger {
    /// Looks a record up by id.
    fn record(&self, id: u64) -> Option<EventRecord>;

    /// Whether a sequence was already consumed.
    fn has_sequence(&self, sequence: u128) -> bool;

    /// Stores a record and consumes its sequence.
    fn insert_record(&mut self, record: EventRecord);
}

/// Outcome of applying a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record was stored.
    Recorded,
    /// The id or the sequence was already seen; nothing changed.
    AlreadyProcessed,
}

/// The record handler. Applying the same record twice stores it once.
pub fn apply_event_record<L: RecordLedger>(ledger: &mut L, record: EventRecord) -> RecordOutcome {
    if ledger.record(record.id).is_some() || ledger.has_sequence(record.sequence()) {
        return RecordOutcome::AlreadyProcessed;
    }
    ledger.insert_record(record);
    RecordOutcome::Recorded
}

/// Amino field key of a record message's 32-byte `tx_hash` (field 2, length-delimited).
const TX_HASH_FIELD: [u8; 2] = [0x12, 0x20];

/// Amino field key of a record message's `log_index` (field 3, varint).
const LOG_INDEX_KEY: u8 = 0x18;

/// Whether an encoded consensus-chain transaction carries the event record for
/// `(tx_hash, log_index)`.
///
/// A zero `log_index` is omitted from the encoding, so the hash must not be followed by a
/// log index field in that case.
pub fn carries_event_record(tx: &[u8], tx_hash: &B256, log_index: u64) -> bool {
    let mut needle = TX_HASH_FIELD.to_vec();
    needle.extend_from_slice(tx_hash.as_slice());

    let mut expected_index = Vec::new();
    if log_index > 0 {
        expected_index.push(LOG_INDEX_KEY);
        push_uvarint(&mut expected_index, log_index);
    }

    tx.windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle.as_slice())
        .any(|(position, _)| {
            let rest = &tx[position + needle.len()..];
            if log_index > 0 {
                rest.starts_with(&expected_index)
            } else {
                rest.first() != Some(&LOG_INDEX_KEY)
            }
        })
}

fn push_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
