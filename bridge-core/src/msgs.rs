//! # Consensus-Chain Messages
//!
//! Every transaction the relayer sends to the consensus chain carries exactly one
//! [`BridgeMsg`]. Messages serialize in the chain's `{type, value}` JSON form, and
//! [`sign_bytes`] produces the canonical sorted-key document the signer commits to.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::string_u64;

/// Proposes a checkpoint over `[start_block, end_block]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCheckpoint {
    /// Proposing validator.
    pub proposer: Address,
    /// First child block.
    #[serde(with = "string_u64")]
    pub start_block: u64,
    /// Last child block.
    #[serde(with = "string_u64")]
    pub end_block: u64,
    /// Header Merkle root.
    pub root_hash: B256,
    /// Dividend account root.
    pub account_root_hash: B256,
    /// Child chain id.
    pub bor_chain_id: String,
}

/// Acknowledges a checkpoint the root chain committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCheckpointAck {
    /// Sender.
    pub from: Address,
    /// Root-chain header block id.
    #[serde(with = "string_u64")]
    pub number: u64,
    /// Proposer recorded on the root chain.
    pub proposer: Address,
    /// First child block.
    #[serde(with = "string_u64")]
    pub start_block: u64,
    /// Last child block.
    #[serde(with = "string_u64")]
    pub end_block: u64,
    /// Header Merkle root.
    pub root_hash: B256,
    /// Root-chain transaction carrying `NewHeaderBlock`.
    pub tx_hash: B256,
    /// Index of the `NewHeaderBlock` log.
    #[serde(with = "string_u64")]
    pub log_index: u64,
}

/// Signals that no checkpoint arrived within the expected window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCheckpointNoAck {
    /// Sender.
    pub from: Address,
}

/// Relays a root-chain `StateSynced` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgEventRecord {
    /// Sender.
    pub from: Address,
    /// Root-chain transaction hash.
    pub tx_hash: B256,
    /// Log index.
    #[serde(with = "string_u64")]
    pub log_index: u64,
    /// Root-chain block number.
    #[serde(with = "string_u64")]
    pub block_number: u64,
    /// State id.
    #[serde(with = "string_u64")]
    pub id: u64,
    /// Receiving contract on the child chain.
    pub contract_address: Address,
    /// Payload.
    pub data: Bytes,
    /// Child chain id.
    pub chain_id: String,
}

/// Credits a fee top-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTopup {
    /// Sender.
    pub from_address: Address,
    /// Account being credited.
    pub user: Address,
    /// Amount topped up.
    pub fee: U256,
    /// Root-chain transaction hash.
    pub tx_hash: B256,
    /// Log index.
    #[serde(with = "string_u64")]
    pub log_index: u64,
    /// Root-chain block number.
    #[serde(with = "string_u64")]
    pub block_number: u64,
}

/// Fields shared by the staking messages: who sent it and which root-chain log it relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingEventRef {
    /// Sender.
    pub from: Address,
    /// Validator id.
    #[serde(rename = "ID", with = "string_u64")]
    pub id: u64,
    /// Root-chain transaction hash.
    pub tx_hash: B256,
    /// Log index.
    #[serde(with = "string_u64")]
    pub log_index: u64,
    /// Root-chain block number.
    #[serde(with = "string_u64")]
    pub block_number: u64,
    /// Staking nonce carried by the event.
    #[serde(with = "string_u64")]
    pub nonce: u64,
}

/// Adds a newly staked validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgValidatorJoin {
    /// Event reference.
    #[serde(flatten)]
    pub event: StakingEventRef,
    /// Epoch the validator becomes active.
    #[serde(with = "string_u64")]
    pub activation_epoch: u64,
    /// Staked amount.
    pub amount: U256,
    /// Uncompressed signer public key.
    pub signer_pub_key: Bytes,
}

/// Starts a validator's exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgValidatorExit {
    /// Event reference.
    #[serde(flatten)]
    pub event: StakingEventRef,
    /// Epoch the validator stops validating.
    #[serde(with = "string_u64")]
    pub deactivation_epoch: u64,
}

/// Updates a validator's stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgStakeUpdate {
    /// Event reference.
    #[serde(flatten)]
    pub event: StakingEventRef,
    /// New total stake.
    pub new_amount: U256,
}

/// Rotates a validator's signer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSignerUpdate {
    /// Event reference.
    #[serde(flatten)]
    pub event: StakingEventRef,
    /// Uncompressed public key of the new signer.
    pub new_signer_pub_key: Bytes,
}

/// Proposes a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMilestone {
    /// Proposing validator.
    pub proposer: Address,
    /// First child block.
    #[serde(with = "string_u64")]
    pub start_block: u64,
    /// Last child block.
    #[serde(with = "string_u64")]
    pub end_block: u64,
    /// Header Merkle root.
    pub hash: B256,
    /// Child chain id.
    pub bor_chain_id: String,
    /// Proposal id.
    pub milestone_id: String,
}

/// Signals that milestone production has stalled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMilestoneTimeout {
    /// Sender.
    pub from: Address,
}

/// A message for the consensus chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum BridgeMsg {
    /// Checkpoint proposal.
    #[serde(rename = "checkpoint/MsgCheckpoint")]
    Checkpoint(MsgCheckpoint),
    /// Checkpoint acknowledgment.
    #[serde(rename = "checkpoint/MsgCheckpointACK")]
    CheckpointAck(MsgCheckpointAck),
    /// Checkpoint no-acknowledgment.
    #[serde(rename = "checkpoint/MsgCheckpointNoACK")]
    CheckpointNoAck(MsgCheckpointNoAck),
    /// State-sync record.
    #[serde(rename = "clerk/MsgEventRecord")]
    EventRecord(MsgEventRecord),
    /// Fee top-up.
    #[serde(rename = "topup/MsgTopup")]
    Topup(MsgTopup),
    /// Validator join.
    #[serde(rename = "staking/MsgValidatorJoin")]
    ValidatorJoin(MsgValidatorJoin),
    /// Validator exit.
    #[serde(rename = "staking/MsgValidatorExit")]
    ValidatorExit(MsgValidatorExit),
    /// Stake update.
    #[serde(rename = "staking/MsgStakeUpdate")]
    StakeUpdate(MsgStakeUpdate),
    /// Signer update.
    #[serde(rename = "staking/MsgSignerUpdate")]
    SignerUpdate(MsgSignerUpdate),
    /// Milestone proposal.
    #[serde(rename = "checkpoint/MsgMilestone")]
    Milestone(MsgMilestone),
    /// Milestone timeout.
    #[serde(rename = "checkpoint/MsgMilestoneTimeout")]
    MilestoneTimeout(MsgMilestoneTimeout),
}

impl BridgeMsg {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeMsg::Checkpoint(_) => "checkpoint",
            BridgeMsg::CheckpointAck(_) => "checkpoint-ack",
            BridgeMsg::CheckpointNoAck(_) => "checkpoint-no-ack",
            BridgeMsg::EventRecord(_) => "event-record",
            BridgeMsg::Topup(_) => "topup",
            BridgeMsg::ValidatorJoin(_) => "validator-join",
            BridgeMsg::ValidatorExit(_) => "validator-exit",
            BridgeMsg::StakeUpdate(_) => "stake-update",
            BridgeMsg::SignerUpdate(_) => "signer-update",
            BridgeMsg::Milestone(_) => "milestone",
            BridgeMsg::MilestoneTimeout(_) => "milestone-timeout",
        }
    }
}

/// Fee attached to a consensus-chain transaction. The chain charges a flat fee, so the
/// document only carries an empty amount and zero gas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdFee {
    /// Fee coins.
    pub amount: Vec<serde_json::Value>,
    /// Gas limit.
    #[serde(with = "string_u64")]
    pub gas: u64,
}

/// The document a consensus-chain transaction signature commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdSignDoc<'a> {
    /// Account number of the signer.
    #[serde(with = "string_u64")]
    pub account_number: u64,
    /// Consensus chain id.
    pub chain_id: &'a str,
    /// Fee.
    pub fee: StdFee,
    /// Memo.
    pub memo: &'a str,
    /// The messages, one per transaction here.
    pub msgs: Vec<&'a BridgeMsg>,
    /// Sequence of the signer.
    #[serde(with = "string_u64")]
    pub sequence: u64,
}

/// Canonical sign bytes: the sign document as JSON with every object's keys sorted.
pub fn sign_bytes(doc: &StdSignDoc<'_>) -> Result<Vec<u8>, serde_json::Error> {
    // `serde_json::Value` objects are ordered maps, so the round trip sorts all keys.
    let value = serde_json::to_value(doc)?;
    serde_json::to_vec(&value)
}

/// A signed consensus-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdTx {
    /// The message.
    pub msg: BridgeMsg,
    /// Base64 encoded 65-byte recoverable signature.
    pub signature: String,
    /// Memo.
    #[serde(default)]
    pub memo: String,
}
