//! Validator and account views of the consensus chain, and the proposer-rotation checks
//! built on them.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::string_u64;

/// A validator as reported by the consensus chain's staking module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Validator id assigned by the root-chain staking contract.
    #[serde(rename = "ID", with = "string_u64")]
    pub id: u64,
    /// Signer address the validator signs consensus messages with.
    pub signer: Address,
    /// Voting power.
    #[serde(default, with = "string_u64")]
    pub power: u64,
    /// Whether the validator is jailed.
    #[serde(default)]
    pub jailed: bool,
}

/// Whether `signer` heads the proposer list.
pub fn is_first_proposer(proposers: &[Validator], signer: &Address) -> bool {
    proposers
        .first()
        .is_some_and(|proposer| &proposer.signer == signer)
}

/// Whether `signer` holds one of the `count` rotation slots after the current proposer.
///
/// `proposers` is expected to hold `count + 1` entries, the current proposer first.
pub fn in_proposer_rotation(proposers: &[Validator], count: u64, signer: &Address) -> bool {
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    proposers
        .iter()
        .skip(1)
        .take(count)
        .any(|proposer| &proposer.signer == signer)
}

/// Whether `signer` appears anywhere in the proposer list.
pub fn in_proposer_list(proposers: &[Validator], signer: &Address) -> bool {
    proposers.iter().any(|proposer| &proposer.signer == signer)
}

/// The local signer's consensus-chain account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account address.
    pub address: Address,
    /// Account number fixed at creation.
    #[serde(default, with = "string_u64")]
    pub account_number: u64,
    /// Next usable sequence.
    #[serde(default, with = "string_u64")]
    pub sequence: u64,
}

/// Accounts are returned either bare or wrapped in a `{type, value}` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum AccountRepr {
    Typed { value: Account },
    Plain(Account),
}

impl Account {
    /// Parses an account from either of its JSON representations.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_value(value)? {
            AccountRepr::Typed { value } => value,
            AccountRepr::Plain(account) => account,
        })
    }
}
