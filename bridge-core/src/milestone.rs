//! Milestones and the rules every validator applies to them.
//!
//! A milestone is voted on in two phases. During the side-transaction vote each validator
//! re-derives the proposal independently with [`validate_milestone`]. Once the vote is
//! tallied, [`apply_milestone`] decides whether the milestone is persisted to the
//! [`MilestoneLedger`] or recorded as a no-ack.
//!
//! The relayer proposes milestones and checks its own proposals with
//! [`validate_milestone`]. [`apply_milestone`] is the rule for a component that keeps the
//! milestone ledger.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::string_u64;

/// A persisted fast-finality claim over `[start_block, end_block]` of the child chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Validator that proposed the milestone.
    pub proposer: Address,
    /// First child block.
    #[serde(with = "string_u64")]
    pub start_block: u64,
    /// Last child block.
    #[serde(with = "string_u64")]
    pub end_block: u64,
    /// Header Merkle root over the range.
    pub hash: B256,
    /// Child chain id.
    #[serde(default)]
    pub bor_chain_id: String,
    /// Proposal id, `uuid - endBlockHash`.
    #[serde(default)]
    pub milestone_id: String,
    /// Consensus-chain time at which the milestone was stored.
    #[serde(default, with = "string_u64")]
    pub timestamp: u64,
}

/// A milestone as proposed, before it has a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneProposal {
    /// Proposing validator.
    pub proposer: Address,
    /// First child block.
    pub start_block: u64,
    /// Last child block.
    pub end_block: u64,
    /// Proposed header Merkle root.
    pub hash: B256,
    /// Child chain id.
    pub bor_chain_id: String,
    /// Proposal id.
    pub milestone_id: String,
}

impl MilestoneProposal {
    /// Converts the proposal into a stored milestone.
    pub fn into_milestone(self, timestamp: u64) -> Milestone {
        Milestone {
            proposer: self.proposer,
            start_block: self.start_block,
            end_block: self.end_block,
            hash: self.hash,
            bor_chain_id: self.bor_chain_id,
            milestone_id: self.milestone_id,
            timestamp,
        }
    }
}

/// Builds a milestone id from a random prefix and the hash of the range's last block.
pub fn milestone_id(prefix: &str, end_block_hash: &B256) -> String {
    format!("{prefix} - {}", hex::encode(end_block_hash))
}

/// A side-transaction vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    /// The fact was re-derived and matches.
    Yes,
    /// The fact was re-derived and does not match, or could not be derived.
    No,
    /// The validator abstained.
    Skip,
}

/// Why a validator votes against a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneRejection {
    /// `end_block != start_block + sprint_length - 1`.
    InvalidLength,
    /// The range does not follow the last stored milestone.
    NotContiguous,
    /// The child-chain blocks are not available locally yet.
    BlocksUnavailable,
    /// The locally computed root differs from the proposed one.
    RootMismatch,
}

/// Whether `[start, end]` spans exactly one sprint.
pub fn has_sprint_length(start: u64, end: u64, sprint_length: u64) -> bool {
    sprint_length > 0 && start.checked_add(sprint_length - 1) == Some(end)
}

/// The side-transaction check.
///
/// `local_root` is the root this validator computed over `[start, end]`, or `None` when the
/// blocks are not yet observed locally.
pub fn validate_milestone(
    proposal: &MilestoneProposal,
    last: Option<&Milestone>,
    sprint_length: u64,
    local_root: Option<B256>,
) -> Result<(), MilestoneRejection> {
    if !has_sprint_length(proposal.start_block, proposal.end_block, sprint_length) {
        return Err(MilestoneRejection::InvalidLength);
    }

    if let Some(last) = last {
        if proposal.start_block != last.end_block + 1 {
            return Err(MilestoneRejection::NotContiguous);
        }
    }

    match local_root {
        None => Err(MilestoneRejection::BlocksUnavailable),
        Some(root) if root != proposal.hash => Err(MilestoneRejection::RootMismatch),
        Some(_) => Ok(()),
    }
}

/// The vote a validator casts for a proposal.
pub fn vote_on_milestone(
    proposal: &MilestoneProposal,
    last: Option<&Milestone>,
    sprint_length: u64,
    local_root: Option<B256>,
) -> Vote {
    match validate_milestone(proposal, last, sprint_length, local_root) {
        Ok(()) => Vote::Yes,
        Err(_) => Vote::No,
    }
}

/// Storage for milestones on the consensus chain.
pub trait MilestoneLedger {
    /// The most recently stored milestone.
    fn last_milestone(&self) -> Option<Milestone>;

    /// Number of milestones stored.
    fn milestone_count(&self) -> u64;

    /// Stores a milestone, making it the current one.
    fn add_milestone(&mut self, milestone: Milestone);

    /// Records that the proposal with `milestone_id` was not accepted.
    fn set_no_ack_milestone(&mut self, milestone_id: &str);
}

/// Why a voted milestone was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneSkip {
    /// The vote did not pass.
    NotApproved,
    /// The proposal starts inside the current milestone.
    Overlapping,
    /// The proposal leaves a gap after the current milestone.
    NotContiguous,
    /// The first milestone does not start at the genesis height.
    NotGenesis,
}

/// Outcome of applying a voted milestone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MilestoneOutcome {
    /// The milestone was stored.
    Added(Milestone),
    /// The milestone was recorded as a no-ack.
    Skipped(MilestoneSkip),
}

/// The post-vote handler.
pub fn apply_milestone<L: MilestoneLedger>(
    ledger: &mut L,
    proposal: MilestoneProposal,
    vote: Vote,
    genesis_height: u64,
    timestamp: u64,
) -> MilestoneOutcome {
    let skip = if vote != Vote::Yes {
        Some(MilestoneSkip::NotApproved)
    } else {
        match ledger.last_milestone() {
            Some(last) if last.end_block > proposal.start_block => {
                Some(MilestoneSkip::Overlapping)
            }
            Some(last) if last.end_block + 1 != proposal.start_block => {
                Some(MilestoneSkip::NotContiguous)
            }
            Some(_) => None,
            None if proposal.start_block != genesis_height => Some(MilestoneSkip::NotGenesis),
            None => None,
        }
    };

    if let Some(reason) = skip {
        ledger.set_no_ack_milestone(&proposal.milestone_id);
        return MilestoneOutcome::Skipped(reason);
    }

    let milestone = proposal.into_milestone(timestamp);
    ledger.add_milestone(milestone.clone());
    MilestoneOutcome::Added(milestone)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A [`MilestoneLedger`] held in memory.
    #[derive(Debug, Clone, Default)]
    struct InMemoryMilestoneLedger {
        milestones: Vec<Milestone>,
        no_acks: Vec<String>,
    }

    impl InMemoryMilestoneLedger {
        /// Ids recorded as no-acks, oldest first.
        fn no_ack_milestones(&self) -> &[String] {
            &self.no_acks
        }
    }

    impl MilestoneLedger for InMemoryMilestoneLedger {
        fn last_milestone(&self) -> Option<Milestone> {
            self.milestones.last().cloned()
        }

        fn milestone_count(&self) -> u64 {
            self.milestones.len() as u64
        }

        fn add_milestone(&mut self, milestone: Milestone) {
            self.milestones.push(milestone);
        }

        fn set_no_ack_milestone(&mut self, milestone_id: &str) {
            self.no_acks.push(milestone_id.to_string());
        }
    }

    const SPRINT: u64 = 64;

    fn proposal(start: u64, end: u64) -> MilestoneProposal {
        MilestoneProposal {
            proposer: Address::repeat_byte(1),
            start_block: start,
            end_block: end,
            hash: B256::repeat_byte(7),
            bor_chain_id: "15001".into(),
            milestone_id: format!("id-{start}"),
        }
    }

    fn stored(start: u64, end: u64) -> Milestone {
        proposal(start, end).into_milestone(1)
    }

    #[test]
    fn we_can_accept_a_milestone_of_exactly_one_sprint() {
        let root = Some(B256::repeat_byte(7));
        assert_eq!(validate_milestone(&proposal(0, 63), None, SPRINT, root), Ok(()));
        assert_eq!(vote_on_milestone(&proposal(0, 63), None, SPRINT, root), Vote::Yes);
    }

    #[test]
    fn we_cannot_accept_a_milestone_of_the_wrong_length() {
        let root = Some(B256::repeat_byte(7));
        assert_eq!(
            validate_milestone(&proposal(0, 62), None, SPRINT, root),
            Err(MilestoneRejection::InvalidLength)
        );
        assert_eq!(
            validate_milestone(&proposal(0, 64), None, SPRINT, root),
            Err(MilestoneRejection::InvalidLength)
        );
        assert!(!has_sprint_length(0, 0, 0));
    }

    #[test]
    fn we_cannot_accept_a_milestone_out_of_continuity() {
        let root = Some(B256::repeat_byte(7));
        let last = stored(0, 63);
        assert_eq!(
            validate_milestone(&proposal(128, 191), Some(&last), SPRINT, root),
            Err(MilestoneRejection::NotContiguous)
        );
        assert_eq!(
            validate_milestone(&proposal(64, 127), Some(&last), SPRINT, root),
            Ok(())
        );
    }

    #[test]
    fn we_cannot_accept_a_milestone_without_local_blocks_or_with_wrong_root() {
        assert_eq!(
            validate_milestone(&proposal(0, 63), None, SPRINT, None),
            Err(MilestoneRejection::BlocksUnavailable)
        );
        assert_eq!(
            validate_milestone(&proposal(0, 63), None, SPRINT, Some(B256::repeat_byte(8))),
            Err(MilestoneRejection::RootMismatch)
        );
        assert_eq!(vote_on_milestone(&proposal(0, 63), None, SPRINT, None), Vote::No);
    }

    #[test]
    fn we_can_store_contiguous_approved_milestones() {
        let mut ledger = InMemoryMilestoneLedger::default();

        let first = apply_milestone(&mut ledger, proposal(0, 63), Vote::Yes, 0, 10);
        assert!(matches!(first, MilestoneOutcome::Added(ref m) if m.timestamp == 10));

        let second = apply_milestone(&mut ledger, proposal(64, 127), Vote::Yes, 0, 20);
        assert!(matches!(second, MilestoneOutcome::Added(_)));

        assert_eq!(ledger.milestone_count(), 2);
        assert_eq!(ledger.last_milestone().unwrap().end_block, 127);
        assert!(ledger.no_ack_milestones().is_empty());
    }

    #[test]
    fn we_cannot_store_an_unapproved_milestone() {
        let mut ledger = InMemoryMilestoneLedger::default();
        let outcome = apply_milestone(&mut ledger, proposal(0, 63), Vote::No, 0, 10);
        assert_eq!(outcome, MilestoneOutcome::Skipped(MilestoneSkip::NotApproved));
        assert_eq!(ledger.milestone_count(), 0);
        assert_eq!(ledger.no_ack_milestones(), ["id-0".to_string()]);
    }

    #[test]
    fn we_cannot_store_overlapping_or_gapped_milestones() {
        let mut ledger = InMemoryMilestoneLedger::default();
        ledger.add_milestone(stored(0, 63));

        let overlap = apply_milestone(&mut ledger, proposal(32, 95), Vote::Yes, 0, 10);
        assert_eq!(overlap, MilestoneOutcome::Skipped(MilestoneSkip::Overlapping));

        let gap = apply_milestone(&mut ledger, proposal(65, 128), Vote::Yes, 0, 10);
        assert_eq!(gap, MilestoneOutcome::Skipped(MilestoneSkip::NotContiguous));

        assert_eq!(ledger.milestone_count(), 1);
        assert_eq!(ledger.no_ack_milestones().len(), 2);
    }

    #[test]
    fn we_cannot_store_a_first_milestone_away_from_genesis() {
        let mut ledger = InMemoryMilestoneLedger::default();
        let outcome = apply_milestone(&mut ledger, proposal(64, 127), Vote::Yes, 0, 10);
        assert_eq!(outcome, MilestoneOutcome::Skipped(MilestoneSkip::NotGenesis));

        let at_genesis = apply_milestone(&mut ledger, proposal(64, 127), Vote::Yes, 64, 10);
        assert!(matches!(at_genesis, MilestoneOutcome::Added(_)));
    }

    #[test]
    fn we_can_build_milestone_ids() {
        let id = milestone_id("abc", &B256::repeat_byte(0xff));
        assert_eq!(id, format!("abc - {}", "ff".repeat(32)));
    }

    #[test]
    fn we_can_parse_a_milestone_response() {
        let milestone: Milestone = serde_json::from_str(
            r#"{"proposer":"0x0101010101010101010101010101010101010101","start_block":"0","end_block":"63","hash":"0x0707070707070707070707070707070707070707070707070707070707070707","bor_chain_id":"15001","milestone_id":"id-0","timestamp":"1"}"#,
        )
        .unwrap();
        assert_eq!(milestone, stored(0, 63));
    }
}
