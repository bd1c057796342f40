//! # Checkpoint Lifecycle Rules
//!
//! The pure half of the checkpoint engine. Given root-chain and consensus-chain state that the
//! relayer fetched, these functions decide what the relayer should do next.
//!
//! ## Features
//! - **Range selection**: [`next_expected_checkpoint`] aligns the next range to the average
//!   checkpoint length and caps it at the maximum length.
//! - **Force push**: a degenerate range is stretched to the child-chain head once the last
//!   checkpoint is older than twice the maximum length in seconds.
//! - **No-ack timing**: [`no_ack_index`] and [`no_ack_rate_limited`] drive the no-ack timer.
//! - **Commit decision**: [`commit_decision`] compares a confirmed range with the root chain's
//!   last committed child block.

use std::time::Duration;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::string_u64;

/// Checkpoint parameters held by the consensus chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointParams {
    /// Window after a checkpoint during which no further checkpoint or no-ack is accepted,
    /// in nanoseconds.
    #[serde(rename = "checkpoint_buffer_time", with = "string_u64")]
    pub checkpoint_buffer_time_nanos: u64,
    /// Preferred checkpoint length in blocks.
    #[serde(with = "string_u64")]
    pub avg_checkpoint_length: u64,
    /// Hard maximum checkpoint length in blocks.
    #[serde(with = "string_u64")]
    pub max_checkpoint_length: u64,
    /// Spacing between header block ids on the root chain.
    #[serde(rename = "child_chain_block_interval", with = "string_u64")]
    pub child_block_interval: u64,
}

impl CheckpointParams {
    /// The checkpoint buffer window.
    pub fn checkpoint_buffer_time(&self) -> Duration {
        Duration::from_nanos(self.checkpoint_buffer_time_nanos)
    }

    /// How old the last checkpoint must be, in seconds, before a degenerate range is forced.
    pub fn force_push_interval(&self) -> u64 {
        self.max_checkpoint_length.saturating_mul(2)
    }
}

/// A header block as stored by the root-chain checkpoint contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderBlock {
    /// Merkle root over the checkpointed child blocks.
    pub root: B256,
    /// First child block in the range.
    pub start: u64,
    /// Last child block in the range.
    pub end: u64,
    /// Root-chain timestamp at which the header block was created.
    pub created_at: u64,
    /// Proposer that submitted the header block.
    pub proposer: Address,
}

/// The id of the last submitted header block given the contract's `currentHeaderBlock`.
///
/// Header block ids are multiples of `interval`. An untouched contract yields id `0`, which
/// reads back as an all-zero header block.
pub fn last_header_block_id(current_header_block: u64, interval: u64) -> u64 {
    if interval == 0 {
        return 0;
    }
    current_header_block / interval * interval
}

/// A candidate checkpoint range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRange {
    /// First child block.
    pub start: u64,
    /// Last child block.
    pub end: u64,
    /// Whether `end` was stretched to the child-chain head.
    pub forced: bool,
}

impl CheckpointRange {
    /// Whether the range is worth proposing.
    pub fn is_submittable(&self) -> bool {
        self.end != 0 && self.start < self.end
    }
}

/// Snapshot of the root-chain checkpoint contract together with the next range it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractCheckpointState {
    /// Start of the last submitted range.
    pub start: u64,
    /// End of the last submitted range.
    pub end: u64,
    /// The contract's next header block id.
    pub current_header_block: u64,
    /// Creation time of the last header block.
    pub created_at: u64,
    /// The next eligible range.
    pub next: CheckpointRange,
}

impl ContractCheckpointState {
    /// Evaluates the next eligible range against the last submitted header block.
    pub fn evaluate(
        last: &HeaderBlock,
        current_header_block: u64,
        latest_child_block: u64,
        params: &CheckpointParams,
        now: u64,
    ) -> Self {
        Self {
            start: last.start,
            end: last.end,
            current_header_block,
            created_at: last.created_at,
            next: next_expected_checkpoint(
                last.end,
                latest_child_block,
                last.created_at,
                params,
                now,
            ),
        }
    }
}

/// Computes the next checkpoint range.
///
/// `last_end` is the end of the last checkpoint committed on the root chain, `0` when none
/// exists. `last_created_at` and `now` are unix seconds.
pub fn next_expected_checkpoint(
    last_end: u64,
    latest: u64,
    last_created_at: u64,
    params: &CheckpointParams,
    now: u64,
) -> CheckpointRange {
    let start = if last_end > 0 { last_end + 1 } else { 0 };

    let diff = if latest >= start { latest - start + 1 } else { 0 };

    let mut expected_diff = 0;
    if diff > 0 && params.avg_checkpoint_length > 0 {
        expected_diff = diff - diff % params.avg_checkpoint_length;
        if expected_diff > 0 {
            expected_diff -= 1;
        }
        expected_diff = expected_diff.min(params.max_checkpoint_length.saturating_sub(1));
    }

    let end = start + expected_diff;

    let degenerate =
        end == 0 || end == start || (diff > 0 && diff < params.avg_checkpoint_length);
    let elapsed = now.saturating_sub(last_created_at);

    if degenerate && elapsed > params.force_push_interval() {
        return CheckpointRange {
            start,
            end: latest,
            forced: true,
        };
    }

    CheckpointRange {
        start,
        end,
        forced: false,
    }
}

/// The rotation offset for the no-ack timer, `0` meaning nothing to do.
///
/// With no checkpoint on the root chain yet, the first rotation slot is always due.
pub fn no_ack_index(last_created_at: u64, now: u64, no_ack_wait_time: u64) -> u64 {
    if last_created_at == 0 {
        return 1;
    }
    if no_ack_wait_time == 0 {
        return 0;
    }

    let elapsed = now.saturating_sub(last_created_at);
    if elapsed >= no_ack_wait_time {
        elapsed / no_ack_wait_time
    } else {
        0
    }
}

/// Whether a no-ack was sent too recently to send another.
pub fn no_ack_rate_limited(last_no_ack: u64, now: u64, buffer_time: Duration) -> bool {
    last_no_ack != 0 && now.saturating_sub(last_no_ack) < buffer_time.as_secs()
}

/// What to do with a checkpoint the consensus chain confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    /// The root chain is exactly one block behind `start`; commit now.
    Submit,
    /// The root chain already covers `start`.
    AlreadyCommitted,
    /// The root chain is behind by more than the range; nothing sensible to do.
    Behind,
}

/// Compares a confirmed range start with the root chain's last committed child block.
pub fn commit_decision(last_child_block: u64, start: u64) -> CommitDecision {
    if last_child_block + 1 == start || (last_child_block == 0 && start == 0) {
        CommitDecision::Submit
    } else if last_child_block > start {
        CommitDecision::AlreadyCommitted
    } else {
        CommitDecision::Behind
    }
}

/// The checkpoint held in the consensus chain's buffer awaiting root-chain commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedCheckpoint {
    /// Validator that proposed the checkpoint.
    pub proposer: Address,
    /// First child block.
    #[serde(with = "string_u64")]
    pub start_block: u64,
    /// Last child block.
    #[serde(with = "string_u64")]
    pub end_block: u64,
    /// Header Merkle root.
    pub root_hash: B256,
    /// Child chain id.
    #[serde(default)]
    pub bor_chain_id: String,
    /// Time the checkpoint entered the buffer.
    #[serde(default, with = "string_u64")]
    pub timestamp: u64,
}

impl BufferedCheckpoint {
    /// Whether this buffered entry covers exactly `[start, end]`.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.start_block == start && self.end_block == end
    }
}

/// Whether a root-chain `NewHeaderBlock` over `[start, end]` should be acknowledged.
///
/// Only a buffered checkpoint matching the committed range is acknowledged. An empty buffer
/// means the acknowledgment already landed.
pub fn should_acknowledge(buffered: Option<&BufferedCheckpoint>, start: u64, end: u64) -> bool {
    buffered.is_some_and(|checkpoint| checkpoint.covers(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn params() -> CheckpointParams {
        CheckpointParams {
            checkpoint_buffer_time_nanos: 1_000_000_000_000,
            avg_checkpoint_length: 256,
            max_checkpoint_length: 1024,
            child_block_interval: 10_000,
        }
    }

    fn range(last_end: u64, latest: u64, created_at: u64) -> CheckpointRange {
        next_expected_checkpoint(last_end, latest, created_at, &params(), NOW)
    }

    #[test]
    fn we_can_parse_checkpoint_params() {
        let parsed: CheckpointParams = serde_json::from_str(
            r#"{"checkpoint_buffer_time":"1000000000000","avg_checkpoint_length":"256","max_checkpoint_length":"1024","child_chain_block_interval":"10000"}"#,
        )
        .unwrap();
        assert_eq!(parsed, params());
        assert_eq!(parsed.checkpoint_buffer_time(), Duration::from_secs(1000));
        assert_eq!(parsed.force_push_interval(), 2048);
    }

    #[test]
    fn we_can_select_ranges_aligned_to_the_average_length() {
        let recent = NOW - 10;
        // (last_end, latest, expected start, expected end)
        let cases = [
            (0, 255, 0, 255),
            (255, 511, 256, 511),
            (255, 512, 256, 511),
            (255, 767, 256, 767),
            (255, 2000, 256, 1279),
            (1279, 100_000, 1280, 2303),
        ];

        for (last_end, latest, start, end) in cases {
            let next = range(last_end, latest, recent);
            assert_eq!(
                (next.start, next.end, next.forced),
                (start, end, false),
                "last_end={last_end} latest={latest}"
            );
            assert!(next.end - next.start + 1 <= params().max_checkpoint_length);
            assert!(next.is_submittable());
        }
    }

    #[test]
    fn we_cannot_select_a_range_when_diff_is_zero() {
        let next = range(511, 400, NOW - 10);
        assert_eq!((next.start, next.end), (512, 512));
        assert!(!next.is_submittable());
    }

    #[test]
    fn we_cannot_select_a_range_shorter_than_average_without_stall() {
        let next = range(255, 300, NOW - 10);
        assert_eq!((next.start, next.end, next.forced), (256, 256, false));
        assert!(!next.is_submittable());
    }

    #[test]
    fn we_cannot_select_a_range_before_the_first_average_window() {
        let next = range(0, 0, NOW - 10);
        assert_eq!((next.start, next.end, next.forced), (0, 0, false));
        assert!(!next.is_submittable());
    }

    #[test]
    fn we_can_force_push_a_short_range_after_a_stall() {
        let stalled = NOW - 2049;
        let next = range(255, 300, stalled);
        assert_eq!((next.start, next.end, next.forced), (256, 300, true));
        assert!(next.is_submittable());
    }

    #[test]
    fn force_push_requires_more_than_twice_max_length_seconds() {
        let next = range(255, 300, NOW - 2048);
        assert!(!next.forced);
    }

    #[test]
    fn force_push_never_fires_on_a_full_range() {
        let next = range(255, 2000, NOW - 100_000);
        assert_eq!((next.start, next.end, next.forced), (256, 1279, false));
    }

    #[test]
    fn forced_range_behind_start_is_not_submittable() {
        let next = range(511, 400, NOW - 100_000);
        assert!(next.forced);
        assert_eq!(next.end, 400);
        assert!(!next.is_submittable());
    }

    #[test]
    fn we_can_evaluate_contract_state() {
        let last = HeaderBlock {
            start: 0,
            end: 255,
            created_at: NOW - 10,
            ..Default::default()
        };
        let state = ContractCheckpointState::evaluate(&last, 20_000, 511, &params(), NOW);
        assert_eq!(state.end, 255);
        assert_eq!(state.current_header_block, 20_000);
        assert_eq!((state.next.start, state.next.end), (256, 511));
    }

    #[test]
    fn we_can_derive_last_header_block_id() {
        assert_eq!(last_header_block_id(10_000, 10_000), 10_000);
        assert_eq!(last_header_block_id(30_500, 10_000), 30_000);
        assert_eq!(last_header_block_id(0, 10_000), 0);
        assert_eq!(last_header_block_id(30_000, 0), 0);
    }

    #[test]
    fn we_can_compute_no_ack_index() {
        assert_eq!(no_ack_index(0, NOW, 1800), 1);
        assert_eq!(no_ack_index(NOW - 100, NOW, 1800), 0);
        assert_eq!(no_ack_index(NOW - 1800, NOW, 1800), 1);
        assert_eq!(no_ack_index(NOW - 3601, NOW, 1800), 2);
    }

    #[test]
    fn no_ack_is_rate_limited_within_buffer_time() {
        let buffer = Duration::from_secs(1000);
        assert!(!no_ack_rate_limited(0, NOW, buffer));
        assert!(no_ack_rate_limited(NOW - 999, NOW, buffer));
        assert!(!no_ack_rate_limited(NOW - 1000, NOW, buffer));
    }

    #[test]
    fn we_can_decide_whether_to_commit() {
        assert_eq!(commit_decision(0, 0), CommitDecision::Submit);
        assert_eq!(commit_decision(255, 256), CommitDecision::Submit);
        assert_eq!(commit_decision(511, 256), CommitDecision::AlreadyCommitted);
        assert_eq!(commit_decision(100, 256), CommitDecision::Behind);
    }

    #[test]
    fn we_can_gate_acknowledgments_on_the_buffered_range() {
        let buffered: BufferedCheckpoint = serde_json::from_str(
            r#"{"proposer":"0x0000000000000000000000000000000000000001","start_block":"256","end_block":511,"root_hash":"0x0000000000000000000000000000000000000000000000000000000000000002","bor_chain_id":"15001","timestamp":"1700000000"}"#,
        )
        .unwrap();

        assert!(should_acknowledge(Some(&buffered), 256, 511));
        assert!(!should_acknowledge(Some(&buffered), 256, 767));
        assert!(!should_acknowledge(None, 256, 511));
    }
}
