//! Milestone proposal and timeout timers.
//!
//! Milestones are driven by time rather than by queued events, so this processor only runs
//! timers.

use std::sync::Arc;

use bridge_core::milestone::{milestone_id, validate_milestone, MilestoneProposal};
use bridge_core::msgs::{BridgeMsg, MsgMilestone, MsgMilestoneTimeout};
use bridge_core::staking::{in_proposer_list, is_first_proposer};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{child_range_root, spawn_ticker, ProcessError, Result};
use crate::context::BridgeContext;

/// How many upcoming milestone proposers may send a timeout.
const TIMEOUT_PROPOSER_COUNT: u64 = 10;

/// The milestone timers.
pub struct MilestoneProcessor {
    ctx: Arc<BridgeContext>,
}

impl MilestoneProcessor {
    /// A processor acting through `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Proposes the next milestone if this validator is the milestone proposer and the child
    /// chain has enough confirmed blocks. Returns whether a milestone was sent.
    pub async fn propose_milestone(&self) -> Result<bool> {
        let address = self.ctx.address();
        let proposers = self.ctx.heimdall.milestone_proposers(1).await?;
        if !is_first_proposer(&proposers, &address) {
            debug!("Not the milestone proposer");
            return Ok(false);
        }

        let config = &self.ctx.config;
        let count = self.ctx.heimdall.milestone_count().await?;
        let latest = self.ctx.heimdall.latest_milestone().await?;
        let start = match (count, &latest) {
            (0, _) => config.milestone_genesis_height,
            (_, Some(latest)) => latest.end_block + 1,
            (_, None) => {
                return Err(ProcessError::transient(format!(
                    "milestone count is {count} but no latest milestone was returned"
                )))
            }
        };

        let sprint = config.sprint_length;
        let latest_child = self.ctx.child_chain.latest_header().await?.number;
        let required = start + sprint + config.milestone_confirmations - 1;
        if latest_child < required {
            debug!("Child chain at {latest_child}, milestone from {start} needs {required}");
            return Ok(false);
        }
        let end = start + sprint - 1;

        let Some(range_root) = child_range_root(self.ctx.child_chain.as_ref(), start, end).await?
        else {
            debug!("Child blocks {start}-{end} are not all available yet");
            return Ok(false);
        };

        let proposal = MilestoneProposal {
            proposer: address,
            start_block: start,
            end_block: end,
            hash: range_root.root,
            bor_chain_id: config.common.bor_chain_id.clone(),
            milestone_id: milestone_id(&Uuid::new_v4().to_string(), &range_root.end_hash),
        };
        if let Err(rejection) = validate_milestone(
            &proposal,
            latest.as_ref().filter(|_| count > 0),
            sprint,
            Some(range_root.root),
        ) {
            warn!("⚠️ Not proposing milestone {start}-{end}: {rejection:?}");
            return Ok(false);
        }

        let msg = BridgeMsg::Milestone(MsgMilestone {
            proposer: proposal.proposer,
            start_block: proposal.start_block,
            end_block: proposal.end_block,
            hash: proposal.hash,
            bor_chain_id: proposal.bor_chain_id,
            milestone_id: proposal.milestone_id,
        });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        info!("✅ Proposed milestone {start}-{end} in {tx_hash}");
        Ok(true)
    }

    /// Sends a milestone timeout when the child chain ran too far past the latest milestone.
    /// Returns whether a timeout was sent.
    pub async fn check_milestone_timeout(&self) -> Result<bool> {
        let Some(latest) = self.ctx.heimdall.latest_milestone().await? else {
            debug!("No milestone yet, nothing to time out");
            return Ok(false);
        };

        let latest_child = self.ctx.child_chain.latest_header().await?.number;
        let lag = latest_child.saturating_sub(latest.end_block);
        if lag <= self.ctx.config.milestone_buffer_length {
            return Ok(false);
        }

        let address = self.ctx.address();
        let proposers = self
            .ctx
            .heimdall
            .milestone_proposers(TIMEOUT_PROPOSER_COUNT)
            .await?;
        if !in_proposer_list(&proposers, &address) {
            debug!("Milestone is {lag} blocks behind but we are not an upcoming proposer");
            return Ok(false);
        }

        let msg = BridgeMsg::MilestoneTimeout(MsgMilestoneTimeout { from: address });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        info!(
            "📡 Sent milestone timeout, latest milestone ends {lag} blocks behind, in {tx_hash}"
        );
        Ok(true)
    }

    /// Starts the proposal timer and the timeout timer, which runs at twice the interval.
    pub fn spawn_timers(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let interval = self.ctx.config.milestone_poll_interval;
        let proposer = self.clone();
        let timeout = self;
        vec![
            spawn_ticker("milestone proposal", interval, cancel.clone(), move || {
                let processor = proposer.clone();
                async move { processor.propose_milestone().await.map(|_| ()) }
            }),
            spawn_ticker("milestone timeout", interval * 2, cancel, move || {
                let processor = timeout.clone();
                async move { processor.check_milestone_timeout().await.map(|_| ()) }
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, B256};
    use bridge_core::milestone::Milestone;
    use bridge_core::staking::Validator;

    use super::*;
    use crate::testing::TestHarness;

    fn validator(signer: Address) -> Validator {
        Validator {
            id: 1,
            signer,
            power: 100,
            jailed: false,
        }
    }

    fn milestone(start: u64, end: u64) -> Milestone {
        Milestone {
            proposer: Address::repeat_byte(9),
            start_block: start,
            end_block: end,
            hash: B256::repeat_byte(1),
            bor_chain_id: "15001".into(),
            milestone_id: "previous".into(),
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn we_can_propose_the_first_milestone_from_genesis() {
        let harness = TestHarness::new();
        harness
            .heimdall
            .set_milestone_proposers(vec![validator(harness.address())]);
        harness.child_chain.add_headers(0..=79);

        let processor = MilestoneProcessor::new(harness.ctx.clone());
        assert!(processor.propose_milestone().await.unwrap());

        let sent = harness.broadcaster.heimdall_msgs();
        let [BridgeMsg::Milestone(msg)] = &sent[..] else {
            panic!("expected a milestone, got {sent:?}");
        };
        assert_eq!((msg.start_block, msg.end_block), (0, 63));
        let end_hash = harness.child_chain.header(63).unwrap().hash;
        assert!(msg
            .milestone_id
            .ends_with(&format!(" - {}", hex::encode(end_hash))));
    }

    #[tokio::test]
    async fn we_cannot_propose_a_milestone_without_enough_confirmations() {
        let harness = TestHarness::new();
        harness
            .heimdall
            .set_milestone_proposers(vec![validator(harness.address())]);
        harness.heimdall.set_latest_milestone(Some(milestone(0, 63)), 1);
        harness.child_chain.add_headers(0..=142);

        let processor = MilestoneProcessor::new(harness.ctx.clone());
        assert!(!processor.propose_milestone().await.unwrap());

        harness.child_chain.add_headers(143..=143);
        assert!(processor.propose_milestone().await.unwrap());
        assert!(matches!(
            &harness.broadcaster.heimdall_msgs()[..],
            [BridgeMsg::Milestone(MsgMilestone { start_block: 64, end_block: 127, .. })]
        ));
    }

    #[tokio::test]
    async fn we_cannot_propose_a_milestone_unless_we_are_the_proposer() {
        let harness = TestHarness::new();
        harness
            .heimdall
            .set_milestone_proposers(vec![validator(Address::repeat_byte(0x77))]);
        harness.child_chain.add_headers(0..=200);

        let processor = MilestoneProcessor::new(harness.ctx.clone());
        assert!(!processor.propose_milestone().await.unwrap());
        assert!(harness.broadcaster.heimdall_msgs().is_empty());
    }

    #[tokio::test]
    async fn we_can_time_out_a_stalled_milestone() {
        let harness = TestHarness::new();
        harness.heimdall.set_milestone_proposers(vec![
            validator(Address::repeat_byte(0x77)),
            validator(harness.address()),
        ]);
        harness.heimdall.set_latest_milestone(Some(milestone(0, 63)), 1);
        harness.child_chain.add_headers(0..=383);

        let processor = MilestoneProcessor::new(harness.ctx.clone());
        assert!(!processor.check_milestone_timeout().await.unwrap());

        harness.child_chain.add_headers(384..=384);
        assert!(processor.check_milestone_timeout().await.unwrap());
        assert!(matches!(
            &harness.broadcaster.heimdall_msgs()[..],
            [BridgeMsg::MilestoneTimeout(_)]
        ));
    }

    #[tokio::test]
    async fn we_cannot_time_out_without_a_milestone() {
        let harness = TestHarness::new();
        harness
            .heimdall
            .set_milestone_proposers(vec![validator(harness.address())]);
        harness.child_chain.add_headers(0..=1000);

        let processor = MilestoneProcessor::new(harness.ctx.clone());
        assert!(!processor.check_milestone_timeout().await.unwrap());
    }
}
