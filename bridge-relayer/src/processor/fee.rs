//! Fee top-up relay. `TopUpFee` logs arrive on the staking queue and are handed here by the
//! staking processor.

use std::sync::Arc;

use bridge_core::event::ContractLog;
use bridge_core::msgs::{BridgeMsg, MsgTopup};
use log::info;

use super::{decode_log, Result};
use crate::context::BridgeContext;
use crate::contracts::StakingInfo;
use crate::heimdall::OldTxModule;

/// Relays fee top-ups.
pub struct FeeProcessor {
    ctx: Arc<BridgeContext>,
}

impl FeeProcessor {
    /// A processor acting through `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Sends `MsgTopup` for a `TopUpFee` log the consensus chain has not seen yet.
    pub async fn handle_top_up(&self, log: &ContractLog) -> Result<()> {
        let event: StakingInfo::TopUpFee = decode_log(log)?;

        if self
            .ctx
            .heimdall
            .is_old_tx(OldTxModule::Topup, log.tx_hash, log.log_index)
            .await?
        {
            info!(
                "Top-up {}:{} is already processed on the consensus chain",
                log.tx_hash, log.log_index
            );
            return Ok(());
        }

        let msg = BridgeMsg::Topup(MsgTopup {
            from_address: self.ctx.address(),
            user: event.user,
            fee: event.fee,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
            block_number: log.block_number,
        });
        let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
        info!("✅ Relayed fee top-up of {} for {} in {tx_hash}", event.fee, event.user);
        Ok(())
    }
}
