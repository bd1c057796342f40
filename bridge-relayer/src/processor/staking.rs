//! Validator lifecycle relay.
//!
//! Each validator relays only the staking events that concern itself:
//!
//! | Event | Relayed when | Message |
//! |---|---|---|
//! | `Staked` | the staked signer key is ours | `MsgValidatorJoin` |
//! | `UnstakeInit` | the validator's signer is our address | `MsgValidatorExit` |
//! | `StakeUpdate` | the validator's signer is our address | `MsgStakeUpdate` |
//! | `SignerChange` | the new signer is our address | `MsgSignerUpdate` |
//!
//! `TopUpFee` shares the staking queue and is handed to the [`FeeProcessor`].

use std::sync::Arc;

use alloy::primitives::Bytes;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use bridge_core::event::ContractLog;
use bridge_core::msgs::{
    BridgeMsg, MsgSignerUpdate, MsgStakeUpdate, MsgValidatorExit, MsgValidatorJoin,
    StakingEventRef,
};
use bridge_core::queue::Domain;
use log::{debug, info};

use super::fee::FeeProcessor;
use super::{decode_log, event_u64, DomainProcessor, Result};
use crate::context::BridgeContext;
use crate::contracts::StakingInfo;
use crate::heimdall::OldTxModule;

/// Tag of an uncompressed SEC1 public key.
const UNCOMPRESSED_KEY_TAG: u8 = 0x04;

/// Staking-info events carry the 64-byte key without its SEC1 tag.
fn tagged_public_key(key: &[u8]) -> Bytes {
    if key.len() == 64 {
        let mut tagged = Vec::with_capacity(65);
        tagged.push(UNCOMPRESSED_KEY_TAG);
        tagged.extend_from_slice(key);
        Bytes::from(tagged)
    } else {
        Bytes::copy_from_slice(key)
    }
}

/// The staking domain.
pub struct StakingProcessor {
    ctx: Arc<BridgeContext>,
    fee: FeeProcessor,
}

impl StakingProcessor {
    /// A processor acting through `ctx`.
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self {
            fee: FeeProcessor::new(ctx.clone()),
            ctx,
        }
    }

    async fn is_old(&self, log: &ContractLog) -> Result<bool> {
        let old = self
            .ctx
            .heimdall
            .is_old_tx(OldTxModule::Staking, log.tx_hash, log.log_index)
            .await?;
        if old {
            info!(
                "{} {}:{} is already processed on the consensus chain",
                log.event_name, log.tx_hash, log.log_index
            );
        }
        Ok(old)
    }

    fn event_ref(&self, log: &ContractLog, id: u64, nonce: u64) -> StakingEventRef {
        StakingEventRef {
            from: self.ctx.address(),
            id,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
            block_number: log.block_number,
            nonce,
        }
    }

    /// Whether validator `id` is signed for by this node.
    async fn is_our_validator(&self, id: u64) -> Result<bool> {
        let validator = self.ctx.heimdall.validator(id).await?;
        Ok(validator.is_some_and(|validator| validator.signer == self.ctx.address()))
    }

    async fn handle_staked(&self, log: &ContractLog) -> Result<Option<BridgeMsg>> {
        let event: StakingInfo::Staked = decode_log(log)?;
        let signer_pub_key = tagged_public_key(&event.signerPubkey);
        if signer_pub_key.as_ref() != self.ctx.signer_public_key.as_slice() {
            debug!("Staked event for signer {} is not ours", event.signer);
            return Ok(None);
        }

        let id = event_u64("validatorId", event.validatorId)?;
        let nonce = event_u64("nonce", event.nonce)?;
        Ok(Some(BridgeMsg::ValidatorJoin(MsgValidatorJoin {
            event: self.event_ref(log, id, nonce),
            activation_epoch: event_u64("activationEpoch", event.activationEpoch)?,
            amount: event.amount,
            signer_pub_key,
        })))
    }

    async fn handle_unstake_init(&self, log: &ContractLog) -> Result<Option<BridgeMsg>> {
        let event: StakingInfo::UnstakeInit = decode_log(log)?;
        let id = event_u64("validatorId", event.validatorId)?;
        if !self.is_our_validator(id).await? {
            debug!("UnstakeInit for validator {id} is not ours");
            return Ok(None);
        }

        let nonce = event_u64("nonce", event.nonce)?;
        Ok(Some(BridgeMsg::ValidatorExit(MsgValidatorExit {
            event: self.event_ref(log, id, nonce),
            deactivation_epoch: event_u64("deactivationEpoch", event.deactivationEpoch)?,
        })))
    }

    async fn handle_stake_update(&self, log: &ContractLog) -> Result<Option<BridgeMsg>> {
        let event: StakingInfo::StakeUpdate = decode_log(log)?;
        let id = event_u64("validatorId", event.validatorId)?;
        if !self.is_our_validator(id).await? {
            debug!("StakeUpdate for validator {id} is not ours");
            return Ok(None);
        }

        let nonce = event_u64("nonce", event.nonce)?;
        Ok(Some(BridgeMsg::StakeUpdate(MsgStakeUpdate {
            event: self.event_ref(log, id, nonce),
            new_amount: event.newAmount,
        })))
    }

    async fn handle_signer_change(&self, log: &ContractLog) -> Result<Option<BridgeMsg>> {
        let event: StakingInfo::SignerChange = decode_log(log)?;
        let id = event_u64("validatorId", event.validatorId)?;
        if event.newSigner != self.ctx.address() {
            debug!(
                "SignerChange of validator {id} to {} is not ours",
                event.newSigner
            );
            return Ok(None);
        }

        let nonce = event_u64("nonce", event.nonce)?;
        Ok(Some(BridgeMsg::SignerUpdate(MsgSignerUpdate {
            event: self.event_ref(log, id, nonce),
            new_signer_pub_key: tagged_public_key(&event.signerPubkey),
        })))
    }

    /// Relays a staking-info log if it concerns this validator.
    pub async fn handle_staking_log(&self, log: &ContractLog) -> Result<()> {
        let Some(&topic) = log.topics.first() else {
            debug!("Staking processor ignores anonymous log");
            return Ok(());
        };

        if topic == StakingInfo::TopUpFee::SIGNATURE_HASH {
            return self.fee.handle_top_up(log).await;
        }

        let known = [
            StakingInfo::Staked::SIGNATURE_HASH,
            StakingInfo::UnstakeInit::SIGNATURE_HASH,
            StakingInfo::StakeUpdate::SIGNATURE_HASH,
            StakingInfo::SignerChange::SIGNATURE_HASH,
        ];
        if !known.contains(&topic) {
            debug!("Staking processor ignores {}", log.event_name);
            return Ok(());
        }
        if self.is_old(log).await? {
            return Ok(());
        }

        let msg = if topic == StakingInfo::Staked::SIGNATURE_HASH {
            self.handle_staked(log).await?
        } else if topic == StakingInfo::UnstakeInit::SIGNATURE_HASH {
            self.handle_unstake_init(log).await?
        } else if topic == StakingInfo::StakeUpdate::SIGNATURE_HASH {
            self.handle_stake_update(log).await?
        } else {
            self.handle_signer_change(log).await?
        };

        if let Some(msg) = msg {
            let name = msg.name();
            let tx_hash = self.ctx.broadcaster.broadcast_to_heimdall(msg).await?;
            info!("✅ Relayed {name} from {} in {tx_hash}", log.tx_hash);
        }
        Ok(())
    }
}

#[async_trait]
impl DomainProcessor for StakingProcessor {
    fn name(&self) -> &'static str {
        "staking"
    }

    fn domain(&self) -> Domain {
        Domain::Staking
    }

    async fn on_root_chain_log(&self, log: ContractLog) -> Result<()> {
        self.handle_staking_log(&log).await
    }
}
