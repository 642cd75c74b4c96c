// Custodian fee rewards
//
// SAFETY INVARIANTS:
// 1. At most one PortalReward instruction per height, emitted last
// 2. Rewards only credit custodians that already hold a record for the token

use log::info;

use portal_metadata::content::{beacon_req_id, PortalRewardContent};
use portal_metadata::{ActionEnvelope, BeaconInstruction, InstStatus, MetaType};
use portal_state::{PortalState, StatusKind, StatusStore};

use super::{instruction, unexpected_action, unexpected_instruction, PortalInstructionProcessor};
use crate::accumulator::HeightRun;
use crate::context::{ProcessingContext, RequestStatus, StatusWrite};
use crate::errors::BeaconError;

pub struct RewardProcessor;

const NAME: &str = "reward";

/// Pay out the fee rewards collected while applying this height's instructions.
pub(crate) fn distribute_rewards(run: &mut HeightRun<'_>) -> Result<(), BeaconError> {
    let rewards = run.ctx.take_rewards();
    if rewards.is_empty() {
        return Ok(());
    }
    let height = run.beacon_height();
    let content = PortalRewardContent {
        beacon_height: height,
        rewards,
        tx_req_id: beacon_req_id("reward", height, ""),
        shard_id: 0,
    };
    run.emit(instruction(MetaType::PortalReward, 0, InstStatus::Accepted, &content)?)
}

impl PortalInstructionProcessor for RewardProcessor {
    fn build_new_insts(
        &self,
        action: &ActionEnvelope,
        _state: &PortalState,
        _store: &dyn StatusStore,
        _ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<BeaconInstruction>, BeaconError> {
        Err(unexpected_action(NAME, action))
    }

    fn process_insts(
        &self,
        inst: &BeaconInstruction,
        state: &mut PortalState,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<StatusWrite>, BeaconError> {
        if (inst.meta_type, inst.status) != (MetaType::PortalReward, InstStatus::Accepted) {
            return Err(unexpected_instruction(NAME, inst));
        }
        let c: PortalRewardContent = inst.decode_content()?;
        for reward in &c.rewards {
            state
                .custodian_token_mut(&reward.custodian_address, &reward.token_id)?
                .add_reward(reward.amount)?;
        }
        info!("height {}: rewarded {} custodian balance(s)", c.beacon_height, c.rewards.len());
        Ok(vec![StatusWrite::new(
            StatusKind::Reward,
            ctx.beacon_height.to_string(),
            RequestStatus::Accepted.as_byte(),
            ctx.beacon_height,
            &c,
        )?])
    }
}
