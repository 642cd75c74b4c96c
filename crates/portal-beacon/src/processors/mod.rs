// Instruction processors
//
// SAFETY INVARIANTS:
// 1. build_new_insts only reads state; every mutation happens in process_insts
// 2. process_insts reads nothing but the instruction and the state it is applied to,
//    so replaying the same instructions over the same prior state is bit-identical
// 3. Every instruction meta type the beacon emits has exactly one processor

use serde::Serialize;

use portal_metadata::{external_tx_key, ActionEnvelope, BeaconInstruction, InstStatus, MetaType};
use portal_state::{PortalState, StatusKey, StatusKind, StatusStore, TokenId};

use crate::context::{ProcessingContext, RequestStatus, StatusWrite};
use crate::errors::BeaconError;

pub mod custodian;
pub mod liquidation;
pub mod porting;
pub mod redeem;
pub mod reward;

pub use custodian::CustodianProcessor;
pub use liquidation::LiquidationProcessor;
pub use porting::PortingProcessor;
pub use redeem::RedeemProcessor;
pub use reward::RewardProcessor;

/// One request family's beacon logic.
pub trait PortalInstructionProcessor: Sync {
    /// Decide the fate of one shard action against the working state.
    fn build_new_insts(
        &self,
        action: &ActionEnvelope,
        state: &PortalState,
        store: &dyn StatusStore,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<BeaconInstruction>, BeaconError>;

    /// Apply one instruction. Any error is fatal to the height.
    fn process_insts(
        &self,
        inst: &BeaconInstruction,
        state: &mut PortalState,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<StatusWrite>, BeaconError>;
}

pub fn processor_for(meta_type: MetaType) -> Option<&'static dyn PortalInstructionProcessor> {
    match meta_type {
        MetaType::CustodianDeposit
        | MetaType::CustodianWithdrawRequest
        | MetaType::ExchangeRates
        | MetaType::CustodianTopup
        | MetaType::RequestWithdrawReward => Some(&CustodianProcessor),
        MetaType::RequestPorting | MetaType::UserRequestPToken | MetaType::ExpiredWaitingPortingReq => {
            Some(&PortingProcessor)
        }
        MetaType::RedeemRequest
        | MetaType::ReqMatchingRedeem
        | MetaType::RequestUnlockCollateral
        | MetaType::LiquidateCustodian
        | MetaType::PickMoreCustodianForRedeem => Some(&RedeemProcessor),
        MetaType::LiquidateTpExchangeRates | MetaType::RedeemFromLiquidationPool => Some(&LiquidationProcessor),
        MetaType::PortalReward => Some(&RewardProcessor),
        _ => None,
    }
}

pub(crate) fn instruction<T: Serialize>(
    meta_type: MetaType,
    shard_id: u8,
    status: InstStatus,
    content: &T,
) -> Result<BeaconInstruction, BeaconError> {
    Ok(BeaconInstruction::new(meta_type, shard_id, status, content)?)
}

/// Whether an accepted request already spent this external transaction.
pub(crate) fn external_tx_spent(store: &dyn StatusStore, token: &TokenId, chain_tx_id: &str) -> bool {
    store.contains(&StatusKey::new(StatusKind::ExternalTx, external_tx_key(token, chain_tx_id)))
}

/// Mark an external transaction spent by an accepted request.
pub(crate) fn spend_external_tx<T: Serialize>(
    token: &TokenId,
    chain_tx_id: &str,
    beacon_height: u64,
    content: &T,
) -> Result<StatusWrite, BeaconError> {
    StatusWrite::new(
        StatusKind::ExternalTx,
        external_tx_key(token, chain_tx_id),
        RequestStatus::Accepted.as_byte(),
        beacon_height,
        content,
    )
}

pub(crate) fn unexpected_action(processor: &str, action: &ActionEnvelope) -> BeaconError {
    BeaconError::internal(format!(
        "{} processor handed {} action",
        processor,
        portal_metadata::MetadataValidator::meta_type(&action.meta)
    ))
}

pub(crate) fn unexpected_instruction(processor: &str, inst: &BeaconInstruction) -> BeaconError {
    BeaconError::internal(format!(
        "{} processor cannot apply {} instruction with status {}",
        processor, inst.meta_type, inst.status
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_beacon_instruction_type_has_a_processor() {
        for t in MetaType::ALL {
            let expected = !t.is_response();
            assert_eq!(processor_for(t).is_some(), expected, "{}", t);
        }
    }
}
