// Porting instructions
//
// SAFETY INVARIANTS:
// 1. A porting is accepted only when the matcher covers the whole amount (AllOrNothing)
//    and the fee covers the current minimum
// 2. Each matched custodian locks porting_lock_amount(share), rounded up, at acceptance
// 3. A waiting porting leaves waiting_porting exactly once: matched by a ptoken request,
//    or expired (timeout or custodian liquidation) with its locks returned to free
// 4. A unique porting id is accepted at most once across all heights

use log::{info, warn};

use portal_metadata::content::{ExpiredPortingContent, PortingRequestContent, RequestPTokenContent};
use portal_metadata::{ActionEnvelope, BeaconInstruction, InstStatus, MetaType, Metadata, RequestPorting};
use portal_state::{
    CustodianMatcher, MatchPolicy, MatchingPortingCustodianDetail, PaymentAddress, PortalParams, PortalState,
    PortingRequest, PortingStatus, StatusKey, StatusKind, StatusStore, TokenId,
};

use super::{
    external_tx_spent, instruction, spend_external_tx, unexpected_action, unexpected_instruction,
    PortalInstructionProcessor,
};
use crate::accumulator::HeightRun;
use crate::context::{split_proportionally, ProcessingContext, RequestStatus, StatusWrite};
use crate::errors::BeaconError;

pub struct PortingProcessor;

const NAME: &str = "porting";

/// Custodian shares for a porting, or the reason it cannot be matched.
fn match_porting(
    m: &RequestPorting,
    state: &PortalState,
    store: &dyn StatusStore,
    params: &PortalParams,
) -> Result<Vec<MatchingPortingCustodianDetail>, String> {
    let id = &m.unique_register_id;
    if store.contains(&StatusKey::new(StatusKind::PortingRequest, id.as_str()))
        || state.waiting_porting.contains_key(id)
    {
        return Err(format!("porting id {} already used", id));
    }
    let required = state
        .required_fee(&m.token_id, m.register_amount, params.porting_fee_bps, params)
        .map_err(|e| e.to_string())?;
    if m.porting_fee < required {
        return Err(format!("fee {} below required {}", m.porting_fee, required));
    }
    let candidates = state.porting_candidates(&m.token_id, params).map_err(|e| e.to_string())?;
    let outcome = CustodianMatcher::allocate(m.register_amount, candidates, MatchPolicy::AllOrNothing)
        .map_err(|e| e.to_string())?;
    outcome
        .allocations
        .into_iter()
        .map(|a| {
            let locked_collateral = state
                .porting_lock_amount(&m.token_id, a.amount, params)
                .map_err(|e| e.to_string())?;
            Ok(MatchingPortingCustodianDetail {
                custodian_address: a.address,
                remote_address: a.remote_address,
                amount: a.amount,
                locked_collateral,
            })
        })
        .collect()
}

fn expiry_instruction(porting: &PortingRequest, by_liquidation: bool) -> Result<BeaconInstruction, BeaconError> {
    let content = ExpiredPortingContent {
        unique_porting_id: porting.unique_register_id.clone(),
        token_id: porting.token_id.clone(),
        porter_address: porting.porter_address.clone(),
        porting_fee: porting.porting_fee,
        expired_by_liquidation: by_liquidation,
        tx_req_id: porting.tx_req_id,
        shard_id: porting.shard_id,
    };
    instruction(MetaType::ExpiredWaitingPortingReq, porting.shard_id, InstStatus::Expired, &content)
}

/// Expire waiting portings older than the porting timeout, refunding their fee.
pub(crate) fn expire_waiting_portings(run: &mut HeightRun<'_>) -> Result<(), BeaconError> {
    let height = run.beacon_height();
    let timeout = run.params().timeout_waiting_porting_blocks;
    let due: Vec<PortingRequest> = run
        .state
        .waiting_porting
        .values()
        .filter(|p| p.is_expired_at(height, timeout))
        .cloned()
        .collect();
    for porting in due {
        info!(
            "porting {} accepted at {} expired at {}",
            porting.unique_register_id, porting.beacon_height, height
        );
        run.emit(expiry_instruction(&porting, false)?)?;
    }
    Ok(())
}

/// Expire every waiting porting of `token` that involves a liquidated custodian.
pub(crate) fn expire_for_liquidation(
    run: &mut HeightRun<'_>,
    custodian: &PaymentAddress,
    token: &TokenId,
) -> Result<(), BeaconError> {
    let due: Vec<PortingRequest> = run
        .state
        .waiting_porting
        .values()
        .filter(|p| &p.token_id == token && p.involves(custodian))
        .cloned()
        .collect();
    for porting in due {
        warn!(
            "porting {} expired: custodian {} liquidated",
            porting.unique_register_id, custodian
        );
        run.emit(expiry_instruction(&porting, true)?)?;
    }
    Ok(())
}

impl PortalInstructionProcessor for PortingProcessor {
    fn build_new_insts(
        &self,
        action: &ActionEnvelope,
        state: &PortalState,
        store: &dyn StatusStore,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<BeaconInstruction>, BeaconError> {
        let (tx_req_id, shard_id) = (action.tx_req_id, action.shard_id);
        let inst = match &action.meta {
            Metadata::RequestPorting(m) => {
                let (status, custodians) = match match_porting(m, state, store, ctx.params) {
                    Ok(custodians) => (InstStatus::Accepted, custodians),
                    Err(reason) => {
                        warn!("porting {} rejected: {}", m.unique_register_id, reason);
                        (InstStatus::Rejected, Vec::new())
                    }
                };
                let content = PortingRequestContent {
                    unique_register_id: m.unique_register_id.clone(),
                    token_id: m.token_id.clone(),
                    porter_address: m.incognito_address.clone(),
                    register_amount: m.register_amount,
                    porting_fee: m.porting_fee,
                    custodians,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::RequestPorting, shard_id, status, &content)?
            }
            Metadata::UserRequestPToken(m) => {
                let status = match state.waiting_porting.get(&m.unique_porting_id) {
                    _ if external_tx_spent(store, &m.token_id, &m.external_tx_id) => {
                        warn!("ptoken request {}: external tx {} already spent", tx_req_id, m.external_tx_id);
                        InstStatus::Rejected
                    }
                    None => {
                        warn!("ptoken request {}: porting {} is not waiting", tx_req_id, m.unique_porting_id);
                        InstStatus::Rejected
                    }
                    Some(porting) => match m.check_against(porting) {
                        Ok(()) => InstStatus::Accepted,
                        Err(e) => {
                            warn!("ptoken request {}: {}", tx_req_id, e);
                            InstStatus::Rejected
                        }
                    },
                };
                let content = RequestPTokenContent {
                    unique_porting_id: m.unique_porting_id.clone(),
                    token_id: m.token_id.clone(),
                    incognito_address: m.incognito_address.clone(),
                    porting_amount: m.porting_amount,
                    external_tx_id: m.external_tx_id.clone(),
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::UserRequestPToken, shard_id, status, &content)?
            }
            _ => return Err(unexpected_action(NAME, action)),
        };
        Ok(vec![inst])
    }

    fn process_insts(
        &self,
        inst: &BeaconInstruction,
        state: &mut PortalState,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<StatusWrite>, BeaconError> {
        let height = ctx.beacon_height;
        match (inst.meta_type, inst.status) {
            (MetaType::RequestPorting, InstStatus::Accepted) => {
                let c: PortingRequestContent = inst.decode_content()?;
                for detail in &c.custodians {
                    state
                        .custodian_token_mut(&detail.custodian_address, &c.token_id)?
                        .lock(detail.locked_collateral)?;
                }
                let porting = PortingRequest {
                    unique_register_id: c.unique_register_id.clone(),
                    tx_req_id: c.tx_req_id,
                    token_id: c.token_id,
                    porter_address: c.porter_address,
                    amount: c.register_amount,
                    porting_fee: c.porting_fee,
                    custodians: c.custodians,
                    beacon_height: height,
                    shard_id: c.shard_id,
                    status: PortingStatus::Waiting,
                };
                if porting.matched_amount() != porting.amount {
                    return Err(BeaconError::internal(format!(
                        "porting {} matched {} of {}",
                        porting.unique_register_id,
                        porting.matched_amount(),
                        porting.amount
                    )));
                }
                info!(
                    "porting {} waiting for {} {} across {} custodian(s)",
                    porting.unique_register_id,
                    porting.amount,
                    porting.token_id,
                    porting.custodians.len()
                );
                let write = StatusWrite::new(
                    StatusKind::PortingRequest,
                    porting.unique_register_id.as_str(),
                    PortingStatus::Waiting.as_byte(),
                    height,
                    &porting,
                )?;
                state.waiting_porting.insert(porting.unique_register_id.clone(), porting);
                Ok(vec![write])
            }
            (MetaType::RequestPorting, InstStatus::Rejected) => {
                let c: PortingRequestContent = inst.decode_content()?;
                Ok(vec![StatusWrite::rejection(
                    StatusKind::PortingRequest,
                    c.unique_register_id.as_str(),
                    PortingStatus::Rejected.as_byte(),
                    height,
                    &c,
                    "porting request rejected",
                )?])
            }
            (MetaType::UserRequestPToken, InstStatus::Accepted) => {
                let c: RequestPTokenContent = inst.decode_content()?;
                let mut porting = state
                    .waiting_porting
                    .remove(&c.unique_porting_id)
                    .ok_or_else(|| portal_state::StateError::RequestNotFound(c.unique_porting_id.clone()))?;
                for detail in &porting.custodians {
                    state
                        .custodian_token_mut(&detail.custodian_address, &porting.token_id)?
                        .add_holding(detail.amount)?;
                }
                let weights: Vec<u64> = porting.custodians.iter().map(|d| d.amount).collect();
                let shares = split_proportionally(porting.porting_fee, &weights)?;
                for (detail, share) in porting.custodians.iter().zip(shares) {
                    ctx.add_reward(&detail.custodian_address, &porting.token_id, share)?;
                }
                porting.status = PortingStatus::Matched;
                info!("porting {} completed, {} {} issued", porting.unique_register_id, c.porting_amount, c.token_id);
                Ok(vec![
                    StatusWrite::new(
                        StatusKind::PortingRequest,
                        porting.unique_register_id.as_str(),
                        PortingStatus::Matched.as_byte(),
                        height,
                        &porting,
                    )?,
                    StatusWrite::new(
                        StatusKind::RequestPToken,
                        c.unique_porting_id.as_str(),
                        RequestStatus::Accepted.as_byte(),
                        height,
                        &c,
                    )?,
                    spend_external_tx(&c.token_id, &c.external_tx_id, height, &c)?,
                ])
            }
            (MetaType::UserRequestPToken, InstStatus::Rejected) => {
                let c: RequestPTokenContent = inst.decode_content()?;
                Ok(vec![StatusWrite::rejection(
                    StatusKind::RequestPToken,
                    c.unique_porting_id.as_str(),
                    RequestStatus::Rejected.as_byte(),
                    height,
                    &c,
                    "ptoken request refused",
                )?])
            }
            (MetaType::ExpiredWaitingPortingReq, InstStatus::Expired) => {
                let c: ExpiredPortingContent = inst.decode_content()?;
                let mut porting = state
                    .waiting_porting
                    .remove(&c.unique_porting_id)
                    .ok_or_else(|| portal_state::StateError::RequestNotFound(c.unique_porting_id.clone()))?;
                for detail in &porting.custodians {
                    state
                        .custodian_token_mut(&detail.custodian_address, &porting.token_id)?
                        .unlock(detail.locked_collateral)?;
                }
                porting.status = PortingStatus::Expired;
                let reason = if c.expired_by_liquidation {
                    "custodian liquidated"
                } else {
                    "porting timed out"
                };
                Ok(vec![StatusWrite::new(
                    StatusKind::PortingRequest,
                    porting.unique_register_id.as_str(),
                    PortingStatus::Expired.as_byte(),
                    height,
                    &porting,
                )?
                .with_reason(reason)])
            }
            _ => Err(unexpected_instruction(NAME, inst)),
        }
    }
}
