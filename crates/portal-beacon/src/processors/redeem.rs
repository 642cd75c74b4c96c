// Redeem instructions
//
// SAFETY INVARIANTS:
// 1. Matching a custodian to a redeem moves the matched amount out of its holding;
//    every exit path (unlock, run-away, refund) accounts for that amount exactly once
// 2. A redeem id lives in waiting_redeem until fully matched, then in matched_redeem
//    until its last custodian share is unlocked or liquidated
// 3. Unlocked collateral is proportional to the custodian's outstanding obligations
// 4. A run-away custodian pays the redeemer at most the collateral backing its share;
//    the rest of that collateral returns to free
// 5. Fee rewards telescope over paid shares, so the sum paid never exceeds the fee
// 6. An external transaction backs at most one accepted unlock
// 7. Liquidation refunds only unpaid shares; a paid share is never minted back

use log::{info, warn};

use portal_metadata::content::{
    LiquidateCustodianContent, PickMoreCustodianContent, RedeemRequestContent, ReqMatchingRedeemContent,
    UnlockCollateralContent,
};
use portal_metadata::{ActionEnvelope, BeaconInstruction, InstStatus, MetaType, Metadata};
use portal_state::{
    CustodianMatcher, MatchPolicy, MatchingRedeemCustodianDetail, PaymentAddress, PortalState, RedeemRequest,
    RedeemStatus, StateError, StatusKey, StatusKind, StatusStore, TokenId,
};

use super::{
    external_tx_spent, instruction, spend_external_tx, unexpected_action, unexpected_instruction,
    PortalInstructionProcessor,
};
use crate::accumulator::HeightRun;
use crate::context::{ProcessingContext, RequestStatus, StatusWrite};
use crate::errors::BeaconError;

pub struct RedeemProcessor;

const NAME: &str = "redeem";

fn share_key(redeem_id: &str, custodian: &PaymentAddress) -> String {
    format!("{}/{}", redeem_id, custodian)
}

fn redeem_content(redeem: &RedeemRequest) -> RedeemRequestContent {
    RedeemRequestContent {
        unique_redeem_id: redeem.unique_redeem_id.clone(),
        token_id: redeem.token_id.clone(),
        redeem_amount: redeem.amount,
        redeemer_incognito_address: redeem.redeemer_address.clone(),
        remote_address: redeem.redeemer_remote_address.clone(),
        redeem_fee: redeem.redeem_fee,
        custodians: redeem.custodians.clone(),
        tx_req_id: redeem.tx_req_id,
        shard_id: redeem.shard_id,
    }
}

/// Refund content giving the redeemer back one unpaid share.
fn share_refund(redeem: &RedeemRequest, share: &MatchingRedeemCustodianDetail) -> RedeemRequestContent {
    RedeemRequestContent {
        redeem_amount: share.amount,
        custodians: vec![share.clone()],
        ..redeem_content(redeem)
    }
}

fn take_redeem(state: &mut PortalState, redeem_id: &str) -> Result<RedeemRequest, BeaconError> {
    state
        .waiting_redeem
        .remove(redeem_id)
        .or_else(|| state.matched_redeem.remove(redeem_id))
        .ok_or_else(|| StateError::RequestNotFound(redeem_id.to_string()).into())
}

/// Give every matched share back to its custodian's holding.
fn restore_holdings(state: &mut PortalState, redeem: &RedeemRequest) -> Result<(), BeaconError> {
    for detail in &redeem.custodians {
        state
            .custodian_token_mut(&detail.custodian_address, &redeem.token_id)?
            .add_holding(detail.amount)?;
    }
    Ok(())
}

fn status_write(redeem: &RedeemRequest, status: RedeemStatus, height: u64) -> Result<StatusWrite, BeaconError> {
    StatusWrite::new(
        StatusKind::RedeemRequest,
        redeem.unique_redeem_id.as_str(),
        status.as_byte(),
        height,
        redeem,
    )
}

/// Drop one custodian share from a matched redeem; the redeem closes with
/// `closing` once no share is left.
fn settle_share(
    state: &mut PortalState,
    redeem_id: &str,
    custodian: &PaymentAddress,
    closing: RedeemStatus,
    height: u64,
) -> Result<Option<StatusWrite>, BeaconError> {
    let redeem = state
        .matched_redeem
        .get_mut(redeem_id)
        .ok_or_else(|| StateError::RequestNotFound(redeem_id.to_string()))?;
    let before = redeem.custodians.len();
    redeem.custodians.retain(|d| &d.custodian_address != custodian);
    if redeem.custodians.len() == before {
        return Err(BeaconError::internal(format!("{} holds no share of redeem {}", custodian, redeem_id)));
    }
    if !redeem.custodians.is_empty() {
        return Ok(None);
    }
    let mut closed = take_redeem(state, redeem_id)?;
    closed.status = closing;
    info!("redeem {} closed as {:?}", redeem_id, closing);
    Ok(Some(status_write(&closed, closing, height)?))
}

/// Give unpaid shares of a matched redeem back to their custodians' holdings.
fn refund_matched_shares(
    state: &mut PortalState,
    c: &RedeemRequestContent,
    height: u64,
) -> Result<Vec<StatusWrite>, BeaconError> {
    let refunded: u64 = c.custodians.iter().map(|d| d.amount).sum();
    if c.custodians.is_empty() || refunded != c.redeem_amount {
        return Err(BeaconError::internal(format!(
            "refund of redeem {} mints {} for shares worth {}",
            c.unique_redeem_id, c.redeem_amount, refunded
        )));
    }
    let mut writes = Vec::new();
    for detail in &c.custodians {
        let owed = state
            .matched_redeem
            .get(&c.unique_redeem_id)
            .and_then(|r| r.custodian(&detail.custodian_address))
            .map(|d| d.amount)
            .ok_or_else(|| StateError::RequestNotFound(share_key(&c.unique_redeem_id, &detail.custodian_address)))?;
        if owed != detail.amount {
            return Err(BeaconError::internal(format!(
                "refund of {} claims {} but the share is {}",
                share_key(&c.unique_redeem_id, &detail.custodian_address),
                detail.amount,
                owed
            )));
        }
        state
            .custodian_token_mut(&detail.custodian_address, &c.token_id)?
            .add_holding(detail.amount)?;
        if let Some(write) = settle_share(
            state,
            &c.unique_redeem_id,
            &detail.custodian_address,
            RedeemStatus::Refunded,
            height,
        )? {
            writes.push(write.with_reason("custodian liquidated"));
        }
    }
    Ok(writes)
}

/// Liquidate custodians that did not pay their share of a matched redeem in time.
pub(crate) fn liquidate_run_away_custodians(run: &mut HeightRun<'_>) -> Result<(), BeaconError> {
    let height = run.beacon_height();
    let params = run.params();
    let due: Vec<(String, PaymentAddress)> = run
        .state
        .matched_redeem
        .values()
        .filter(|r| r.is_timed_out_at(height, params.timeout_custodian_return_blocks))
        .flat_map(|r| {
            r.custodians
                .iter()
                .map(move |d| (r.unique_redeem_id.clone(), d.custodian_address.clone()))
        })
        .collect();

    for (redeem_id, custodian) in due {
        let Some(redeem) = run.state.matched_redeem.get(&redeem_id) else { continue };
        let Some(share) = redeem.custodian(&custodian) else { continue };
        let share_locked = match run.state.unlock_amount_for_redeem(&custodian, &redeem.token_id, share.amount) {
            Ok(locked) => locked,
            Err(e) => {
                warn!("run-away {} / {}: {}", redeem_id, custodian, e);
                continue;
            }
        };
        let rates = &run.state.exchange_rates;
        let value = match rates
            .value_of(&redeem.token_id, share.amount)
            .and_then(|v| rates.value_of(&params.prv_token_id, 1).map(|prv| v / prv))
        {
            Ok(value) => value,
            Err(e) => {
                warn!("run-away {} / {} deferred: {}", redeem_id, custodian, e);
                continue;
            }
        };
        let with_bonus = value.saturating_mul(u128::from(100 + params.liquidation_bonus_percent)) / 100;
        let payout = u64::try_from(with_bonus).unwrap_or(u64::MAX).min(share_locked);
        let content = LiquidateCustodianContent {
            unique_redeem_id: redeem_id.clone(),
            token_id: redeem.token_id.clone(),
            custodian_address: custodian.clone(),
            redeemer_incognito_address: redeem.redeemer_address.clone(),
            redeem_pub_token_amount: share.amount,
            liquidated_collateral_amount: payout,
            remain_unlock_amount: share_locked - payout,
            tx_req_id: redeem.tx_req_id,
            shard_id: redeem.shard_id,
        };
        warn!(
            "custodian {} did not return {} {} for redeem {}, paying redeemer {} collateral",
            custodian, share.amount, redeem.token_id, redeem_id, payout
        );
        let inst = instruction(MetaType::LiquidateCustodian, redeem.shard_id, InstStatus::Liquidated, &content)?;
        run.emit(inst)?;
    }
    Ok(())
}

/// Refund what a liquidated custodian still owes on redeems of `token`.
///
/// A waiting redeem is refunded whole. A matched redeem only gives back the
/// custodian's unpaid share; shares other custodians already returned stay paid.
pub(crate) fn refund_for_liquidation(
    run: &mut HeightRun<'_>,
    custodian: &PaymentAddress,
    token: &TokenId,
) -> Result<(), BeaconError> {
    let involved = |r: &&RedeemRequest| &r.token_id == token && r.involves(custodian);
    let mut refunds: Vec<RedeemRequestContent> =
        run.state.waiting_redeem.values().filter(involved).map(redeem_content).collect();
    for redeem in run.state.matched_redeem.values().filter(involved) {
        if let Some(share) = redeem.custodian(custodian) {
            refunds.push(share_refund(redeem, share));
        }
    }
    for content in refunds {
        warn!(
            "redeem {} refunds {} {}: custodian {} liquidated",
            content.unique_redeem_id, content.redeem_amount, content.token_id, custodian
        );
        let inst = instruction(MetaType::RedeemRequest, content.shard_id, InstStatus::Refund, &content)?;
        run.emit(inst)?;
    }
    Ok(())
}

/// Try to complete waiting redeems that timed out with more custodians; refund the rest.
pub(crate) fn pick_more_custodians(run: &mut HeightRun<'_>) -> Result<(), BeaconError> {
    let height = run.beacon_height();
    let timeout = run.params().timeout_waiting_redeem_blocks;
    let due: Vec<String> = run
        .state
        .waiting_redeem
        .values()
        .filter(|r| r.is_timed_out_at(height, timeout))
        .map(|r| r.unique_redeem_id.clone())
        .collect();

    for id in due {
        let Some(redeem) = run.state.waiting_redeem.get(&id) else { continue };
        let candidates = run.state.redeem_candidates(&redeem.token_id, Some(redeem));
        let outcome = CustodianMatcher::allocate(redeem.remaining_amount(), candidates, MatchPolicy::Partial)?;
        let (status, custodians) = if outcome.is_complete() {
            info!("redeem {} completed with {} more custodian(s)", id, outcome.allocations.len());
            let added = outcome
                .allocations
                .into_iter()
                .map(|a| MatchingRedeemCustodianDetail {
                    custodian_address: a.address,
                    remote_address: a.remote_address,
                    amount: a.amount,
                })
                .collect();
            (InstStatus::Accepted, added)
        } else {
            warn!("redeem {} still short by {}, refunding", id, outcome.remaining);
            (InstStatus::Rejected, Vec::new())
        };
        let content = PickMoreCustodianContent {
            unique_redeem_id: id.clone(),
            token_id: redeem.token_id.clone(),
            redeemer_incognito_address: redeem.redeemer_address.clone(),
            redeem_amount: redeem.amount,
            custodians,
            tx_req_id: redeem.tx_req_id,
            shard_id: redeem.shard_id,
        };
        let inst = instruction(MetaType::PickMoreCustodianForRedeem, redeem.shard_id, status, &content)?;
        run.emit(inst)?;
    }
    Ok(())
}

impl PortalInstructionProcessor for RedeemProcessor {
    fn build_new_insts(
        &self,
        action: &ActionEnvelope,
        state: &PortalState,
        store: &dyn StatusStore,
        _ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<BeaconInstruction>, BeaconError> {
        let (tx_req_id, shard_id) = (action.tx_req_id, action.shard_id);
        let inst = match &action.meta {
            Metadata::RedeemRequest(m) => {
                let id = &m.unique_redeem_id;
                let used = store.contains(&StatusKey::new(StatusKind::RedeemRequest, id.as_str()))
                    || state.redeem(id).is_some();
                let (status, custodians) = if used {
                    warn!("redeem {} rejected: id already used", id);
                    (InstStatus::Rejected, Vec::new())
                } else {
                    let candidates = state.redeem_candidates(&m.token_id, None);
                    let outcome = CustodianMatcher::allocate(m.redeem_amount, candidates, MatchPolicy::Partial)?;
                    let matched = outcome
                        .allocations
                        .into_iter()
                        .map(|a| MatchingRedeemCustodianDetail {
                            custodian_address: a.address,
                            remote_address: a.remote_address,
                            amount: a.amount,
                        })
                        .collect();
                    (InstStatus::Accepted, matched)
                };
                let content = RedeemRequestContent {
                    unique_redeem_id: id.clone(),
                    token_id: m.token_id.clone(),
                    redeem_amount: m.redeem_amount,
                    redeemer_incognito_address: m.redeemer_incognito_address.clone(),
                    remote_address: m.remote_address.clone(),
                    redeem_fee: m.redeem_fee,
                    custodians,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::RedeemRequest, shard_id, status, &content)?
            }
            Metadata::ReqMatchingRedeem(m) => {
                let decision = match state.waiting_redeem.get(&m.redeem_id) {
                    None => Err(format!("redeem {} is not waiting", m.redeem_id)),
                    Some(redeem) if redeem.involves(&m.custodian_address) => {
                        Err(format!("{} already matched", m.custodian_address))
                    }
                    Some(redeem) => {
                        let holding = state
                            .custodian_token(&m.custodian_address, &redeem.token_id)
                            .map_or(0, |t| t.holding_public_token_amount);
                        let amount = holding.min(redeem.remaining_amount());
                        if amount == 0 {
                            Err(format!("{} holds no {}", m.custodian_address, redeem.token_id))
                        } else {
                            Ok((amount, amount == redeem.remaining_amount()))
                        }
                    }
                };
                let (status, matching_amount, is_fully_matched) = match decision {
                    Ok((amount, full)) => (InstStatus::Accepted, amount, full),
                    Err(reason) => {
                        warn!("matching {} rejected: {}", tx_req_id, reason);
                        (InstStatus::Rejected, 0, false)
                    }
                };
                let content = ReqMatchingRedeemContent {
                    custodian_address: m.custodian_address.clone(),
                    redeem_id: m.redeem_id.clone(),
                    matching_amount,
                    is_fully_matched,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::ReqMatchingRedeem, shard_id, status, &content)?
            }
            Metadata::RequestUnlockCollateral(m) => {
                let decision = match state.matched_redeem.get(&m.unique_redeem_id) {
                    _ if external_tx_spent(store, &m.token_id, &m.external_tx_id) => {
                        Err(format!("external tx {} already spent", m.external_tx_id))
                    }
                    None => Err(format!("redeem {} is not matched", m.unique_redeem_id)),
                    Some(redeem) => m
                        .check_against(redeem)
                        .map_err(|e| e.to_string())
                        .and_then(|()| {
                            state
                                .unlock_amount_for_redeem(&m.custodian_address, &m.token_id, m.redeem_amount)
                                .map_err(|e| e.to_string())
                        }),
                };
                let (status, unlock_amount) = match decision {
                    Ok(amount) => (InstStatus::Accepted, amount),
                    Err(reason) => {
                        warn!("unlock {} rejected: {}", tx_req_id, reason);
                        (InstStatus::Rejected, 0)
                    }
                };
                let content = UnlockCollateralContent {
                    unique_redeem_id: m.unique_redeem_id.clone(),
                    token_id: m.token_id.clone(),
                    custodian_address: m.custodian_address.clone(),
                    redeem_amount: m.redeem_amount,
                    unlock_amount,
                    external_tx_id: m.external_tx_id.clone(),
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::RequestUnlockCollateral, shard_id, status, &content)?
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
            (MetaType::RedeemRequest, InstStatus::Accepted) => {
                let c: RedeemRequestContent = inst.decode_content()?;
                for detail in &c.custodians {
                    state
                        .custodian_token_mut(&detail.custodian_address, &c.token_id)?
                        .remove_holding(detail.amount)?;
                }
                let mut redeem = RedeemRequest {
                    unique_redeem_id: c.unique_redeem_id,
                    tx_req_id: c.tx_req_id,
                    token_id: c.token_id,
                    redeemer_address: c.redeemer_incognito_address,
                    redeemer_remote_address: c.remote_address,
                    amount: c.redeem_amount,
                    redeem_fee: c.redeem_fee,
                    custodians: c.custodians,
                    beacon_height: height,
                    shard_id: c.shard_id,
                    status: RedeemStatus::Waiting,
                };
                if redeem.remaining_amount() == 0 {
                    redeem.status = RedeemStatus::Matched;
                }
                info!(
                    "redeem {} {:?}: {} of {} matched",
                    redeem.unique_redeem_id,
                    redeem.status,
                    redeem.matched_amount(),
                    redeem.amount
                );
                let write = status_write(&redeem, redeem.status, height)?;
                let id = redeem.unique_redeem_id.clone();
                if redeem.status == RedeemStatus::Matched {
                    state.matched_redeem.insert(id, redeem);
                } else {
                    state.waiting_redeem.insert(id, redeem);
                }
                Ok(vec![write])
            }
            (MetaType::RedeemRequest, InstStatus::Rejected) => {
                let c: RedeemRequestContent = inst.decode_content()?;
                Ok(vec![StatusWrite::rejection(
                    StatusKind::RedeemRequest,
                    c.unique_redeem_id.as_str(),
                    RedeemStatus::Refunded.as_byte(),
                    height,
                    &c,
                    "redeem id already used",
                )?])
            }
            (MetaType::RedeemRequest, InstStatus::Refund) => {
                let c: RedeemRequestContent = inst.decode_content()?;
                if let Some(mut redeem) = state.waiting_redeem.remove(&c.unique_redeem_id) {
                    if c.redeem_amount != redeem.amount {
                        return Err(BeaconError::internal(format!(
                            "waiting redeem {} refunds {} of {}",
                            c.unique_redeem_id, c.redeem_amount, redeem.amount
                        )));
                    }
                    restore_holdings(state, &redeem)?;
                    redeem.status = RedeemStatus::Refunded;
                    return Ok(vec![
                        status_write(&redeem, RedeemStatus::Refunded, height)?.with_reason("custodian liquidated")
                    ]);
                }
                refund_matched_shares(state, &c, height)
            }
            (MetaType::ReqMatchingRedeem, InstStatus::Accepted) => {
                let c: ReqMatchingRedeemContent = inst.decode_content()?;
                let token = state
                    .waiting_redeem
                    .get(&c.redeem_id)
                    .map(|r| r.token_id.clone())
                    .ok_or_else(|| StateError::RequestNotFound(c.redeem_id.clone()))?;
                let custodian = state.custodian_token_mut(&c.custodian_address, &token)?;
                custodian.remove_holding(c.matching_amount)?;
                let remote_address = custodian.remote_address.clone();
                let redeem = state
                    .waiting_redeem
                    .get_mut(&c.redeem_id)
                    .ok_or_else(|| StateError::RequestNotFound(c.redeem_id.clone()))?;
                redeem.custodians.push(MatchingRedeemCustodianDetail {
                    custodian_address: c.custodian_address.clone(),
                    remote_address,
                    amount: c.matching_amount,
                });
                if (redeem.remaining_amount() == 0) != c.is_fully_matched {
                    return Err(BeaconError::internal(format!(
                        "redeem {} completion does not match instruction",
                        c.redeem_id
                    )));
                }
                let mut writes = vec![StatusWrite::new(
                    StatusKind::MatchingRedeem,
                    share_key(&c.redeem_id, &c.custodian_address),
                    RequestStatus::Accepted.as_byte(),
                    height,
                    &c,
                )?];
                if c.is_fully_matched {
                    let mut redeem = take_redeem(state, &c.redeem_id)?;
                    redeem.status = RedeemStatus::Matched;
                    redeem.beacon_height = height;
                    writes.push(status_write(&redeem, RedeemStatus::Matched, height)?);
                    state.matched_redeem.insert(c.redeem_id.clone(), redeem);
                }
                Ok(writes)
            }
            (MetaType::ReqMatchingRedeem, InstStatus::Rejected) => {
                let c: ReqMatchingRedeemContent = inst.decode_content()?;
                Ok(vec![StatusWrite::rejection(
                    StatusKind::MatchingRedeem,
                    share_key(&c.redeem_id, &c.custodian_address),
                    RequestStatus::Rejected.as_byte(),
                    height,
                    &c,
                    "custodian cannot join this redeem",
                )?])
            }
            (MetaType::RequestUnlockCollateral, InstStatus::Accepted) => {
                let c: UnlockCollateralContent = inst.decode_content()?;
                let (fee, amount, paid_before) = {
                    let redeem = state
                        .matched_redeem
                        .get(&c.unique_redeem_id)
                        .ok_or_else(|| StateError::RequestNotFound(c.unique_redeem_id.clone()))?;
                    (redeem.redeem_fee, redeem.amount, redeem.amount - redeem.matched_amount())
                };
                state
                    .custodian_token_mut(&c.custodian_address, &c.token_id)?
                    .unlock(c.unlock_amount)?;
                if amount > 0 {
                    let fee = u128::from(fee);
                    let upto = |paid: u64| fee * u128::from(paid) / u128::from(amount);
                    let reward = upto(paid_before + c.redeem_amount) - upto(paid_before);
                    let reward = u64::try_from(reward).map_err(|_| StateError::Overflow)?;
                    ctx.add_reward(&c.custodian_address, &c.token_id, reward)?;
                }
                let mut writes = vec![
                    StatusWrite::new(
                        StatusKind::UnlockCollateral,
                        share_key(&c.unique_redeem_id, &c.custodian_address),
                        RequestStatus::Accepted.as_byte(),
                        height,
                        &c,
                    )?,
                    spend_external_tx(&c.token_id, &c.external_tx_id, height, &c)?,
                ];
                writes.extend(settle_share(
                    state,
                    &c.unique_redeem_id,
                    &c.custodian_address,
                    RedeemStatus::Completed,
                    height,
                )?);
                Ok(writes)
            }
            (MetaType::RequestUnlockCollateral, InstStatus::Rejected) => {
                let c: UnlockCollateralContent = inst.decode_content()?;
                Ok(vec![StatusWrite::rejection(
                    StatusKind::UnlockCollateral,
                    share_key(&c.unique_redeem_id, &c.custodian_address),
                    RequestStatus::Rejected.as_byte(),
                    height,
                    &c,
                    "no matching unpaid share or external tx spent",
                )?])
            }
            (MetaType::LiquidateCustodian, InstStatus::Liquidated) => {
                let c: LiquidateCustodianContent = inst.decode_content()?;
                let custodian = state.custodian_token_mut(&c.custodian_address, &c.token_id)?;
                custodian.seize_locked(c.liquidated_collateral_amount)?;
                custodian.unlock(c.remain_unlock_amount)?;
                Ok(settle_share(
                    state,
                    &c.unique_redeem_id,
                    &c.custodian_address,
                    RedeemStatus::Liquidated,
                    height,
                )?
                .into_iter()
                .collect())
            }
            (MetaType::PickMoreCustodianForRedeem, InstStatus::Accepted) => {
                let c: PickMoreCustodianContent = inst.decode_content()?;
                for detail in &c.custodians {
                    state
                        .custodian_token_mut(&detail.custodian_address, &c.token_id)?
                        .remove_holding(detail.amount)?;
                }
                let mut redeem = state
                    .waiting_redeem
                    .remove(&c.unique_redeem_id)
                    .ok_or_else(|| StateError::RequestNotFound(c.unique_redeem_id.clone()))?;
                redeem.custodians.extend(c.custodians);
                if redeem.remaining_amount() != 0 {
                    return Err(BeaconError::internal(format!(
                        "redeem {} still short by {} after picking custodians",
                        redeem.unique_redeem_id,
                        redeem.remaining_amount()
                    )));
                }
                redeem.status = RedeemStatus::Matched;
                redeem.beacon_height = height;
                let write = status_write(&redeem, RedeemStatus::Matched, height)?;
                state.matched_redeem.insert(redeem.unique_redeem_id.clone(), redeem);
                Ok(vec![write])
            }
            (MetaType::PickMoreCustodianForRedeem, InstStatus::Rejected) => {
                let c: PickMoreCustodianContent = inst.decode_content()?;
                let mut redeem = state
                    .waiting_redeem
                    .remove(&c.unique_redeem_id)
                    .ok_or_else(|| StateError::RequestNotFound(c.unique_redeem_id.clone()))?;
                restore_holdings(state, &redeem)?;
                redeem.status = RedeemStatus::Refunded;
                Ok(vec![status_write(&redeem, RedeemStatus::Refunded, height)?
                    .with_reason("not enough custodians before timeout")])
            }
            _ => Err(unexpected_instruction(NAME, inst)),
        }
    }
}
