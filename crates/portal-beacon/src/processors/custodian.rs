// Custodian book-keeping instructions
//
// SAFETY INVARIANTS:
// 1. A deposit never changes a custodian's registered remote address; a conflicting
//    deposit is refunded in full
// 2. Withdraw and top-up never move more than the custodian's free collateral
// 3. Only the configured feeder replaces the exchange-rate table, and only wholesale
// 4. A reward withdrawal pays out the whole accumulated reward for the token

use log::{info, warn};
use std::collections::BTreeMap;

use portal_metadata::content::{
    CustodianDepositContent, CustodianTopupContent, CustodianWithdrawContent, ExchangeRatesContent,
    WithdrawRewardContent,
};
use portal_metadata::{ActionEnvelope, BeaconInstruction, InstStatus, MetaType, Metadata};
use portal_state::{PortalState, StatusKind, StatusStore, TokenId};

use super::{instruction, unexpected_action, unexpected_instruction, PortalInstructionProcessor};
use crate::context::{ProcessingContext, RequestStatus, StatusWrite};
use crate::errors::BeaconError;

pub struct CustodianProcessor;

const NAME: &str = "custodian";

impl PortalInstructionProcessor for CustodianProcessor {
    fn build_new_insts(
        &self,
        action: &ActionEnvelope,
        state: &PortalState,
        _store: &dyn StatusStore,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<BeaconInstruction>, BeaconError> {
        let (tx_req_id, shard_id) = (action.tx_req_id, action.shard_id);
        let inst = match &action.meta {
            Metadata::CustodianDeposit(m) => {
                let existing = state
                    .custodian(&m.incognito_address)
                    .and_then(|c| c.remote_address(&m.token_id));
                let status = match existing {
                    Some(remote) if remote != m.remote_address => {
                        warn!(
                            "custodian {} already uses {} for {}, refunding deposit {}",
                            m.incognito_address, remote, m.token_id, tx_req_id
                        );
                        InstStatus::Refund
                    }
                    _ => InstStatus::Accepted,
                };
                let content = CustodianDepositContent {
                    incognito_address: m.incognito_address.clone(),
                    token_id: m.token_id.clone(),
                    remote_address: m.remote_address.clone(),
                    deposit_amount: m.deposit_amount,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::CustodianDeposit, shard_id, status, &content)?
            }
            Metadata::CustodianWithdraw(m) => {
                let free = state
                    .custodian_token(&m.custodian_address, &m.token_id)
                    .map_or(0, |t| t.free_collateral);
                let (status, remain) = if free >= m.amount {
                    (InstStatus::Accepted, free - m.amount)
                } else {
                    warn!(
                        "withdraw {}: custodian {} has {} free, asked {}",
                        tx_req_id, m.custodian_address, free, m.amount
                    );
                    (InstStatus::Rejected, free)
                };
                let content = CustodianWithdrawContent {
                    custodian_address: m.custodian_address.clone(),
                    token_id: m.token_id.clone(),
                    amount: m.amount,
                    remain_free_collateral: remain,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::CustodianWithdrawRequest, shard_id, status, &content)?
            }
            Metadata::ExchangeRates(m) => {
                let status = if m.sender_address != ctx.params.feeder_address {
                    warn!("rates {}: sender {} is not the feeder", tx_req_id, m.sender_address);
                    InstStatus::Rejected
                } else if let Err(e) = m.check_entries(ctx.params) {
                    warn!("rates {}: {}", tx_req_id, e);
                    InstStatus::Rejected
                } else {
                    InstStatus::Accepted
                };
                let content = ExchangeRatesContent {
                    sender_address: m.sender_address.clone(),
                    rates: m.rates.clone(),
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::ExchangeRates, shard_id, status, &content)?
            }
            Metadata::CustodianTopup(m) => {
                let status = match state.custodian_token(&m.incognito_address, &m.token_id) {
                    Some(t) if t.free_collateral >= m.free_collateral_amount => InstStatus::Accepted,
                    Some(t) => {
                        warn!(
                            "topup {}: {} free collateral, asked {}",
                            tx_req_id, t.free_collateral, m.free_collateral_amount
                        );
                        InstStatus::Rejected
                    }
                    None => {
                        warn!("topup {}: {} has no {} collateral", tx_req_id, m.incognito_address, m.token_id);
                        InstStatus::Rejected
                    }
                };
                let content = CustodianTopupContent {
                    incognito_address: m.incognito_address.clone(),
                    token_id: m.token_id.clone(),
                    deposit_amount: m.deposit_amount,
                    free_collateral_amount: m.free_collateral_amount,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::CustodianTopup, shard_id, status, &content)?
            }
            Metadata::RequestWithdrawReward(m) => {
                let reward = state
                    .custodian_token(&m.custodian_address, &m.token_id)
                    .map_or(0, |t| t.reward_amount);
                let status = if reward > 0 {
                    InstStatus::Accepted
                } else {
                    warn!("reward withdraw {}: nothing to pay {}", tx_req_id, m.custodian_address);
                    InstStatus::Rejected
                };
                let content = WithdrawRewardContent {
                    custodian_address: m.custodian_address.clone(),
                    token_id: m.token_id.clone(),
                    reward_amount: reward,
                    tx_req_id,
                    shard_id,
                };
                instruction(MetaType::RequestWithdrawReward, shard_id, status, &content)?
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
        let accepted = RequestStatus::Accepted.as_byte();
        let rejected = RequestStatus::Rejected.as_byte();
        let write = match (inst.meta_type, inst.status) {
            (MetaType::CustodianDeposit, InstStatus::Accepted) => {
                let c: CustodianDepositContent = inst.decode_content()?;
                state
                    .upsert_custodian(&c.incognito_address)
                    .deposit(&c.token_id, &c.remote_address, c.deposit_amount)?;
                info!("custodian {} deposited {} for {}", c.incognito_address, c.deposit_amount, c.token_id);
                StatusWrite::new(StatusKind::CustodianDeposit, c.tx_req_id.as_hex(), accepted, height, &c)?
            }
            (MetaType::CustodianDeposit, InstStatus::Refund) => {
                let c: CustodianDepositContent = inst.decode_content()?;
                StatusWrite::rejection(
                    StatusKind::CustodianDeposit,
                    c.tx_req_id.as_hex(),
                    rejected,
                    height,
                    &c,
                    "remote address conflicts with the registered one",
                )?
            }
            (MetaType::CustodianWithdrawRequest, InstStatus::Accepted) => {
                let c: CustodianWithdrawContent = inst.decode_content()?;
                state.custodian_token_mut(&c.custodian_address, &c.token_id)?.withdraw_free(c.amount)?;
                StatusWrite::new(StatusKind::CustodianWithdraw, c.tx_req_id.as_hex(), accepted, height, &c)?
            }
            (MetaType::CustodianWithdrawRequest, InstStatus::Rejected) => {
                let c: CustodianWithdrawContent = inst.decode_content()?;
                StatusWrite::rejection(
                    StatusKind::CustodianWithdraw,
                    c.tx_req_id.as_hex(),
                    rejected,
                    height,
                    &c,
                    "not enough free collateral",
                )?
            }
            (MetaType::ExchangeRates, InstStatus::Accepted) => {
                let c: ExchangeRatesContent = inst.decode_content()?;
                let table: BTreeMap<TokenId, u64> =
                    c.rates.iter().map(|e| (e.token_id.clone(), e.rate)).collect();
                state.exchange_rates.replace(table);
                StatusWrite::new(StatusKind::ExchangeRates, c.tx_req_id.as_hex(), accepted, height, &c)?
            }
            (MetaType::ExchangeRates, InstStatus::Rejected) => {
                let c: ExchangeRatesContent = inst.decode_content()?;
                StatusWrite::rejection(
                    StatusKind::ExchangeRates,
                    c.tx_req_id.as_hex(),
                    rejected,
                    height,
                    &c,
                    "rates not accepted from this sender",
                )?
            }
            (MetaType::CustodianTopup, InstStatus::Accepted) => {
                let c: CustodianTopupContent = inst.decode_content()?;
                let total = c
                    .deposit_amount
                    .checked_add(c.free_collateral_amount)
                    .ok_or(portal_state::StateError::Overflow)?;
                let token = state.custodian_token_mut(&c.incognito_address, &c.token_id)?;
                token.deposit(c.deposit_amount)?;
                token.lock(total)?;
                StatusWrite::new(StatusKind::CustodianTopup, c.tx_req_id.as_hex(), accepted, height, &c)?
            }
            (MetaType::CustodianTopup, InstStatus::Rejected) => {
                let c: CustodianTopupContent = inst.decode_content()?;
                StatusWrite::rejection(
                    StatusKind::CustodianTopup,
                    c.tx_req_id.as_hex(),
                    rejected,
                    height,
                    &c,
                    "custodian cannot cover the top-up",
                )?
            }
            (MetaType::RequestWithdrawReward, InstStatus::Accepted) => {
                let c: WithdrawRewardContent = inst.decode_content()?;
                state
                    .custodian_token_mut(&c.custodian_address, &c.token_id)?
                    .take_reward(c.reward_amount)?;
                StatusWrite::new(StatusKind::WithdrawReward, c.tx_req_id.as_hex(), accepted, height, &c)?
            }
            (MetaType::RequestWithdrawReward, InstStatus::Rejected) => {
                let c: WithdrawRewardContent = inst.decode_content()?;
                StatusWrite::rejection(
                    StatusKind::WithdrawReward,
                    c.tx_req_id.as_hex(),
                    rejected,
                    height,
                    &c,
                    "no reward to withdraw",
                )?
            }
            _ => return Err(unexpected_instruction(NAME, inst)),
        };
        Ok(vec![write])
    }
}
