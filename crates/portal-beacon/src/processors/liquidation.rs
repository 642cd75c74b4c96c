// Liquidation instructions
//
// SAFETY INVARIANTS:
// 1. Ratios are evaluated once per height, before shard actions, on the state left by
//    expiry and run-away processing
// 2. A liquidated custodian's unpaid redeem shares are refunded and its waiting portings
//    expired before its collateral is seized, so the seized and returned amounts cover
//    exactly the collateral that backs issued tokens
// 3. Seized collateral and the liquidated public tokens move into the token's pool together
// 4. A pool redemption pays the pool's collateral pro rata and never more than it holds

use log::{info, warn};

use portal_metadata::content::{beacon_req_id, LiquidationByRatesContent, RedeemFromPoolContent};
use portal_metadata::{ActionEnvelope, BeaconInstruction, InstStatus, MetaType, Metadata};
use portal_state::{LiquidationEngine, PortalState, StatusKey, StatusKind, StatusStore};

use super::{instruction, porting, redeem, unexpected_action, unexpected_instruction, PortalInstructionProcessor};
use crate::accumulator::HeightRun;
use crate::context::{ProcessingContext, RequestStatus, StatusWrite};
use crate::errors::BeaconError;

pub struct LiquidationProcessor;

const NAME: &str = "liquidation";

fn decision_key(height: u64, content: &LiquidationByRatesContent) -> String {
    format!(
        "{}/{}/{}",
        height, content.decision.custodian_address, content.decision.token_id
    )
}

/// Liquidate every custodian whose collateral ratio fell below the threshold.
pub(crate) fn liquidate_by_exchange_rates(run: &mut HeightRun<'_>) -> Result<(), BeaconError> {
    let height = run.beacon_height();
    let engine = LiquidationEngine::from_params(run.params());
    let report = engine.evaluate(&run.state.exposures(), &run.state.exchange_rates)?;
    if !report.deferred.is_empty() {
        warn!("height {}: {} custodian(s) deferred for missing rates", height, report.deferred.len());
    }

    for decision in report.decisions {
        redeem::refund_for_liquidation(run, &decision.custodian_address, &decision.token_id)?;
        porting::expire_for_liquidation(run, &decision.custodian_address, &decision.token_id)?;

        let discriminator = format!("{}/{}", decision.custodian_address, decision.token_id);
        let content = LiquidationByRatesContent {
            tx_req_id: beacon_req_id("liquidation", height, &discriminator),
            shard_id: 0,
            beacon_height: height,
            decision,
        };
        let inst = instruction(MetaType::LiquidateTpExchangeRates, 0, InstStatus::Liquidated, &content)?;
        run.emit(inst)?;
    }
    Ok(())
}

impl PortalInstructionProcessor for LiquidationProcessor {
    fn build_new_insts(
        &self,
        action: &ActionEnvelope,
        state: &PortalState,
        store: &dyn StatusStore,
        _ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<BeaconInstruction>, BeaconError> {
        let Metadata::RedeemFromLiquidationPool(m) = &action.meta else {
            return Err(unexpected_action(NAME, action));
        };
        let key = StatusKey::new(StatusKind::RedeemFromLiquidationPool, m.unique_redeem_id.as_str());
        let quote = if store.contains(&key) {
            Err(format!("redeem id {} already used", m.unique_redeem_id))
        } else {
            state
                .liquidation_pool
                .quote(&m.token_id, m.redeem_amount)
                .map_err(|e| e.to_string())
        };
        let (status, minted) = match quote {
            Ok(collateral) => (InstStatus::Accepted, collateral),
            Err(reason) => {
                warn!("pool redeem {} rejected: {}", m.unique_redeem_id, reason);
                (InstStatus::Rejected, 0)
            }
        };
        let content = RedeemFromPoolContent {
            unique_redeem_id: m.unique_redeem_id.clone(),
            token_id: m.token_id.clone(),
            redeem_amount: m.redeem_amount,
            redeemer_incognito_address: m.redeemer_incognito_address.clone(),
            minted_collateral_amount: minted,
            tx_req_id: action.tx_req_id,
            shard_id: action.shard_id,
        };
        Ok(vec![instruction(MetaType::RedeemFromLiquidationPool, action.shard_id, status, &content)?])
    }

    fn process_insts(
        &self,
        inst: &BeaconInstruction,
        state: &mut PortalState,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Vec<StatusWrite>, BeaconError> {
        let height = ctx.beacon_height;
        match (inst.meta_type, inst.status) {
            (MetaType::LiquidateTpExchangeRates, InstStatus::Liquidated) => {
                let c: LiquidationByRatesContent = inst.decode_content()?;
                let d = &c.decision;
                let custodian = state.custodian_token_mut(&d.custodian_address, &d.token_id)?;
                custodian.seize_locked(d.liquidated_collateral_amount)?;
                custodian.unlock(d.returned_collateral)?;
                custodian.remove_holding(d.liquidated_pub_token_amount)?;
                state.liquidation_pool.add(
                    &d.token_id,
                    d.liquidated_collateral_amount,
                    d.liquidated_pub_token_amount,
                )?;
                info!(
                    "custodian {} liquidated at {}%: {} collateral for {} {} moved to the pool",
                    d.custodian_address,
                    d.ratio_percent,
                    d.liquidated_collateral_amount,
                    d.liquidated_pub_token_amount,
                    d.token_id
                );
                Ok(vec![StatusWrite::new(
                    StatusKind::Liquidation,
                    decision_key(height, &c),
                    RequestStatus::Accepted.as_byte(),
                    height,
                    &c,
                )?])
            }
            (MetaType::RedeemFromLiquidationPool, InstStatus::Accepted) => {
                let c: RedeemFromPoolContent = inst.decode_content()?;
                let paid = state.liquidation_pool.redeem(&c.token_id, c.redeem_amount)?;
                if paid != c.minted_collateral_amount {
                    return Err(BeaconError::internal(format!(
                        "pool redeem {} pays {} but instruction mints {}",
                        c.unique_redeem_id, paid, c.minted_collateral_amount
                    )));
                }
                Ok(vec![StatusWrite::new(
                    StatusKind::RedeemFromLiquidationPool,
                    c.unique_redeem_id.as_str(),
                    RequestStatus::Accepted.as_byte(),
                    height,
                    &c,
                )?])
            }
            (MetaType::RedeemFromLiquidationPool, InstStatus::Rejected) => {
                let c: RedeemFromPoolContent = inst.decode_content()?;
                Ok(vec![StatusWrite::rejection(
                    StatusKind::RedeemFromLiquidationPool,
                    c.unique_redeem_id.as_str(),
                    RequestStatus::Rejected.as_byte(),
                    height,
                    &c,
                    "liquidation pool cannot cover the redeem",
                )?])
            }
            _ => Err(unexpected_instruction(NAME, inst)),
        }
    }
}
