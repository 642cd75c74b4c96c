// Collateral-ratio liquidation
//
// SAFETY INVARIANTS:
// 1. ratio_percent = locked * rate(PRV) * 100 / (holding * rate(token)), integer division
// 2. A pair is liquidated iff ratio_percent < tp_liquidation_percent (strictly below)
// 3. Zero holding is skipped; a missing rate defers the pair, it is never liquidated
// 4. liquidated_collateral <= locked; the rest of the locked collateral returns to free
// 5. Evaluation order is (token asc, custodian asc)

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::StateError;
use crate::exchange_rates::ExchangeRateTable;
use crate::params::PortalParams;
use crate::types::{to_u64, PaymentAddress, TokenId};

/// Collateral-ratio band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TpBand {
    Healthy,
    Warning,
    Liquidatable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpThresholds {
    pub liquidation_percent: u64,
    pub warning_percent: u64,
}

impl From<&PortalParams> for TpThresholds {
    fn from(params: &PortalParams) -> Self {
        TpThresholds {
            liquidation_percent: params.tp_liquidation_percent,
            warning_percent: params.tp_warning_percent,
        }
    }
}

/// What a custodian owes and what backs it for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianExposure {
    pub custodian: PaymentAddress,
    pub token: TokenId,
    /// Locked collateral backing issued tokens (excludes pending porting locks)
    pub locked_collateral: u64,
    /// Held public tokens plus tokens matched to unfinished redeems
    pub holding: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioOutcome {
    /// Nothing held, ratio undefined
    Skipped,
    /// Rate missing, re-evaluated at a later height
    Deferred,
    Rated { ratio_percent: u64, band: TpBand },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiquidationDecision {
    pub custodian_address: PaymentAddress,
    pub token_id: TokenId,
    pub ratio_percent: u64,
    pub liquidated_pub_token_amount: u64,
    pub liquidated_collateral_amount: u64,
    /// Locked collateral returned to free after the seizure
    pub returned_collateral: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RatioDetail {
    pub ratio_percent: u64,
    pub band: TpBand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationReport {
    pub decisions: Vec<LiquidationDecision>,
    /// Ratio table per token, keyed by custodian
    pub ratios: BTreeMap<TokenId, BTreeMap<PaymentAddress, RatioDetail>>,
    pub deferred: Vec<(PaymentAddress, TokenId)>,
}

impl LiquidationReport {
    pub fn decisions_for(&self, token: &TokenId) -> impl Iterator<Item = &LiquidationDecision> {
        let token = token.clone();
        self.decisions.iter().filter(move |d| d.token_id == token)
    }
}

pub struct LiquidationEngine {
    thresholds: TpThresholds,
    collateral_token: TokenId,
}

impl LiquidationEngine {
    pub fn new(thresholds: TpThresholds, collateral_token: TokenId) -> Self {
        LiquidationEngine { thresholds, collateral_token }
    }

    pub fn from_params(params: &PortalParams) -> Self {
        Self::new(TpThresholds::from(params), params.prv_token_id.clone())
    }

    pub fn classify(&self, ratio_percent: u64) -> TpBand {
        if ratio_percent < self.thresholds.liquidation_percent {
            TpBand::Liquidatable
        } else if ratio_percent < self.thresholds.warning_percent {
            TpBand::Warning
        } else {
            TpBand::Healthy
        }
    }

    pub fn ratio(&self, exposure: &CustodianExposure, rates: &ExchangeRateTable) -> RatioOutcome {
        if exposure.holding == 0 {
            return RatioOutcome::Skipped;
        }
        let (Some(rate_prv), Some(rate_token)) =
            (rates.rate(&self.collateral_token), rates.rate(&exposure.token))
        else {
            return RatioOutcome::Deferred;
        };
        let collateral_value = u128::from(exposure.locked_collateral) * u128::from(rate_prv);
        let holding_value = u128::from(exposure.holding) * u128::from(rate_token);
        let ratio = collateral_value.saturating_mul(100) / holding_value;
        let ratio_percent = u64::try_from(ratio).unwrap_or(u64::MAX);
        RatioOutcome::Rated { ratio_percent, band: self.classify(ratio_percent) }
    }

    /// Amounts to seize from a liquidatable exposure.
    pub fn liquidate(
        &self,
        exposure: &CustodianExposure,
        ratio_percent: u64,
        rates: &ExchangeRateTable,
    ) -> Result<LiquidationDecision, StateError> {
        // compared in u128: the holding's collateral value may not fit a u64
        let holding_in_prv = rates.value_of(&exposure.token, exposure.holding)?
            / rates.value_of(&self.collateral_token, 1)?;
        let seized = to_u64(holding_in_prv.min(u128::from(exposure.locked_collateral)))?;
        Ok(LiquidationDecision {
            custodian_address: exposure.custodian.clone(),
            token_id: exposure.token.clone(),
            ratio_percent,
            liquidated_pub_token_amount: exposure.holding,
            liquidated_collateral_amount: seized,
            returned_collateral: exposure.locked_collateral - seized,
        })
    }

    /// Rate every exposure and produce liquidation decisions.
    pub fn evaluate(
        &self,
        exposures: &[CustodianExposure],
        rates: &ExchangeRateTable,
    ) -> Result<LiquidationReport, StateError> {
        let mut ordered: Vec<&CustodianExposure> = exposures.iter().collect();
        ordered.sort_by(|a, b| a.token.cmp(&b.token).then_with(|| a.custodian.cmp(&b.custodian)));

        let mut report = LiquidationReport::default();
        for exposure in ordered {
            match self.ratio(exposure, rates) {
                RatioOutcome::Skipped => {}
                RatioOutcome::Deferred => {
                    warn!(
                        "liquidation: missing rate for {}, deferring custodian {}",
                        exposure.token, exposure.custodian
                    );
                    report.deferred.push((exposure.custodian.clone(), exposure.token.clone()));
                }
                RatioOutcome::Rated { ratio_percent, band } => {
                    report
                        .ratios
                        .entry(exposure.token.clone())
                        .or_default()
                        .insert(exposure.custodian.clone(), RatioDetail { ratio_percent, band });
                    if band == TpBand::Liquidatable {
                        let decision = self.liquidate(exposure, ratio_percent, rates)?;
                        info!(
                            "liquidation: custodian {} token {} ratio {}% seized {} for {} public tokens",
                            decision.custodian_address,
                            decision.token_id,
                            ratio_percent,
                            decision.liquidated_collateral_amount,
                            decision.liquidated_pub_token_amount
                        );
                        report.decisions.push(decision);
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Liquidated collateral and public tokens awaiting redemption, per token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiquidationPoolEntry {
    pub liquidated_collateral_amount: u64,
    pub liquidated_pub_token_amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationPool {
    pub entries: BTreeMap<TokenId, LiquidationPoolEntry>,
}

impl LiquidationPool {
    pub fn entry(&self, token: &TokenId) -> Option<&LiquidationPoolEntry> {
        self.entries.get(token)
    }

    pub fn add(&mut self, token: &TokenId, collateral: u64, pub_tokens: u64) -> Result<(), StateError> {
        let entry = self.entries.entry(token.clone()).or_default();
        let c = entry
            .liquidated_collateral_amount
            .checked_add(collateral)
            .ok_or(StateError::Overflow)?;
        let p = entry
            .liquidated_pub_token_amount
            .checked_add(pub_tokens)
            .ok_or(StateError::Overflow)?;
        entry.liquidated_collateral_amount = c;
        entry.liquidated_pub_token_amount = p;
        Ok(())
    }

    /// Collateral paid out for `amount` public tokens, pro rata to the pool.
    pub fn quote(&self, token: &TokenId, amount: u64) -> Result<u64, StateError> {
        let entry = self
            .entries
            .get(token)
            .filter(|e| e.liquidated_pub_token_amount > 0)
            .ok_or_else(|| StateError::EmptyLiquidationPool(token.to_string()))?;
        if amount > entry.liquidated_pub_token_amount {
            return Err(StateError::InsufficientHolding {
                needed: amount,
                available: entry.liquidated_pub_token_amount,
            });
        }
        to_u64(
            u128::from(entry.liquidated_collateral_amount) * u128::from(amount)
                / u128::from(entry.liquidated_pub_token_amount),
        )
    }

    /// Take `amount` public tokens worth of collateral out of the pool.
    pub fn redeem(&mut self, token: &TokenId, amount: u64) -> Result<u64, StateError> {
        let collateral = self.quote(token, amount)?;
        let entry = self
            .entries
            .get_mut(token)
            .ok_or_else(|| StateError::EmptyLiquidationPool(token.to_string()))?;
        entry.liquidated_pub_token_amount -= amount;
        entry.liquidated_collateral_amount -= collateral;
        Ok(collateral)
    }
}
