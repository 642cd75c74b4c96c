// Beacon-held Portal state
//
// SAFETY INVARIANTS:
// 1. All collections are BTreeMaps so iteration and serialization are replica-identical
// 2. Exactly one writer (the beacon accumulator for the current height) mutates a PortalState;
//    shards validate against a cloned, committed snapshot
// 3. A redeem id lives in at most one of waiting_redeem / matched_redeem
// 4. state_root() is a hash of the canonical JSON encoding

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::custodian::{CustodianRecord, CustodianTokenState};
use crate::errors::StateError;
use crate::exchange_rates::ExchangeRateTable;
use crate::liquidation::{CustodianExposure, LiquidationPool};
use crate::matcher::MatchCandidate;
use crate::params::PortalParams;
use crate::requests::{PortingRequest, RedeemRequest};
use crate::types::{div_ceil_u128, to_u64, Hash, PaymentAddress, TokenId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortalState {
    pub custodians: BTreeMap<PaymentAddress, CustodianRecord>,
    pub waiting_porting: BTreeMap<String, PortingRequest>,
    pub waiting_redeem: BTreeMap<String, RedeemRequest>,
    pub matched_redeem: BTreeMap<String, RedeemRequest>,
    pub exchange_rates: ExchangeRateTable,
    pub liquidation_pool: LiquidationPool,
}

impl PortalState {
    pub fn genesis() -> Self {
        PortalState::default()
    }

    pub fn custodian(&self, address: &PaymentAddress) -> Option<&CustodianRecord> {
        self.custodians.get(address)
    }

    pub fn custodian_token(&self, address: &PaymentAddress, token: &TokenId) -> Option<&CustodianTokenState> {
        self.custodians.get(address).and_then(|c| c.token(token))
    }

    pub fn custodian_token_mut(
        &mut self,
        address: &PaymentAddress,
        token: &TokenId,
    ) -> Result<&mut CustodianTokenState, StateError> {
        self.custodians
            .get_mut(address)
            .ok_or_else(|| StateError::CustodianNotFound(address.to_string()))?
            .token_mut(token)
    }

    /// Custodian record, created empty on first use.
    pub fn upsert_custodian(&mut self, address: &PaymentAddress) -> &mut CustodianRecord {
        self.custodians
            .entry(address.clone())
            .or_insert_with(|| CustodianRecord::new(address.clone()))
    }

    /// Look a redeem up in both the waiting and the matched set.
    pub fn redeem(&self, redeem_id: &str) -> Option<&RedeemRequest> {
        self.waiting_redeem
            .get(redeem_id)
            .or_else(|| self.matched_redeem.get(redeem_id))
    }

    /// Collateral a custodian has locked for portings still waiting for proof.
    pub fn locked_in_waiting_porting(&self, address: &PaymentAddress, token: &TokenId) -> u64 {
        self.waiting_porting
            .values()
            .filter(|p| &p.token_id == token)
            .flat_map(|p| p.custodians.iter())
            .filter(|c| &c.custodian_address == address)
            .map(|c| c.locked_collateral)
            .sum()
    }

    /// Public tokens matched to this custodian in unfinished redeems.
    pub fn pending_redeem_amount(&self, address: &PaymentAddress, token: &TokenId) -> u64 {
        self.waiting_redeem
            .values()
            .chain(self.matched_redeem.values())
            .filter(|r| &r.token_id == token)
            .filter_map(|r| r.custodian(address))
            .map(|c| c.amount)
            .sum()
    }

    pub fn exposure(&self, address: &PaymentAddress, token: &TokenId) -> Option<CustodianExposure> {
        let state = self.custodian_token(address, token)?;
        let porting_locks = self.locked_in_waiting_porting(address, token);
        Some(CustodianExposure {
            custodian: address.clone(),
            token: token.clone(),
            locked_collateral: state.locked_collateral.saturating_sub(porting_locks),
            holding: state
                .holding_public_token_amount
                .saturating_add(self.pending_redeem_amount(address, token)),
        })
    }

    /// Every (custodian, token) exposure in the state.
    pub fn exposures(&self) -> Vec<CustodianExposure> {
        let mut out = Vec::new();
        for (address, record) in &self.custodians {
            for token in record.tokens.keys() {
                if let Some(e) = self.exposure(address, token) {
                    out.push(e);
                }
            }
        }
        out
    }

    fn rates_for(&self, token: &TokenId, params: &PortalParams) -> Result<(u128, u128), StateError> {
        let rate_token = self
            .exchange_rates
            .rate(token)
            .ok_or_else(|| StateError::MissingExchangeRate(token.to_string()))?;
        let rate_prv = self
            .exchange_rates
            .rate(&params.prv_token_id)
            .ok_or_else(|| StateError::MissingExchangeRate(params.prv_token_id.to_string()))?;
        Ok((u128::from(rate_token), u128::from(rate_prv)))
    }

    /// Collateral to lock for porting `amount` of `token` (rounded up).
    pub fn porting_lock_amount(
        &self,
        token: &TokenId,
        amount: u64,
        params: &PortalParams,
    ) -> Result<u64, StateError> {
        let (rt, rp) = self.rates_for(token, params)?;
        let pct = u128::from(params.min_percent_locked_collateral);
        to_u64(div_ceil_u128(u128::from(amount) * rt * pct, 100 * rp))
    }

    /// Largest porting amount `free` collateral can back (rounded down).
    pub fn porting_capacity(
        &self,
        token: &TokenId,
        free: u64,
        params: &PortalParams,
    ) -> Result<u64, StateError> {
        let (rt, rp) = self.rates_for(token, params)?;
        let pct = u128::from(params.min_percent_locked_collateral);
        let cap = u128::from(free) * rp * 100 / (rt * pct).max(1);
        Ok(u64::try_from(cap).unwrap_or(u64::MAX))
    }

    /// Fee owed for a request of `amount` `token`, in PRV.
    pub fn required_fee(
        &self,
        token: &TokenId,
        amount: u64,
        fee_bps: u64,
        params: &PortalParams,
    ) -> Result<u64, StateError> {
        let value_in_prv = self
            .exchange_rates
            .convert(token, &params.prv_token_id, amount)?;
        let fee = to_u64(u128::from(value_in_prv) * u128::from(fee_bps) / 10_000)?;
        Ok(fee.max(params.min_portal_fee))
    }

    /// Custodians that could back a new porting of `token`.
    pub fn porting_candidates(
        &self,
        token: &TokenId,
        params: &PortalParams,
    ) -> Result<Vec<MatchCandidate>, StateError> {
        let mut out = Vec::new();
        for (address, record) in &self.custodians {
            let Some(state) = record.token(token) else { continue };
            if state.remote_address.is_empty() || state.free_collateral == 0 {
                continue;
            }
            let capacity = self.porting_capacity(token, state.free_collateral, params)?;
            if capacity > 0 {
                out.push(MatchCandidate {
                    address: address.clone(),
                    remote_address: state.remote_address.clone(),
                    capacity,
                });
            }
        }
        Ok(out)
    }

    /// Custodians holding `token` that are not already part of `exclude`.
    pub fn redeem_candidates(&self, token: &TokenId, exclude: Option<&RedeemRequest>) -> Vec<MatchCandidate> {
        self.custodians
            .iter()
            .filter(|(address, _)| exclude.map_or(true, |r| !r.involves(address)))
            .filter_map(|(address, record)| {
                let state = record.token(token)?;
                if state.holding_public_token_amount == 0 || state.remote_address.is_empty() {
                    return None;
                }
                Some(MatchCandidate {
                    address: address.clone(),
                    remote_address: state.remote_address.clone(),
                    capacity: state.holding_public_token_amount,
                })
            })
            .collect()
    }

    /// Collateral released when a custodian pays out `amount` of a redeem.
    ///
    /// Proportional to the custodian's outstanding obligations; paying the
    /// last obligation releases everything that backs issued tokens.
    pub fn unlock_amount_for_redeem(
        &self,
        address: &PaymentAddress,
        token: &TokenId,
        amount: u64,
    ) -> Result<u64, StateError> {
        let exposure = self
            .exposure(address, token)
            .ok_or_else(|| StateError::CustodianNotFound(address.to_string()))?;
        if exposure.holding == 0 || amount > exposure.holding {
            return Err(StateError::InsufficientHolding {
                needed: amount,
                available: exposure.holding,
            });
        }
        to_u64(
            u128::from(amount) * u128::from(exposure.locked_collateral) / u128::from(exposure.holding),
        )
    }

    pub fn check_invariants(&self) -> Result<(), StateError> {
        for record in self.custodians.values() {
            record.check_invariant()?;
        }
        for (id, p) in &self.waiting_porting {
            if p.matched_amount() != p.amount {
                return Err(StateError::Inconsistent(format!(
                    "porting {} allocation {} != amount {}",
                    id,
                    p.matched_amount(),
                    p.amount
                )));
            }
        }
        for (id, r) in self.waiting_redeem.iter().chain(self.matched_redeem.iter()) {
            if r.matched_amount() > r.amount {
                return Err(StateError::Inconsistent(format!(
                    "redeem {} over-matched: {} > {}",
                    id,
                    r.matched_amount(),
                    r.amount
                )));
            }
        }
        Ok(())
    }

    pub fn state_root(&self) -> Result<Hash, StateError> {
        let bytes = serde_json::to_vec(self).map_err(|e| StateError::Encoding(e.to_string()))?;
        Ok(Hash::compute(&bytes))
    }
}
