// Custodian collateral accounting
//
// SAFETY INVARIANTS:
// 1. locked_collateral + free_collateral == total_collateral after every operation
// 2. Every mutation is all-or-nothing: a failed check leaves the record untouched
// 3. Records are never deleted, only zeroed
// 4. holding_public_token_amount only decreases through redeem matching or liquidation

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::StateError;
use crate::types::{PaymentAddress, TokenId};

/// Collateral and obligations of one custodian for one portal token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianTokenState {
    /// Address on the external chain where porters pay this custodian
    pub remote_address: String,
    pub total_collateral: u64,
    pub locked_collateral: u64,
    pub free_collateral: u64,
    /// Public tokens ported through this custodian and not yet redeemed
    pub holding_public_token_amount: u64,
    /// Accumulated fee rewards, paid in PRV
    pub reward_amount: u64,
}

impl CustodianTokenState {
    pub fn new(remote_address: impl Into<String>) -> Self {
        CustodianTokenState {
            remote_address: remote_address.into(),
            ..Default::default()
        }
    }

    pub fn deposit(&mut self, amount: u64) -> Result<(), StateError> {
        let total = self.total_collateral.checked_add(amount).ok_or(StateError::Overflow)?;
        let free = self.free_collateral.checked_add(amount).ok_or(StateError::Overflow)?;
        self.total_collateral = total;
        self.free_collateral = free;
        Ok(())
    }

    /// Move free collateral into the locked bucket.
    pub fn lock(&mut self, amount: u64) -> Result<(), StateError> {
        if self.free_collateral < amount {
            return Err(StateError::InsufficientFreeCollateral {
                needed: amount,
                available: self.free_collateral,
            });
        }
        let locked = self.locked_collateral.checked_add(amount).ok_or(StateError::Overflow)?;
        self.free_collateral -= amount;
        self.locked_collateral = locked;
        Ok(())
    }

    /// Move locked collateral back to free.
    pub fn unlock(&mut self, amount: u64) -> Result<(), StateError> {
        if self.locked_collateral < amount {
            return Err(StateError::InsufficientLockedCollateral {
                needed: amount,
                available: self.locked_collateral,
            });
        }
        let free = self.free_collateral.checked_add(amount).ok_or(StateError::Overflow)?;
        self.locked_collateral -= amount;
        self.free_collateral = free;
        Ok(())
    }

    /// Remove free collateral from the custodian entirely.
    pub fn withdraw_free(&mut self, amount: u64) -> Result<(), StateError> {
        if self.free_collateral < amount {
            return Err(StateError::InsufficientFreeCollateral {
                needed: amount,
                available: self.free_collateral,
            });
        }
        self.free_collateral -= amount;
        self.total_collateral -= amount;
        Ok(())
    }

    /// Remove locked collateral from the custodian (liquidation).
    pub fn seize_locked(&mut self, amount: u64) -> Result<(), StateError> {
        if self.locked_collateral < amount {
            return Err(StateError::InsufficientLockedCollateral {
                needed: amount,
                available: self.locked_collateral,
            });
        }
        self.locked_collateral -= amount;
        self.total_collateral -= amount;
        Ok(())
    }

    pub fn add_holding(&mut self, amount: u64) -> Result<(), StateError> {
        self.holding_public_token_amount = self
            .holding_public_token_amount
            .checked_add(amount)
            .ok_or(StateError::Overflow)?;
        Ok(())
    }

    pub fn remove_holding(&mut self, amount: u64) -> Result<(), StateError> {
        if self.holding_public_token_amount < amount {
            return Err(StateError::InsufficientHolding {
                needed: amount,
                available: self.holding_public_token_amount,
            });
        }
        self.holding_public_token_amount -= amount;
        Ok(())
    }

    pub fn add_reward(&mut self, amount: u64) -> Result<(), StateError> {
        self.reward_amount = self.reward_amount.checked_add(amount).ok_or(StateError::Overflow)?;
        Ok(())
    }

    pub fn take_reward(&mut self, amount: u64) -> Result<(), StateError> {
        if self.reward_amount < amount {
            return Err(StateError::InsufficientReward {
                needed: amount,
                available: self.reward_amount,
            });
        }
        self.reward_amount -= amount;
        Ok(())
    }

    pub fn is_balanced(&self) -> bool {
        self.locked_collateral.checked_add(self.free_collateral) == Some(self.total_collateral)
    }
}

/// A custodian and its per-token collateral books.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianRecord {
    pub incognito_address: PaymentAddress,
    pub tokens: BTreeMap<TokenId, CustodianTokenState>,
}

impl CustodianRecord {
    pub fn new(incognito_address: PaymentAddress) -> Self {
        CustodianRecord {
            incognito_address,
            tokens: BTreeMap::new(),
        }
    }

    pub fn token(&self, token: &TokenId) -> Option<&CustodianTokenState> {
        self.tokens.get(token)
    }

    pub fn token_mut(&mut self, token: &TokenId) -> Result<&mut CustodianTokenState, StateError> {
        let custodian = self.incognito_address.to_string();
        self.tokens.get_mut(token).ok_or_else(|| StateError::TokenNotRegistered {
            custodian,
            token: token.to_string(),
        })
    }

    /// Remote address registered for `token`, if any.
    pub fn remote_address(&self, token: &TokenId) -> Option<&str> {
        self.tokens
            .get(token)
            .map(|t| t.remote_address.as_str())
            .filter(|a| !a.is_empty())
    }

    /// Register (or top up) collateral for a token.
    ///
    /// Fails if the custodian already registered a different remote address for it.
    pub fn deposit(
        &mut self,
        token: &TokenId,
        remote_address: &str,
        amount: u64,
    ) -> Result<(), StateError> {
        match self.tokens.get_mut(token) {
            Some(state) => {
                if !state.remote_address.is_empty() && state.remote_address != remote_address {
                    return Err(StateError::RemoteAddressConflict {
                        custodian: self.incognito_address.to_string(),
                        token: token.to_string(),
                        existing: state.remote_address.clone(),
                    });
                }
                state.remote_address = remote_address.to_string();
                state.deposit(amount)
            }
            None => {
                let mut state = CustodianTokenState::new(remote_address);
                state.deposit(amount)?;
                self.tokens.insert(token.clone(), state);
                debug!("custodian {} registered token {}", self.incognito_address, token);
                Ok(())
            }
        }
    }

    pub fn check_invariant(&self) -> Result<(), StateError> {
        for (token, state) in &self.tokens {
            if !state.is_balanced() {
                return Err(StateError::CollateralInvariant {
                    custodian: self.incognito_address.to_string(),
                    token: token.to_string(),
                    locked: state.locked_collateral,
                    free: state.free_collateral,
                    total: state.total_collateral,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn btc() -> TokenId {
        TokenId::from("btc")
    }

    #[test]
    fn test_deposit_creates_token_state() {
        let mut rec = CustodianRecord::new(PaymentAddress::new("c1"));
        rec.deposit(&btc(), "bc1qremote", 1000).unwrap();
        let s = rec.token(&btc()).unwrap();
        assert_eq!(s.total_collateral, 1000);
        assert_eq!(s.free_collateral, 1000);
        assert_eq!(rec.remote_address(&btc()), Some("bc1qremote"));
    }

    #[test]
    fn test_deposit_conflicting_remote_address_is_rejected() {
        let mut rec = CustodianRecord::new(PaymentAddress::new("c1"));
        rec.deposit(&btc(), "addr-a", 1000).unwrap();
        assert!(rec.deposit(&btc(), "addr-b", 10).is_err());
        assert_eq!(rec.token(&btc()).unwrap().total_collateral, 1000);
    }

    #[test]
    fn test_lock_more_than_free_leaves_state_untouched() {
        let mut s = CustodianTokenState::new("r");
        s.deposit(100).unwrap();
        let before = s.clone();
        assert_eq!(
            s.lock(101),
            Err(StateError::InsufficientFreeCollateral { needed: 101, available: 100 })
        );
        assert_eq!(s, before);
    }

    #[test]
    fn test_seize_reduces_total() {
        let mut s = CustodianTokenState::new("r");
        s.deposit(100).unwrap();
        s.lock(60).unwrap();
        s.seize_locked(40).unwrap();
        assert_eq!(s.total_collateral, 60);
        assert_eq!(s.locked_collateral, 20);
        assert_eq!(s.free_collateral, 40);
        assert!(s.is_balanced());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(u64),
        Lock(u64),
        Unlock(u64),
        Withdraw(u64),
        Seize(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..10_000).prop_map(Op::Deposit),
            (0u64..10_000).prop_map(Op::Lock),
            (0u64..10_000).prop_map(Op::Unlock),
            (0u64..10_000).prop_map(Op::Withdraw),
            (0u64..10_000).prop_map(Op::Seize),
        ]
    }

    proptest! {
        #[test]
        fn prop_collateral_invariant_holds(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut s = CustodianTokenState::new("r");
            for op in ops {
                let _ = match op {
                    Op::Deposit(a) => s.deposit(a),
                    Op::Lock(a) => s.lock(a),
                    Op::Unlock(a) => s.unlock(a),
                    Op::Withdraw(a) => s.withdraw_free(a),
                    Op::Seize(a) => s.seize_locked(a),
                };
                prop_assert!(s.is_balanced());
            }
        }
    }
}
