//! Exchange rate snapshot published by the feeder.
//!
//! Rates are the price of one smallest unit of each token in a common unit.
//! The table is only ever replaced as a whole.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::StateError;
use crate::types::{to_u64, TokenId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeRateTable {
    pub rates: BTreeMap<TokenId, u64>,
}

impl ExchangeRateTable {
    pub fn new(rates: BTreeMap<TokenId, u64>) -> Self {
        ExchangeRateTable { rates }
    }

    /// Replace the whole snapshot.
    pub fn replace(&mut self, rates: BTreeMap<TokenId, u64>) {
        self.rates = rates;
    }

    pub fn rate(&self, token: &TokenId) -> Option<u64> {
        self.rates.get(token).copied().filter(|r| *r > 0)
    }

    pub fn has_rates(&self, tokens: &[&TokenId]) -> bool {
        tokens.iter().all(|t| self.rate(t).is_some())
    }

    /// `amount` of `token` valued in the common unit.
    pub fn value_of(&self, token: &TokenId, amount: u64) -> Result<u128, StateError> {
        let rate = self
            .rate(token)
            .ok_or_else(|| StateError::MissingExchangeRate(token.to_string()))?;
        Ok(u128::from(amount) * u128::from(rate))
    }

    /// Convert `amount` of `from` into `to`, rounding down.
    pub fn convert(&self, from: &TokenId, to: &TokenId, amount: u64) -> Result<u64, StateError> {
        let value = self.value_of(from, amount)?;
        let to_rate = self
            .rate(to)
            .ok_or_else(|| StateError::MissingExchangeRate(to.to_string()))?;
        to_u64(value / u128::from(to_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExchangeRateTable {
        let mut rates = BTreeMap::new();
        rates.insert(TokenId::from("btc"), 50_000);
        rates.insert(TokenId::from("prv"), 1);
        rates.insert(TokenId::from("zero"), 0);
        ExchangeRateTable::new(rates)
    }

    #[test]
    fn test_convert_rounds_down() {
        let t = table();
        assert_eq!(t.convert(&"btc".into(), &"prv".into(), 2).unwrap(), 100_000);
        assert_eq!(t.convert(&"prv".into(), &"btc".into(), 99_999).unwrap(), 1);
    }

    #[test]
    fn test_zero_rate_counts_as_missing() {
        let t = table();
        assert!(t.rate(&"zero".into()).is_none());
        assert_eq!(
            t.value_of(&"zero".into(), 1),
            Err(StateError::MissingExchangeRate("zero".into()))
        );
    }

    #[test]
    fn test_replace_drops_old_entries() {
        let mut t = table();
        let mut rates = BTreeMap::new();
        rates.insert(TokenId::from("eth"), 3000);
        t.replace(rates);
        assert!(t.rate(&"btc".into()).is_none());
        assert_eq!(t.rate(&"eth".into()), Some(3000));
    }
}
