// Per-height processing context
//
// SAFETY INVARIANTS:
// 1. A context lives for exactly one beacon height and is never shared between heights
// 2. Rewards are keyed by (custodian, token) in a BTreeMap, so the reward instruction
//    lists them in a replica-identical order
// 3. A rejection never replaces an existing status record for the same key

use serde::Serialize;
use std::collections::BTreeMap;

use portal_metadata::content::CustodianReward;
use portal_state::{PaymentAddress, PortalParams, StateError, StatusKey, StatusKind, StatusRecord, TokenId};

use crate::errors::BeaconError;

/// Status bytes for request families without a lifecycle of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            RequestStatus::Accepted => 1,
            RequestStatus::Rejected => 2,
        }
    }
}

/// Explicitly passed state for one beacon height: parameters, the tracing
/// span all log lines of the height run under, and fee rewards collected
/// while instructions are applied.
pub struct ProcessingContext<'a> {
    pub beacon_height: u64,
    pub params: &'a PortalParams,
    span: tracing::Span,
    rewards: BTreeMap<(PaymentAddress, TokenId), u64>,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(beacon_height: u64, params: &'a PortalParams) -> Self {
        ProcessingContext {
            beacon_height,
            params,
            span: tracing::info_span!("portal_height", beacon_height),
            rewards: BTreeMap::new(),
        }
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn add_reward(&mut self, custodian: &PaymentAddress, token: &TokenId, amount: u64) -> Result<(), BeaconError> {
        if amount == 0 {
            return Ok(());
        }
        let slot = self.rewards.entry((custodian.clone(), token.clone())).or_insert(0);
        *slot = slot
            .checked_add(amount)
            .ok_or_else(|| BeaconError::internal(format!("reward overflow for {}", custodian)))?;
        Ok(())
    }

    pub fn pending_rewards(&self) -> u64 {
        self.rewards.values().sum()
    }

    /// Drain the rewards collected so far, in (custodian, token) order.
    pub fn take_rewards(&mut self) -> Vec<CustodianReward> {
        std::mem::take(&mut self.rewards)
            .into_iter()
            .map(|((custodian_address, token_id), amount)| CustodianReward { custodian_address, token_id, amount })
            .collect()
    }
}

/// A status record an applied instruction wants persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusWrite {
    pub key: StatusKey,
    pub record: StatusRecord,
    /// False for rejections: an earlier record under the same key wins
    pub replace: bool,
}

impl StatusWrite {
    pub fn new<T: Serialize>(
        kind: StatusKind,
        id: impl Into<String>,
        status: u8,
        beacon_height: u64,
        detail: &T,
    ) -> Result<Self, BeaconError> {
        let detail = serde_json::to_value(detail)
            .map_err(|e| BeaconError::internal(format!("status detail: {}", e)))?;
        Ok(StatusWrite {
            key: StatusKey::new(kind, id),
            record: StatusRecord::new(status, beacon_height, detail),
            replace: true,
        })
    }

    pub fn rejection<T: Serialize>(
        kind: StatusKind,
        id: impl Into<String>,
        status: u8,
        beacon_height: u64,
        detail: &T,
        reason: &str,
    ) -> Result<Self, BeaconError> {
        let mut write = Self::new(kind, id, status, beacon_height, detail)?;
        write.record = write.record.with_reason(reason);
        write.replace = false;
        Ok(write)
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.record = self.record.with_reason(reason);
        self
    }
}

/// `amount` split in proportion to `weights`.
///
/// Integer remainders go to the first share, so the parts always sum to `amount`.
pub fn split_proportionally(amount: u64, weights: &[u64]) -> Result<Vec<u64>, BeaconError> {
    let total: u128 = weights.iter().map(|w| u128::from(*w)).sum();
    if total == 0 || weights.is_empty() {
        return Ok(vec![0; weights.len()]);
    }
    let mut parts = weights
        .iter()
        .map(|w| u64::try_from(u128::from(amount) * u128::from(*w) / total).map_err(|_| StateError::Overflow))
        .collect::<Result<Vec<u64>, _>>()?;
    let given: u64 = parts.iter().sum();
    parts[0] += amount - given;
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_proportionally_sums_to_amount() {
        assert_eq!(split_proportionally(100, &[1000, 200]).unwrap(), vec![84, 16]);
        assert_eq!(split_proportionally(7, &[1, 1, 1]).unwrap(), vec![3, 2, 2]);
        assert_eq!(split_proportionally(5, &[0, 0]).unwrap(), vec![0, 0]);
        assert!(split_proportionally(5, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_split_proportionally_handles_extreme_weights() {
        let parts = split_proportionally(u64::MAX, &[u64::MAX, u64::MAX, 1]).unwrap();
        assert_eq!(parts.iter().map(|p| u128::from(*p)).sum::<u128>(), u128::from(u64::MAX));
        assert_eq!(parts[1], u64::MAX / 2);
    }

    #[test]
    fn test_rewards_drain_in_key_order() {
        let params = PortalParams::default();
        let mut ctx = ProcessingContext::new(7, &params);
        let btc = TokenId::from("btc");
        ctx.add_reward(&PaymentAddress::new("c2"), &btc, 5).unwrap();
        ctx.add_reward(&PaymentAddress::new("c1"), &btc, 3).unwrap();
        ctx.add_reward(&PaymentAddress::new("c2"), &btc, 1).unwrap();
        ctx.add_reward(&PaymentAddress::new("c3"), &btc, 0).unwrap();
        assert_eq!(ctx.pending_rewards(), 9);
        let rewards = ctx.take_rewards();
        assert_eq!(rewards.len(), 2);
        assert_eq!(rewards[0].custodian_address, PaymentAddress::new("c1"));
        assert_eq!(rewards[1].amount, 6);
        assert!(ctx.take_rewards().is_empty());
    }

    #[test]
    fn test_rejection_does_not_replace() {
        let w = StatusWrite::rejection(StatusKind::PortingRequest, "p1", 4, 3, &"detail", "duplicate").unwrap();
        assert!(!w.replace);
        assert_eq!(w.record.reason.as_deref(), Some("duplicate"));
        assert_eq!(w.key.to_string(), "porting-p1");
    }
}
