// Porting and redeem request records
//
// SAFETY INVARIANTS:
// 1. Matched custodian amounts of a porting request sum exactly to its amount
// 2. Matched custodian amounts of a redeem request never exceed its amount
// 3. Status bytes are part of the persisted record format and never renumbered

use serde::{Deserialize, Serialize};

use crate::types::{Hash, PaymentAddress, TokenId};

/// Custodian share of a porting request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchingPortingCustodianDetail {
    pub custodian_address: PaymentAddress,
    pub remote_address: String,
    pub amount: u64,
    /// Collateral locked for this share while the porting is pending
    pub locked_collateral: u64,
}

/// Custodian share of a redeem request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchingRedeemCustodianDetail {
    pub custodian_address: PaymentAddress,
    pub remote_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortingStatus {
    Waiting,
    Matched,
    Expired,
    Rejected,
}

impl PortingStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            PortingStatus::Waiting => 1,
            PortingStatus::Matched => 2,
            PortingStatus::Expired => 3,
            PortingStatus::Rejected => 4,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(PortingStatus::Waiting),
            2 => Some(PortingStatus::Matched),
            3 => Some(PortingStatus::Expired),
            4 => Some(PortingStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeemStatus {
    Waiting,
    Matched,
    Liquidated,
    Refunded,
    Completed,
}

impl RedeemStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            RedeemStatus::Waiting => 1,
            RedeemStatus::Matched => 2,
            RedeemStatus::Liquidated => 3,
            RedeemStatus::Refunded => 4,
            RedeemStatus::Completed => 5,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(RedeemStatus::Waiting),
            2 => Some(RedeemStatus::Matched),
            3 => Some(RedeemStatus::Liquidated),
            4 => Some(RedeemStatus::Refunded),
            5 => Some(RedeemStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RedeemStatus::Liquidated | RedeemStatus::Refunded | RedeemStatus::Completed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortingRequest {
    pub unique_register_id: String,
    pub tx_req_id: Hash,
    pub token_id: TokenId,
    pub porter_address: PaymentAddress,
    pub amount: u64,
    pub porting_fee: u64,
    pub custodians: Vec<MatchingPortingCustodianDetail>,
    /// Beacon height at which the request was accepted
    pub beacon_height: u64,
    pub shard_id: u8,
    pub status: PortingStatus,
}

impl PortingRequest {
    pub fn matched_amount(&self) -> u64 {
        self.custodians.iter().map(|c| c.amount).sum()
    }

    pub fn involves(&self, custodian: &PaymentAddress) -> bool {
        self.custodians.iter().any(|c| &c.custodian_address == custodian)
    }

    pub fn is_expired_at(&self, beacon_height: u64, timeout_blocks: u64) -> bool {
        beacon_height >= self.beacon_height.saturating_add(timeout_blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedeemRequest {
    pub unique_redeem_id: String,
    pub tx_req_id: Hash,
    pub token_id: TokenId,
    pub redeemer_address: PaymentAddress,
    /// Redeemer's address on the external chain
    pub redeemer_remote_address: String,
    pub amount: u64,
    pub redeem_fee: u64,
    pub custodians: Vec<MatchingRedeemCustodianDetail>,
    pub beacon_height: u64,
    pub shard_id: u8,
    pub status: RedeemStatus,
}

impl RedeemRequest {
    pub fn matched_amount(&self) -> u64 {
        self.custodians.iter().map(|c| c.amount).sum()
    }

    pub fn remaining_amount(&self) -> u64 {
        self.amount.saturating_sub(self.matched_amount())
    }

    pub fn custodian(&self, custodian: &PaymentAddress) -> Option<&MatchingRedeemCustodianDetail> {
        self.custodians.iter().find(|c| &c.custodian_address == custodian)
    }

    pub fn involves(&self, custodian: &PaymentAddress) -> bool {
        self.custodian(custodian).is_some()
    }

    pub fn is_timed_out_at(&self, beacon_height: u64, timeout_blocks: u64) -> bool {
        beacon_height >= self.beacon_height.saturating_add(timeout_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redeem(amount: u64, shares: &[u64]) -> RedeemRequest {
        RedeemRequest {
            unique_redeem_id: "r1".into(),
            tx_req_id: Hash::ZERO,
            token_id: TokenId::from("btc"),
            redeemer_address: PaymentAddress::new("u"),
            redeemer_remote_address: "remote".into(),
            amount,
            redeem_fee: 1,
            custodians: shares
                .iter()
                .enumerate()
                .map(|(i, a)| MatchingRedeemCustodianDetail {
                    custodian_address: PaymentAddress::new(format!("c{}", i)),
                    remote_address: String::new(),
                    amount: *a,
                })
                .collect(),
            beacon_height: 10,
            shard_id: 0,
            status: RedeemStatus::Waiting,
        }
    }

    #[test]
    fn test_status_bytes_are_stable() {
        assert_eq!(PortingStatus::Waiting.as_byte(), 1);
        assert_eq!(PortingStatus::Expired.as_byte(), 3);
        assert_eq!(RedeemStatus::Liquidated.as_byte(), 3);
        assert_eq!(RedeemStatus::Refunded.as_byte(), 4);
        for b in 1..=5 {
            assert_eq!(RedeemStatus::from_byte(b).unwrap().as_byte(), b);
        }
        assert!(PortingStatus::from_byte(9).is_none());
    }

    #[test]
    fn test_redeem_remaining_amount() {
        let r = redeem(100, &[30, 20]);
        assert_eq!(r.matched_amount(), 50);
        assert_eq!(r.remaining_amount(), 50);
        assert!(r.involves(&PaymentAddress::new("c1")));
        assert!(!r.involves(&PaymentAddress::new("c9")));
    }

    #[test]
    fn test_redeem_timeout_boundary() {
        let r = redeem(1, &[]);
        assert!(!r.is_timed_out_at(14, 5));
        assert!(r.is_timed_out_at(15, 5));
    }
}
