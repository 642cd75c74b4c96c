// Metadata type registry
//
// SAFETY INVARIANTS:
// 1. Codes are append-only; an existing code is never reused or renumbered
// 2. from_code(code(t)) == Some(t) for every registered type
// 3. Response types are minted by the beacon and never build shard actions

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaType {
    CustodianDeposit,
    RequestPorting,
    UserRequestPToken,
    CustodianDepositResponse,
    UserRequestPTokenResponse,
    ExchangeRates,
    RedeemRequest,
    RedeemRequestResponse,
    RequestUnlockCollateral,
    CustodianWithdrawRequest,
    CustodianWithdrawResponse,
    LiquidateCustodian,
    LiquidateCustodianResponse,
    LiquidateTpExchangeRates,
    ExpiredWaitingPortingReq,
    PortalReward,
    RequestWithdrawReward,
    RequestWithdrawRewardResponse,
    RedeemFromLiquidationPool,
    RedeemFromLiquidationPoolResponse,
    CustodianTopup,
    CustodianTopupResponse,
    PortingResponse,
    ReqMatchingRedeem,
    PickMoreCustodianForRedeem,
}

impl MetaType {
    pub const ALL: [MetaType; 25] = [
        MetaType::CustodianDeposit,
        MetaType::RequestPorting,
        MetaType::UserRequestPToken,
        MetaType::CustodianDepositResponse,
        MetaType::UserRequestPTokenResponse,
        MetaType::ExchangeRates,
        MetaType::RedeemRequest,
        MetaType::RedeemRequestResponse,
        MetaType::RequestUnlockCollateral,
        MetaType::CustodianWithdrawRequest,
        MetaType::CustodianWithdrawResponse,
        MetaType::LiquidateCustodian,
        MetaType::LiquidateCustodianResponse,
        MetaType::LiquidateTpExchangeRates,
        MetaType::ExpiredWaitingPortingReq,
        MetaType::PortalReward,
        MetaType::RequestWithdrawReward,
        MetaType::RequestWithdrawRewardResponse,
        MetaType::RedeemFromLiquidationPool,
        MetaType::RedeemFromLiquidationPoolResponse,
        MetaType::CustodianTopup,
        MetaType::CustodianTopupResponse,
        MetaType::PortingResponse,
        MetaType::ReqMatchingRedeem,
        MetaType::PickMoreCustodianForRedeem,
    ];

    pub fn code(self) -> i32 {
        match self {
            MetaType::CustodianDeposit => 100,
            MetaType::RequestPorting => 101,
            MetaType::UserRequestPToken => 102,
            MetaType::CustodianDepositResponse => 103,
            MetaType::UserRequestPTokenResponse => 104,
            MetaType::ExchangeRates => 105,
            MetaType::RedeemRequest => 106,
            MetaType::RedeemRequestResponse => 107,
            MetaType::RequestUnlockCollateral => 108,
            MetaType::CustodianWithdrawRequest => 110,
            MetaType::CustodianWithdrawResponse => 111,
            MetaType::LiquidateCustodian => 112,
            MetaType::LiquidateCustodianResponse => 113,
            MetaType::LiquidateTpExchangeRates => 114,
            MetaType::ExpiredWaitingPortingReq => 116,
            MetaType::PortalReward => 117,
            MetaType::RequestWithdrawReward => 118,
            MetaType::RequestWithdrawRewardResponse => 119,
            MetaType::RedeemFromLiquidationPool => 120,
            MetaType::RedeemFromLiquidationPoolResponse => 121,
            MetaType::CustodianTopup => 122,
            MetaType::CustodianTopupResponse => 123,
            MetaType::PortingResponse => 125,
            MetaType::ReqMatchingRedeem => 126,
            MetaType::PickMoreCustodianForRedeem => 128,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    /// Beacon-minted response carried by a minting transaction.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            MetaType::CustodianDepositResponse
                | MetaType::UserRequestPTokenResponse
                | MetaType::RedeemRequestResponse
                | MetaType::CustodianWithdrawResponse
                | MetaType::LiquidateCustodianResponse
                | MetaType::RequestWithdrawRewardResponse
                | MetaType::RedeemFromLiquidationPoolResponse
                | MetaType::CustodianTopupResponse
                | MetaType::PortingResponse
        )
    }

    /// Produced by the beacon itself, never carried by a transaction.
    pub fn is_beacon_only(self) -> bool {
        matches!(
            self,
            MetaType::LiquidateCustodian
                | MetaType::LiquidateTpExchangeRates
                | MetaType::ExpiredWaitingPortingReq
                | MetaType::PortalReward
                | MetaType::PickMoreCustodianForRedeem
        )
    }

    pub fn is_request(self) -> bool {
        !self.is_response() && !self.is_beacon_only()
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for MetaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for MetaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        MetaType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown metadata type {}", code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_codes_are_unique_and_roundtrip() {
        let mut seen = BTreeSet::new();
        for t in MetaType::ALL {
            assert!(seen.insert(t.code()), "duplicate code {}", t.code());
            assert_eq!(MetaType::from_code(t.code()), Some(t));
        }
        assert_eq!(MetaType::from_code(109), None);
    }

    #[test]
    fn test_kind_partition() {
        for t in MetaType::ALL {
            let kinds = [t.is_request(), t.is_response(), t.is_beacon_only()];
            assert_eq!(kinds.iter().filter(|k| **k).count(), 1, "{:?}", t);
        }
        assert!(MetaType::RequestPorting.is_request());
        assert!(MetaType::PortingResponse.is_response());
    }

    #[test]
    fn test_serializes_as_number() {
        assert_eq!(serde_json::to_string(&MetaType::RedeemRequest).unwrap(), "106");
        assert!(serde_json::from_str::<MetaType>("999").is_err());
    }
}
