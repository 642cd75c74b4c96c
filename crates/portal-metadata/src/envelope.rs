// Metadata envelope
//
// SAFETY INVARIANTS:
// 1. Metadata is a closed sum type; parse_metadata dispatches on "Type" before decoding the body
// 2. Beacon-only meta types are never accepted as transaction metadata
// 3. Sanity and self checks are permanent failures; chain-state failures are permanent
//    for responses and retryable for requests
// 4. Only shard-originated requests build actions

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use portal_state::Hash;

use crate::action::ShardAction;
use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::custodian_deposit::CustodianDeposit;
use crate::custodian_withdraw::CustodianWithdraw;
use crate::errors::MetadataError;
use crate::exchange_rates::ExchangeRates;
use crate::liquidation_pool::RedeemFromLiquidationPool;
use crate::meta_type::MetaType;
use crate::porting::{RequestPorting, UserRequestPToken};
use crate::redeem::{RedeemRequest, ReqMatchingRedeem, RequestUnlockCollateral};
use crate::responses::ResponseMeta;
use crate::reward::RequestWithdrawReward;
use crate::topup::CustodianTopup;
use crate::transaction::Transaction;

/// Outcome of a passing sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeCheck {
    /// The caller still applies the normal fee rules
    Continue,
    /// Zero or variable fee is acceptable for this type
    Skip,
}

/// Contract every metadata variant fulfils.
pub trait MetadataValidator {
    fn meta_type(&self) -> MetaType;

    /// Deterministic hash of the canonical field encoding.
    fn hash(&self) -> Hash;

    /// Pure structural check, no external state.
    fn validate_metadata_by_itself(&self) -> bool;

    /// Checks that do not depend on ledger state.
    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError>;

    /// Checks against the committed shard and beacon views.
    fn validate_tx_with_blockchain(
        &self,
        tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    CustodianDeposit(CustodianDeposit),
    RequestPorting(RequestPorting),
    UserRequestPToken(UserRequestPToken),
    RedeemRequest(RedeemRequest),
    ReqMatchingRedeem(ReqMatchingRedeem),
    RequestUnlockCollateral(RequestUnlockCollateral),
    CustodianWithdraw(CustodianWithdraw),
    ExchangeRates(ExchangeRates),
    CustodianTopup(CustodianTopup),
    RequestWithdrawReward(RequestWithdrawReward),
    RedeemFromLiquidationPool(RedeemFromLiquidationPool),
    Response(ResponseMeta),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            Metadata::CustodianDeposit($m) => $body,
            Metadata::RequestPorting($m) => $body,
            Metadata::UserRequestPToken($m) => $body,
            Metadata::RedeemRequest($m) => $body,
            Metadata::ReqMatchingRedeem($m) => $body,
            Metadata::RequestUnlockCollateral($m) => $body,
            Metadata::CustodianWithdraw($m) => $body,
            Metadata::ExchangeRates($m) => $body,
            Metadata::CustodianTopup($m) => $body,
            Metadata::RequestWithdrawReward($m) => $body,
            Metadata::RedeemFromLiquidationPool($m) => $body,
            Metadata::Response($m) => $body,
        }
    };
}

impl MetadataValidator for Metadata {
    fn meta_type(&self) -> MetaType {
        dispatch!(self, m => m.meta_type())
    }

    fn hash(&self) -> Hash {
        dispatch!(self, m => m.hash())
    }

    fn validate_metadata_by_itself(&self) -> bool {
        dispatch!(self, m => m.validate_metadata_by_itself())
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        dispatch!(self, m => m.validate_sanity_data(chain, tx))
    }

    fn validate_tx_with_blockchain(
        &self,
        tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        dispatch!(self, m => m.validate_tx_with_blockchain(tx, chain, shard, beacon))
    }
}

impl Metadata {
    /// Beacon-bound actions for an accepted request; none for responses.
    pub fn build_req_actions(
        &self,
        tx: &dyn Transaction,
        shard_id: u8,
        shard_height: u64,
    ) -> Result<Vec<ShardAction>, MetadataError> {
        if !self.meta_type().is_request() {
            return Ok(Vec::new());
        }
        Ok(vec![ShardAction::build(self, tx.hash(), shard_id, shard_height)?])
    }

    /// Whether a failure of this metadata must never be retried.
    pub fn is_permanent_failure(&self, err: &MetadataError) -> bool {
        self.meta_type().is_response() || err.is_permanent()
    }

    pub fn to_json(&self) -> Result<String, MetadataError> {
        serde_json::to_string(self).map_err(|e| MetadataError::Malformed(e.to_string()))
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, MetadataError> {
    serde_json::from_value(value).map_err(|e| MetadataError::Malformed(e.to_string()))
}

/// Decode metadata from an already-parsed JSON value.
pub fn parse_metadata_value(value: serde_json::Value) -> Result<Metadata, MetadataError> {
    let code = value
        .get("Type")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| MetadataError::Malformed("missing numeric Type".into()))?;
    let code = i32::try_from(code).map_err(|_| MetadataError::UnknownType(i32::MAX))?;
    let meta_type = MetaType::from_code(code).ok_or(MetadataError::UnknownType(code))?;

    let meta = match meta_type {
        MetaType::CustodianDeposit => Metadata::CustodianDeposit(decode(value)?),
        MetaType::RequestPorting => Metadata::RequestPorting(decode(value)?),
        MetaType::UserRequestPToken => Metadata::UserRequestPToken(decode(value)?),
        MetaType::RedeemRequest => Metadata::RedeemRequest(decode(value)?),
        MetaType::ReqMatchingRedeem => Metadata::ReqMatchingRedeem(decode(value)?),
        MetaType::RequestUnlockCollateral => Metadata::RequestUnlockCollateral(decode(value)?),
        MetaType::CustodianWithdrawRequest => Metadata::CustodianWithdraw(decode(value)?),
        MetaType::ExchangeRates => Metadata::ExchangeRates(decode(value)?),
        MetaType::CustodianTopup => Metadata::CustodianTopup(decode(value)?),
        MetaType::RequestWithdrawReward => Metadata::RequestWithdrawReward(decode(value)?),
        MetaType::RedeemFromLiquidationPool => Metadata::RedeemFromLiquidationPool(decode(value)?),
        MetaType::CustodianDepositResponse
        | MetaType::UserRequestPTokenResponse
        | MetaType::RedeemRequestResponse
        | MetaType::CustodianWithdrawResponse
        | MetaType::LiquidateCustodianResponse
        | MetaType::RequestWithdrawRewardResponse
        | MetaType::RedeemFromLiquidationPoolResponse
        | MetaType::CustodianTopupResponse
        | MetaType::PortingResponse => Metadata::Response(decode(value)?),
        MetaType::LiquidateCustodian
        | MetaType::LiquidateTpExchangeRates
        | MetaType::ExpiredWaitingPortingReq
        | MetaType::PortalReward
        | MetaType::PickMoreCustodianForRedeem => {
            return Err(MetadataError::NotTransactionMetadata(code))
        }
    };
    Ok(meta)
}

/// Decode metadata JSON carried by a transaction.
pub fn parse_metadata(json: &str) -> Result<Metadata, MetadataError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| MetadataError::Malformed(e.to_string()))?;
    parse_metadata_value(value)
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        dispatch!(self, m => m.serialize(serializer))
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        parse_metadata_value(value).map_err(serde::de::Error::custom)
    }
}
