//! Beacon instruction contents.
//!
//! One struct per instruction family. Every content carries the `TxReqID`
//! and `ShardID` of the request it resolves; instructions the beacon raises on
//! its own (liquidations, rewards) carry an id from [`beacon_req_id`] and
//! shard 0. Instructions that settle an earlier request (expiry, run-away
//! liquidation, refunds) reuse that request's id and shard, so the minted
//! response is attributed to the original transaction.

use serde::{Deserialize, Serialize};

use portal_state::{
    Hash, LiquidationDecision, MatchingPortingCustodianDetail, MatchingRedeemCustodianDetail, PaymentAddress,
    TokenId,
};

use crate::exchange_rates::ExchangeRateEntry;

/// Deterministic request id for beacon-originated instructions.
pub fn beacon_req_id(tag: &str, beacon_height: u64, discriminator: &str) -> Hash {
    Hash::compute(format!("{}/{}/{}", tag, beacon_height, discriminator).as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianDepositContent {
    pub incognito_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub remote_address: String,
    pub deposit_amount: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortingRequestContent {
    #[serde(rename = "UniqueRegisterID")]
    pub unique_register_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub porter_address: PaymentAddress,
    pub register_amount: u64,
    pub porting_fee: u64,
    pub custodians: Vec<MatchingPortingCustodianDetail>,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPTokenContent {
    #[serde(rename = "UniquePortingID")]
    pub unique_porting_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub incognito_address: PaymentAddress,
    pub porting_amount: u64,
    #[serde(rename = "ExternalTxID")]
    pub external_tx_id: String,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedeemRequestContent {
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub redeem_amount: u64,
    pub redeemer_incognito_address: PaymentAddress,
    pub remote_address: String,
    pub redeem_fee: u64,
    pub custodians: Vec<MatchingRedeemCustodianDetail>,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReqMatchingRedeemContent {
    pub custodian_address: PaymentAddress,
    #[serde(rename = "RedeemID")]
    pub redeem_id: String,
    pub matching_amount: u64,
    /// The redeem is fully matched after this instruction
    pub is_fully_matched: bool,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnlockCollateralContent {
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub custodian_address: PaymentAddress,
    pub redeem_amount: u64,
    pub unlock_amount: u64,
    #[serde(rename = "ExternalTxID")]
    pub external_tx_id: String,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianWithdrawContent {
    pub custodian_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub amount: u64,
    pub remain_free_collateral: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeRatesContent {
    pub sender_address: PaymentAddress,
    pub rates: Vec<ExchangeRateEntry>,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianTopupContent {
    pub incognito_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub deposit_amount: u64,
    pub free_collateral_amount: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WithdrawRewardContent {
    pub custodian_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub reward_amount: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedeemFromPoolContent {
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub redeem_amount: u64,
    pub redeemer_incognito_address: PaymentAddress,
    /// Collateral paid out; zero on rejection
    pub minted_collateral_amount: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

/// A waiting porting closed without ptokens: timed out, or its custodian was liquidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpiredPortingContent {
    #[serde(rename = "UniquePortingID")]
    pub unique_porting_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub porter_address: PaymentAddress,
    pub porting_fee: u64,
    pub expired_by_liquidation: bool,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

/// A custodian that did not pay its redeem share in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiquidateCustodianContent {
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub custodian_address: PaymentAddress,
    pub redeemer_incognito_address: PaymentAddress,
    pub redeem_pub_token_amount: u64,
    /// Collateral minted to the redeemer, bonus included
    pub liquidated_collateral_amount: u64,
    /// Locked collateral returned to the custodian's free balance
    pub remain_unlock_amount: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiquidationByRatesContent {
    pub decision: LiquidationDecision,
    pub beacon_height: u64,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PickMoreCustodianContent {
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub redeemer_incognito_address: PaymentAddress,
    pub redeem_amount: u64,
    /// Custodians added by this instruction
    pub custodians: Vec<MatchingRedeemCustodianDetail>,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianReward {
    pub custodian_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortalRewardContent {
    pub beacon_height: u64,
    pub rewards: Vec<CustodianReward>,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
}
