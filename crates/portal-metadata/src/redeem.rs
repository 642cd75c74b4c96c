// Redeem requests
//
// SAFETY INVARIANTS:
// 1. The redeemed public tokens and the PRV fee are burned by the request transaction
// 2. A custodian joins a waiting redeem at most once, and only while it holds the token
// 3. Collateral is unlocked only against a proof paying the redeemer's remote address
//    the custodian's matched share, tagged with the memo of that redeem and custodian
// 4. An external transaction unlocks collateral at most once

use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, RedeemRequest as RedeemRecord, StatusKind, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{
    require_address, require_fee, require_min_amount, require_no_burn, require_not_processed,
    require_portal_token, require_signer, require_token_burn, require_tx, require_unique_id,
    require_unspent_external_tx,
};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, RequestHeader};
use crate::meta_type::MetaType;
use crate::proof::{decode_proof, redeem_memo, ExternalTransfer};
use crate::remote_address::validate_remote_address;
use crate::transaction::{Transaction, TxType};

/// User burns public tokens to get the external asset back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedeemRequest {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub redeem_amount: u64,
    pub redeemer_incognito_address: PaymentAddress,
    pub remote_address: String,
    pub redeem_fee: u64,
}

impl RedeemRequest {
    pub fn new(
        unique_redeem_id: impl Into<String>,
        token_id: TokenId,
        redeem_amount: u64,
        redeemer_incognito_address: PaymentAddress,
        remote_address: impl Into<String>,
        redeem_fee: u64,
    ) -> Self {
        RedeemRequest {
            header: RequestHeader::new(MetaType::RedeemRequest),
            unique_redeem_id: unique_redeem_id.into(),
            token_id,
            redeem_amount,
            redeemer_incognito_address,
            remote_address: remote_address.into(),
            redeem_fee,
        }
    }
}

impl MetadataValidator for RedeemRequest {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(&self.unique_redeem_id)
            .str(self.token_id.as_str())
            .u64(self.redeem_amount)
            .str(self.redeemer_incognito_address.as_str())
            .str(&self.remote_address)
            .u64(self.redeem_fee)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::RedeemRequest
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        let params = chain.params();
        require_tx(tx, TxType::CustomToken)?;
        require_unique_id("unique redeem id", &self.unique_redeem_id)?;
        require_signer(tx, &self.redeemer_incognito_address)?;
        require_portal_token(params, &self.token_id)?;
        require_min_amount(params, &self.token_id, self.redeem_amount)?;
        if let Some(token) = params.token_params(&self.token_id) {
            validate_remote_address(token.chain, &self.remote_address)?;
        }
        if self.redeem_fee == 0 {
            return Err(MetadataError::invalid("redeem fee", "zero"));
        }
        require_token_burn(tx, &self.token_id, self.redeem_amount, self.redeem_fee)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        require_not_processed(beacon, StatusKind::RedeemRequest, &self.unique_redeem_id)?;
        let state = beacon.portal_state();
        if state.redeem(&self.unique_redeem_id).is_some() {
            return Err(MetadataError::Duplicate(self.unique_redeem_id.clone()));
        }
        let params = chain.params();
        require_fee(
            state,
            params,
            &self.token_id,
            self.redeem_amount,
            params.redeem_fee_bps,
            self.redeem_fee,
        )
    }
}

/// Custodian volunteers to pay out part of a waiting redeem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReqMatchingRedeem {
    #[serde(flatten)]
    pub header: RequestHeader,
    pub custodian_address: PaymentAddress,
    #[serde(rename = "RedeemID")]
    pub redeem_id: String,
}

impl ReqMatchingRedeem {
    pub fn new(custodian_address: PaymentAddress, redeem_id: impl Into<String>) -> Self {
        ReqMatchingRedeem {
            header: RequestHeader::new(MetaType::ReqMatchingRedeem),
            custodian_address,
            redeem_id: redeem_id.into(),
        }
    }
}

impl MetadataValidator for ReqMatchingRedeem {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(self.custodian_address.as_str())
            .str(&self.redeem_id)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::ReqMatchingRedeem
    }

    fn validate_sanity_data(
        &self,
        _chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        require_tx(tx, TxType::Normal)?;
        require_unique_id("redeem id", &self.redeem_id)?;
        require_signer(tx, &self.custodian_address)?;
        require_no_burn(tx)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        _chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        let state = beacon.portal_state();
        let redeem = state.waiting_redeem.get(&self.redeem_id).ok_or_else(|| {
            MetadataError::StateConflict(format!("redeem {} is not waiting", self.redeem_id))
        })?;
        if redeem.involves(&self.custodian_address) {
            return Err(MetadataError::Duplicate(format!(
                "{} already matched to {}",
                self.custodian_address, self.redeem_id
            )));
        }
        let holding = state
            .custodian_token(&self.custodian_address, &redeem.token_id)
            .map_or(0, |t| t.holding_public_token_amount);
        if holding == 0 {
            return Err(MetadataError::StateConflict(format!(
                "custodian {} holds no {}",
                self.custodian_address, redeem.token_id
            )));
        }
        Ok(())
    }
}

/// Custodian proves it paid its redeem share and asks for its collateral back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestUnlockCollateral {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub custodian_address: PaymentAddress,
    pub redeem_amount: u64,
    pub redeem_proof: String,
    /// External transaction the proof covers
    #[serde(rename = "ExternalTxID")]
    pub external_tx_id: String,
}

impl RequestUnlockCollateral {
    pub fn new(
        unique_redeem_id: impl Into<String>,
        token_id: TokenId,
        custodian_address: PaymentAddress,
        redeem_amount: u64,
        redeem_proof: impl Into<String>,
        external_tx_id: impl Into<String>,
    ) -> Self {
        RequestUnlockCollateral {
            header: RequestHeader::new(MetaType::RequestUnlockCollateral),
            unique_redeem_id: unique_redeem_id.into(),
            token_id,
            custodian_address,
            redeem_amount,
            redeem_proof: redeem_proof.into(),
            external_tx_id: external_tx_id.into(),
        }
    }

    /// The custodian must hold an unpaid share of exactly this amount.
    pub fn check_against(&self, redeem: &RedeemRecord) -> Result<(), MetadataError> {
        if redeem.token_id != self.token_id {
            return Err(MetadataError::StateConflict(format!(
                "redeem {} is for {}",
                redeem.unique_redeem_id, redeem.token_id
            )));
        }
        let share = redeem.custodian(&self.custodian_address).ok_or_else(|| {
            MetadataError::StateConflict(format!(
                "{} is not matched to redeem {}",
                self.custodian_address, redeem.unique_redeem_id
            ))
        })?;
        if share.amount != self.redeem_amount {
            return Err(MetadataError::StateConflict(format!(
                "matched share {} != requested {}",
                share.amount, self.redeem_amount
            )));
        }
        Ok(())
    }
}

/// Transfer must carry `custodian`'s memo for this redeem and pay the redeemer at least `amount`.
pub fn check_redeem_transfer(
    redeem: &RedeemRecord,
    custodian: &PaymentAddress,
    amount: u64,
    transfer: &ExternalTransfer,
) -> Result<(), MetadataError> {
    let memo = redeem_memo(&redeem.unique_redeem_id, custodian);
    if transfer.memo != memo {
        return Err(MetadataError::Proof(format!(
            "memo {:?} does not match {:?}",
            transfer.memo, memo
        )));
    }
    let paid = transfer.paid_to(&redeem.redeemer_remote_address);
    if paid < amount {
        return Err(MetadataError::Proof(format!(
            "redeemer {} paid {} of {}",
            redeem.redeemer_remote_address, paid, amount
        )));
    }
    Ok(())
}

impl MetadataValidator for RequestUnlockCollateral {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(&self.unique_redeem_id)
            .str(self.token_id.as_str())
            .str(self.custodian_address.as_str())
            .u64(self.redeem_amount)
            .str(&self.redeem_proof)
            .str(&self.external_tx_id)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::RequestUnlockCollateral
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        let params = chain.params();
        require_tx(tx, TxType::Normal)?;
        require_unique_id("unique redeem id", &self.unique_redeem_id)?;
        require_unique_id("external tx id", &self.external_tx_id)?;
        require_address("custodian address", &self.custodian_address)?;
        require_signer(tx, &self.custodian_address)?;
        require_portal_token(params, &self.token_id)?;
        if self.redeem_amount == 0 {
            return Err(MetadataError::invalid("redeem amount", "zero"));
        }
        require_no_burn(tx)?;
        decode_proof(&self.redeem_proof, params.max_proof_headers)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        let state = beacon.portal_state();
        let redeem = state.matched_redeem.get(&self.unique_redeem_id).ok_or_else(|| {
            MetadataError::StateConflict(format!("redeem {} is not matched", self.unique_redeem_id))
        })?;
        self.check_against(redeem)?;
        let token = chain
            .params()
            .token_params(&self.token_id)
            .ok_or_else(|| MetadataError::invalid("token id", "not a portal token"))?;
        let transfer = chain.proof_verifier().verify(token.chain, &self.redeem_proof)?;
        require_unspent_external_tx(beacon, &self.token_id, &self.external_tx_id, &transfer)?;
        check_redeem_transfer(redeem, &self.custodian_address, self.redeem_amount, &transfer)
    }
}
