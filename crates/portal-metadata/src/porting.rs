// Porting requests
//
// SAFETY INVARIANTS:
// 1. A porting id is registered at most once; the beacon-side seen-set and status store enforce it
// 2. The porting fee is burned at registration and refunded on rejection or expiry
// 3. Public tokens are minted only against a proof paying every matched custodian its share,
//    tagged with the porting memo

use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, PortingRequest, StatusKind, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{
    require_address, require_fee, require_min_amount, require_no_burn, require_not_processed,
    require_portal_token, require_prv_burn, require_signer, require_tx, require_unique_id,
    require_unspent_external_tx,
};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, RequestHeader};
use crate::meta_type::MetaType;
use crate::proof::{decode_proof, porting_memo, ExternalTransfer};
use crate::transaction::{Transaction, TxType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPorting {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(rename = "UniqueRegisterID")]
    pub unique_register_id: String,
    pub incognito_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub register_amount: u64,
    pub porting_fee: u64,
}

impl RequestPorting {
    pub fn new(
        unique_register_id: impl Into<String>,
        incognito_address: PaymentAddress,
        token_id: TokenId,
        register_amount: u64,
        porting_fee: u64,
    ) -> Self {
        RequestPorting {
            header: RequestHeader::new(MetaType::RequestPorting),
            unique_register_id: unique_register_id.into(),
            incognito_address,
            token_id,
            register_amount,
            porting_fee,
        }
    }
}

impl MetadataValidator for RequestPorting {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(&self.unique_register_id)
            .str(self.incognito_address.as_str())
            .str(self.token_id.as_str())
            .u64(self.register_amount)
            .u64(self.porting_fee)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::RequestPorting
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        let params = chain.params();
        require_tx(tx, TxType::Normal)?;
        require_unique_id("unique register id", &self.unique_register_id)?;
        require_address("incognito address", &self.incognito_address)?;
        require_portal_token(params, &self.token_id)?;
        require_min_amount(params, &self.token_id, self.register_amount)?;
        if self.porting_fee == 0 {
            return Err(MetadataError::invalid("porting fee", "zero"));
        }
        require_prv_burn(tx, self.porting_fee)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        require_not_processed(beacon, StatusKind::PortingRequest, &self.unique_register_id)?;
        let state = beacon.portal_state();
        if state.waiting_porting.contains_key(&self.unique_register_id) {
            return Err(MetadataError::Duplicate(self.unique_register_id.clone()));
        }
        let params = chain.params();
        require_fee(
            state,
            params,
            &self.token_id,
            self.register_amount,
            params.porting_fee_bps,
            self.porting_fee,
        )
    }
}

/// Porter asks for public tokens after paying the matched custodians.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRequestPToken {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(rename = "UniquePortingID")]
    pub unique_porting_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub incognito_address: PaymentAddress,
    pub porting_amount: u64,
    pub porting_proof: String,
    /// External transaction the proof covers
    #[serde(rename = "ExternalTxID")]
    pub external_tx_id: String,
}

impl UserRequestPToken {
    pub fn new(
        unique_porting_id: impl Into<String>,
        token_id: TokenId,
        incognito_address: PaymentAddress,
        porting_amount: u64,
        porting_proof: impl Into<String>,
        external_tx_id: impl Into<String>,
    ) -> Self {
        UserRequestPToken {
            header: RequestHeader::new(MetaType::UserRequestPToken),
            unique_porting_id: unique_porting_id.into(),
            token_id,
            incognito_address,
            porting_amount,
            porting_proof: porting_proof.into(),
            external_tx_id: external_tx_id.into(),
        }
    }

    /// The request must name a waiting porting exactly.
    pub fn check_against(&self, porting: &PortingRequest) -> Result<(), MetadataError> {
        if porting.token_id != self.token_id
            || porting.porter_address != self.incognito_address
            || porting.amount != self.porting_amount
        {
            return Err(MetadataError::StateConflict(format!(
                "request does not match waiting porting {}",
                porting.unique_register_id
            )));
        }
        Ok(())
    }
}

/// Transfer must carry the porting memo and pay each custodian its share.
pub fn check_porting_transfer(
    porting: &PortingRequest,
    transfer: &ExternalTransfer,
) -> Result<(), MetadataError> {
    let memo = porting_memo(&porting.unique_register_id);
    if transfer.memo != memo {
        return Err(MetadataError::Proof(format!(
            "memo {:?} does not match {:?}",
            transfer.memo, memo
        )));
    }
    for custodian in &porting.custodians {
        let paid = transfer.paid_to(&custodian.remote_address);
        if paid < custodian.amount {
            return Err(MetadataError::Proof(format!(
                "custodian {} paid {} of {}",
                custodian.custodian_address, paid, custodian.amount
            )));
        }
    }
    Ok(())
}

impl MetadataValidator for UserRequestPToken {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(&self.unique_porting_id)
            .str(self.token_id.as_str())
            .str(self.incognito_address.as_str())
            .u64(self.porting_amount)
            .str(&self.porting_proof)
            .str(&self.external_tx_id)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::UserRequestPToken
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        let params = chain.params();
        require_tx(tx, TxType::Normal)?;
        require_unique_id("unique porting id", &self.unique_porting_id)?;
        require_unique_id("external tx id", &self.external_tx_id)?;
        require_signer(tx, &self.incognito_address)?;
        require_portal_token(params, &self.token_id)?;
        if self.porting_amount == 0 {
            return Err(MetadataError::invalid("porting amount", "zero"));
        }
        require_no_burn(tx)?;
        decode_proof(&self.porting_proof, params.max_proof_headers)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        let porting = beacon
            .portal_state()
            .waiting_porting
            .get(&self.unique_porting_id)
            .ok_or_else(|| {
                MetadataError::StateConflict(format!(
                    "no waiting porting {}",
                    self.unique_porting_id
                ))
            })?;
        self.check_against(porting)?;
        let token = chain
            .params()
            .token_params(&self.token_id)
            .ok_or_else(|| MetadataError::invalid("token id", "not a portal token"))?;
        let transfer = chain.proof_verifier().verify(token.chain, &self.porting_proof)?;
        require_unspent_external_tx(beacon, &self.token_id, &self.external_tx_id, &transfer)?;
        check_porting_transfer(porting, &transfer)
    }
}
