use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, StatusKind, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{
    require_min_amount, require_not_processed, require_portal_token, require_signer, require_token_burn,
    require_tx, require_unique_id,
};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, RequestHeader};
use crate::meta_type::MetaType;
use crate::transaction::{Transaction, TxType};

/// Burn public tokens for a pro-rata share of liquidated collateral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedeemFromLiquidationPool {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(rename = "UniqueRedeemID")]
    pub unique_redeem_id: String,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub redeem_amount: u64,
    pub redeemer_incognito_address: PaymentAddress,
}

impl RedeemFromLiquidationPool {
    pub fn new(
        unique_redeem_id: impl Into<String>,
        token_id: TokenId,
        redeem_amount: u64,
        redeemer_incognito_address: PaymentAddress,
    ) -> Self {
        RedeemFromLiquidationPool {
            header: RequestHeader::new(MetaType::RedeemFromLiquidationPool),
            unique_redeem_id: unique_redeem_id.into(),
            token_id,
            redeem_amount,
            redeemer_incognito_address,
        }
    }
}

impl MetadataValidator for RedeemFromLiquidationPool {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(&self.unique_redeem_id)
            .str(self.token_id.as_str())
            .u64(self.redeem_amount)
            .str(self.redeemer_incognito_address.as_str())
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::RedeemFromLiquidationPool
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
        require_token_burn(tx, &self.token_id, self.redeem_amount, 0)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        _chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        require_not_processed(beacon, StatusKind::RedeemFromLiquidationPool, &self.unique_redeem_id)?;
        beacon
            .portal_state()
            .liquidation_pool
            .quote(&self.token_id, self.redeem_amount)
            .map_err(|e| MetadataError::StateConflict(e.to_string()))?;
        Ok(())
    }
}
