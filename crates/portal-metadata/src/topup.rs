use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{
    require_address, require_no_burn, require_portal_token, require_prv_burn, require_signer, require_tx,
};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, RequestHeader};
use crate::meta_type::MetaType;
use crate::transaction::{Transaction, TxType};

/// Custodian raises its locked collateral for one token, from a fresh burn,
/// from its free collateral, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianTopup {
    #[serde(flatten)]
    pub header: RequestHeader,
    pub incognito_address: PaymentAddress,
    #[serde(rename = "PTokenID")]
    pub token_id: TokenId,
    pub deposit_amount: u64,
    pub free_collateral_amount: u64,
}

impl CustodianTopup {
    pub fn new(
        incognito_address: PaymentAddress,
        token_id: TokenId,
        deposit_amount: u64,
        free_collateral_amount: u64,
    ) -> Self {
        CustodianTopup {
            header: RequestHeader::new(MetaType::CustodianTopup),
            incognito_address,
            token_id,
            deposit_amount,
            free_collateral_amount,
        }
    }
}

impl MetadataValidator for CustodianTopup {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(self.incognito_address.as_str())
            .str(self.token_id.as_str())
            .u64(self.deposit_amount)
            .u64(self.free_collateral_amount)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::CustodianTopup
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        require_tx(tx, TxType::Normal)?;
        require_address("incognito address", &self.incognito_address)?;
        require_signer(tx, &self.incognito_address)?;
        require_portal_token(chain.params(), &self.token_id)?;
        if self.deposit_amount == 0 && self.free_collateral_amount == 0 {
            return Err(MetadataError::invalid("topup amount", "zero"));
        }
        if self.deposit_amount > 0 {
            require_prv_burn(tx, self.deposit_amount)?;
        } else {
            require_no_burn(tx)?;
        }
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        _chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        let token = beacon
            .portal_state()
            .custodian_token(&self.incognito_address, &self.token_id)
            .ok_or_else(|| {
                MetadataError::StateConflict(format!(
                    "{} is not a custodian for {}",
                    self.incognito_address, self.token_id
                ))
            })?;
        if token.free_collateral < self.free_collateral_amount {
            return Err(MetadataError::StateConflict(format!(
                "free collateral {} below {}",
                token.free_collateral, self.free_collateral_amount
            )));
        }
        Ok(())
    }
}
