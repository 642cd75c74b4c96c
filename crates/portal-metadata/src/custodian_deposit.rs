use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{require_address, require_portal_token, require_prv_burn, require_signer, require_tx};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, RequestHeader};
use crate::meta_type::MetaType;
use crate::remote_address::validate_remote_address;
use crate::transaction::{Transaction, TxType};

/// Custodian locks PRV collateral for one portal token.
///
/// The collateral is burned by the transaction; the beacon credits it to the
/// custodian, or refunds it when the remote address conflicts with an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianDeposit {
    #[serde(flatten)]
    pub header: RequestHeader,
    pub incognito_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub remote_address: String,
    pub deposit_amount: u64,
}

impl CustodianDeposit {
    pub fn new(
        incognito_address: PaymentAddress,
        token_id: TokenId,
        remote_address: impl Into<String>,
        deposit_amount: u64,
    ) -> Self {
        CustodianDeposit {
            header: RequestHeader::new(MetaType::CustodianDeposit),
            incognito_address,
            token_id,
            remote_address: remote_address.into(),
            deposit_amount,
        }
    }
}

impl MetadataValidator for CustodianDeposit {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(self.incognito_address.as_str())
            .str(self.token_id.as_str())
            .str(&self.remote_address)
            .u64(self.deposit_amount)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::CustodianDeposit
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        let params = chain.params();
        require_tx(tx, TxType::Normal)?;
        require_address("incognito address", &self.incognito_address)?;
        require_signer(tx, &self.incognito_address)?;
        require_portal_token(params, &self.token_id)?;
        if let Some(token) = params.token_params(&self.token_id) {
            validate_remote_address(token.chain, &self.remote_address)?;
        }
        if self.deposit_amount == 0 {
            return Err(MetadataError::invalid("deposit amount", "zero"));
        }
        require_prv_burn(tx, self.deposit_amount)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        _chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        _beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        // remote-address conflicts resolve on the beacon with a refund
        Ok(())
    }
}
