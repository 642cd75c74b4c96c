use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{require_address, require_no_burn, require_portal_token, require_signer, require_tx};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, SignatureVerifiable, SignedRequestHeader};
use crate::meta_type::MetaType;
use crate::transaction::{Transaction, TxType};

/// Custodian takes free collateral back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustodianWithdraw {
    #[serde(flatten)]
    pub header: SignedRequestHeader,
    pub custodian_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
    pub amount: u64,
}

impl CustodianWithdraw {
    pub fn new(custodian_address: PaymentAddress, token_id: TokenId, amount: u64) -> Self {
        CustodianWithdraw {
            header: SignedRequestHeader::unsigned(MetaType::CustodianWithdrawRequest),
            custodian_address,
            token_id,
            amount,
        }
    }
}

impl SignatureVerifiable for CustodianWithdraw {
    fn hash_without_sig(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(self.custodian_address.as_str())
            .str(self.token_id.as_str())
            .u64(self.amount)
            .finish()
    }

    fn sig(&self) -> &str {
        &self.header.sig
    }

    fn signer(&self) -> &PaymentAddress {
        &self.custodian_address
    }
}

impl MetadataValidator for CustodianWithdraw {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .hash(&self.hash_without_sig())
            .str(&self.header.sig)
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type == MetaType::CustodianWithdrawRequest
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        require_tx(tx, TxType::Normal)?;
        require_address("custodian address", &self.custodian_address)?;
        require_signer(tx, &self.custodian_address)?;
        self.verify_signature()?;
        require_portal_token(chain.params(), &self.token_id)?;
        if self.amount == 0 {
            return Err(MetadataError::invalid("amount", "zero"));
        }
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
        let token = beacon
            .portal_state()
            .custodian_token(&self.custodian_address, &self.token_id)
            .ok_or_else(|| {
                MetadataError::StateConflict(format!(
                    "{} has no {} collateral",
                    self.custodian_address, self.token_id
                ))
            })?;
        if token.free_collateral < self.amount {
            return Err(MetadataError::StateConflict(format!(
                "free collateral {} below {}",
                token.free_collateral, self.amount
            )));
        }
        Ok(())
    }
}
