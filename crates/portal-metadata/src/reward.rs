use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{require_address, require_no_burn, require_portal_token, require_signer, require_tx};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, SignatureVerifiable, SignedRequestHeader};
use crate::meta_type::MetaType;
use crate::transaction::{Transaction, TxType};

/// Custodian withdraws its accumulated PRV reward for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestWithdrawReward {
    #[serde(flatten)]
    pub header: SignedRequestHeader,
    pub custodian_address: PaymentAddress,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
}

impl RequestWithdrawReward {
    pub fn new(custodian_address: PaymentAddress, token_id: TokenId) -> Self {
        RequestWithdrawReward {
            header: SignedRequestHeader::unsigned(MetaType::RequestWithdrawReward),
            custodian_address,
            token_id,
        }
    }
}

impl SignatureVerifiable for RequestWithdrawReward {
    fn hash_without_sig(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(self.custodian_address.as_str())
            .str(self.token_id.as_str())
            .finish()
    }

    fn sig(&self) -> &str {
        &self.header.sig
    }

    fn signer(&self) -> &PaymentAddress {
        &self.custodian_address
    }
}

impl MetadataValidator for RequestWithdrawReward {
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
        self.header.meta_type == MetaType::RequestWithdrawReward
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
        let reward = beacon
            .portal_state()
            .custodian_token(&self.custodian_address, &self.token_id)
            .map_or(0, |t| t.reward_amount);
        if reward == 0 {
            return Err(MetadataError::StateConflict(format!(
                "{} has no {} reward",
                self.custodian_address, self.token_id
            )));
        }
        Ok(())
    }
}
