use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, TokenId};

use crate::action::InstStatus;
use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{require_address, require_tx};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, RequestHeader};
use crate::meta_type::MetaType;
use crate::transaction::{Transaction, TxType};

/// Metadata of a beacon-authorized minting transaction.
///
/// One shape serves every response type; the minted coin must match
/// `receiver_address`, `amount` and `token_id` exactly, and `req_tx_id`
/// names the request the beacon instruction resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseMeta {
    #[serde(flatten)]
    pub header: RequestHeader,
    pub request_status: InstStatus,
    #[serde(rename = "ReqTxID")]
    pub req_tx_id: Hash,
    pub receiver_address: PaymentAddress,
    pub amount: u64,
    #[serde(rename = "TokenID")]
    pub token_id: TokenId,
}

impl ResponseMeta {
    pub fn new(
        meta_type: MetaType,
        request_status: InstStatus,
        req_tx_id: Hash,
        receiver_address: PaymentAddress,
        amount: u64,
        token_id: TokenId,
    ) -> Self {
        ResponseMeta {
            header: RequestHeader::new(meta_type),
            request_status,
            req_tx_id,
            receiver_address,
            amount,
            token_id,
        }
    }
}

impl MetadataValidator for ResponseMeta {
    fn meta_type(&self) -> MetaType {
        self.header.meta_type
    }

    fn hash(&self) -> Hash {
        MetaHasher::new(self.header.meta_type)
            .str(self.request_status.as_str())
            .hash(&self.req_tx_id)
            .str(self.receiver_address.as_str())
            .u64(self.amount)
            .str(self.token_id.as_str())
            .finish()
    }

    fn validate_metadata_by_itself(&self) -> bool {
        self.header.meta_type.is_response()
    }

    fn validate_sanity_data(
        &self,
        _chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        require_tx(tx, TxType::Mint)?;
        require_address("receiver address", &self.receiver_address)?;
        if self.amount == 0 {
            return Err(MetadataError::invalid("amount", "zero"));
        }
        let coin = tx
            .minted_coin()
            .ok_or_else(|| MetadataError::TxShape("response transaction mints nothing".into()))?;
        if coin.receiver != self.receiver_address || coin.amount != self.amount || coin.token_id != self.token_id {
            return Err(MetadataError::BurnMismatch(format!(
                "minted {:?} does not match response ({}, {}, {})",
                coin, self.receiver_address, self.amount, self.token_id
            )));
        }
        Ok(FeeCheck::Skip)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        chain: &dyn ChainRetriever,
        shard: &dyn ShardViewRetriever,
        _beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        let receiver_shard = self.receiver_address.shard_id(chain.params().num_shards)?;
        if receiver_shard != shard.shard_id() {
            return Err(MetadataError::StateConflict(format!(
                "receiver lives in shard {}, minting in shard {}",
                receiver_shard,
                shard.shard_id()
            )));
        }
        Ok(())
    }
}
