// Exchange-rate feed
//
// SAFETY INVARIANTS:
// 1. Only the configured feeder address may publish rates, signed over hash_without_sig()
// 2. Every published rate is positive and names a portal token or the collateral token
// 3. An accepted feed replaces the whole rate table

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use portal_state::{Hash, PaymentAddress, PortalParams, TokenId};

use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::checks::{require_no_burn, require_signer, require_tx};
use crate::envelope::{FeeCheck, MetadataValidator};
use crate::errors::MetadataError;
use crate::header::{MetaHasher, SignatureVerifiable, SignedRequestHeader};
use crate::meta_type::MetaType;
use crate::transaction::{Transaction, TxType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeRateEntry {
    #[serde(rename = "PTokenID")]
    pub token_id: TokenId,
    pub rate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeRates {
    #[serde(flatten)]
    pub header: SignedRequestHeader,
    pub sender_address: PaymentAddress,
    pub rates: Vec<ExchangeRateEntry>,
}

impl ExchangeRates {
    pub fn new(sender_address: PaymentAddress, rates: Vec<ExchangeRateEntry>) -> Self {
        ExchangeRates {
            header: SignedRequestHeader::unsigned(MetaType::ExchangeRates),
            sender_address,
            rates,
        }
    }

    /// Rates as the table the beacon installs.
    pub fn to_table(&self) -> BTreeMap<TokenId, u64> {
        self.rates.iter().map(|e| (e.token_id.clone(), e.rate)).collect()
    }

    pub fn check_entries(&self, params: &PortalParams) -> Result<(), MetadataError> {
        if self.rates.is_empty() {
            return Err(MetadataError::invalid("rates", "empty"));
        }
        let mut seen = BTreeSet::new();
        for entry in &self.rates {
            if entry.rate == 0 {
                return Err(MetadataError::invalid("rate", format!("zero rate for {}", entry.token_id)));
            }
            if !params.is_portal_token(&entry.token_id) && entry.token_id != params.prv_token_id {
                return Err(MetadataError::invalid(
                    "rate",
                    format!("{} is neither a portal token nor collateral", entry.token_id),
                ));
            }
            if !seen.insert(&entry.token_id) {
                return Err(MetadataError::invalid("rate", format!("{} listed twice", entry.token_id)));
            }
        }
        Ok(())
    }
}

impl SignatureVerifiable for ExchangeRates {
    fn hash_without_sig(&self) -> Hash {
        let mut hasher = MetaHasher::new(self.header.meta_type);
        hasher.str(self.sender_address.as_str());
        for entry in &self.rates {
            hasher.str(entry.token_id.as_str()).u64(entry.rate);
        }
        hasher.finish()
    }

    fn sig(&self) -> &str {
        &self.header.sig
    }

    fn signer(&self) -> &PaymentAddress {
        &self.sender_address
    }
}

impl MetadataValidator for ExchangeRates {
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
        self.header.meta_type == MetaType::ExchangeRates
    }

    fn validate_sanity_data(
        &self,
        chain: &dyn ChainRetriever,
        tx: &dyn Transaction,
    ) -> Result<FeeCheck, MetadataError> {
        let params = chain.params();
        require_tx(tx, TxType::Normal)?;
        if self.sender_address != params.feeder_address {
            return Err(MetadataError::Unauthorized(format!(
                "{} is not the exchange-rate feeder",
                self.sender_address
            )));
        }
        require_signer(tx, &self.sender_address)?;
        self.verify_signature()?;
        self.check_entries(params)?;
        require_no_burn(tx)?;
        Ok(FeeCheck::Continue)
    }

    fn validate_tx_with_blockchain(
        &self,
        _tx: &dyn Transaction,
        _chain: &dyn ChainRetriever,
        _shard: &dyn ShardViewRetriever,
        _beacon: &dyn BeaconViewRetriever,
    ) -> Result<(), MetadataError> {
        Ok(())
    }
}
