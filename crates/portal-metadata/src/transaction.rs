//! Ledger transaction as seen by the metadata layer.
//!
//! The UTXO/commitment scheme lives elsewhere; validators only need the
//! facts below, recomputed by the ledger from the transaction itself.

use serde::{Deserialize, Serialize};

use portal_state::{Hash, PaymentAddress, TokenId};

use crate::envelope::Metadata;

pub const TX_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    /// PRV transfer
    Normal,
    /// Custom token transfer (with PRV fee)
    CustomToken,
    /// Beacon-authorized minting
    Mint,
}

/// Value sent to the burning address by a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BurnData {
    pub prv_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<BurnedToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BurnedToken {
    pub token_id: TokenId,
    pub amount: u64,
}

impl BurnData {
    pub fn is_burned(&self) -> bool {
        self.prv_amount > 0 || self.token.as_ref().map_or(false, |t| t.amount > 0)
    }

    pub fn token_amount(&self, token: &TokenId) -> u64 {
        self.token
            .as_ref()
            .filter(|t| &t.token_id == token)
            .map_or(0, |t| t.amount)
    }
}

/// The single output of a minting transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MintedCoin {
    pub receiver: PaymentAddress,
    pub amount: u64,
    pub token_id: TokenId,
}

pub trait Transaction {
    fn hash(&self) -> Hash;
    fn tx_type(&self) -> TxType;
    fn version(&self) -> u8;
    /// Public key that signed the transaction
    fn sig_pub_key(&self) -> [u8; 32];
    fn sender_shard_id(&self) -> u8;
    fn burn_data(&self) -> BurnData;
    fn minted_coin(&self) -> Option<MintedCoin>;
    fn metadata(&self) -> Option<&Metadata>;
}

/// Plain transaction record, used for replay files and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortalTx {
    pub hash: Hash,
    pub tx_type: TxType,
    pub version: u8,
    #[serde(with = "hex_key")]
    pub sig_pub_key: [u8; 32],
    pub sender_shard_id: u8,
    #[serde(default)]
    pub burn: BurnData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint: Option<MintedCoin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Transaction for PortalTx {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn tx_type(&self) -> TxType {
        self.tx_type
    }

    fn version(&self) -> u8 {
        self.version
    }

    fn sig_pub_key(&self) -> [u8; 32] {
        self.sig_pub_key
    }

    fn sender_shard_id(&self) -> u8 {
        self.sender_shard_id
    }

    fn burn_data(&self) -> BurnData {
        self.burn.clone()
    }

    fn minted_coin(&self) -> Option<MintedCoin> {
        self.mint.clone()
    }

    fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }
}

mod hex_key {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("public key must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_data_token_amount() {
        let burn = BurnData {
            prv_amount: 5,
            token: Some(BurnedToken { token_id: TokenId::from("btc"), amount: 7 }),
        };
        assert!(burn.is_burned());
        assert_eq!(burn.token_amount(&TokenId::from("btc")), 7);
        assert_eq!(burn.token_amount(&TokenId::from("eth")), 0);
        assert!(!BurnData::default().is_burned());
    }

    #[test]
    fn test_portal_tx_json() {
        let tx = PortalTx {
            hash: Hash::compute(b"tx"),
            tx_type: TxType::Normal,
            version: TX_VERSION,
            sig_pub_key: [9u8; 32],
            sender_shard_id: 1,
            burn: BurnData::default(),
            mint: None,
            metadata: None,
        };
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains(&hex::encode([9u8; 32])));
        let back: PortalTx = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }
}
