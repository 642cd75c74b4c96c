// Shared request header and signature capability
//
// SAFETY INVARIANTS:
// 1. Every metadata JSON object carries its numeric "Type"
// 2. Signed variants sign hash_without_sig(); the signature is excluded from what it signs
// 3. Hash inputs are length-prefixed, so field boundaries cannot shift

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use portal_state::{Hash, PaymentAddress};

use crate::errors::MetadataError;
use crate::meta_type::MetaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    #[serde(rename = "Type")]
    pub meta_type: MetaType,
}

impl RequestHeader {
    pub fn new(meta_type: MetaType) -> Self {
        RequestHeader { meta_type }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequestHeader {
    #[serde(rename = "Type")]
    pub meta_type: MetaType,
    /// Hex ed25519 signature over hash_without_sig()
    #[serde(rename = "Sig", default)]
    pub sig: String,
}

impl SignedRequestHeader {
    pub fn unsigned(meta_type: MetaType) -> Self {
        SignedRequestHeader { meta_type, sig: String::new() }
    }
}

/// Implemented only by metadata variants that carry their own signature.
pub trait SignatureVerifiable {
    fn hash_without_sig(&self) -> Hash;
    fn sig(&self) -> &str;
    fn signer(&self) -> &PaymentAddress;

    fn verify_signature(&self) -> Result<(), MetadataError> {
        if self.sig().is_empty() {
            return Err(MetadataError::Signature("missing signature".into()));
        }
        let pk = self
            .signer()
            .public_key()
            .map_err(|e| MetadataError::Signature(e.to_string()))?;
        let key = VerifyingKey::from_bytes(&pk)
            .map_err(|e| MetadataError::Signature(format!("bad signer key: {}", e)))?;
        let raw = hex::decode(self.sig())
            .map_err(|e| MetadataError::Signature(format!("bad signature encoding: {}", e)))?;
        let sig = Signature::from_slice(&raw)
            .map_err(|e| MetadataError::Signature(format!("bad signature: {}", e)))?;
        key.verify(&self.hash_without_sig().0, &sig)
            .map_err(|_| MetadataError::Signature("signature does not verify".into()))
    }
}

/// Hex signature of `hash` by `key`.
pub fn sign_hash(key: &SigningKey, hash: &Hash) -> String {
    hex::encode(key.sign(&hash.0).to_bytes())
}

/// Order-sensitive metadata hasher.
pub struct MetaHasher {
    hasher: Sha3_256,
}

impl MetaHasher {
    pub fn new(meta_type: MetaType) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(meta_type.code().to_le_bytes());
        MetaHasher { hasher }
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.hasher.update((s.len() as u64).to_le_bytes());
        self.hasher.update(s.as_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.hasher.update(v.to_le_bytes());
        self
    }

    pub fn hash(&mut self, h: &Hash) -> &mut Self {
        self.hasher.update(h.0);
        self
    }

    pub fn finish(&mut self) -> Hash {
        let out = self.hasher.finalize_reset();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out[..]);
        Hash(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Signed {
        signer: PaymentAddress,
        sig: String,
        payload: u64,
    }

    impl SignatureVerifiable for Signed {
        fn hash_without_sig(&self) -> Hash {
            MetaHasher::new(MetaType::ExchangeRates).u64(self.payload).finish()
        }
        fn sig(&self) -> &str {
            &self.sig
        }
        fn signer(&self) -> &PaymentAddress {
            &self.signer
        }
    }

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn test_signature_roundtrip() {
        let k = key();
        let mut m = Signed {
            signer: PaymentAddress::from_public_key(&k.verifying_key().to_bytes()),
            sig: String::new(),
            payload: 42,
        };
        assert!(m.verify_signature().is_err());
        m.sig = sign_hash(&k, &m.hash_without_sig());
        assert!(m.verify_signature().is_ok());
        m.payload = 43;
        assert!(matches!(m.verify_signature(), Err(MetadataError::Signature(_))));
    }

    #[test]
    fn test_hasher_is_field_boundary_safe() {
        let a = MetaHasher::new(MetaType::RedeemRequest).str("ab").str("c").finish();
        let b = MetaHasher::new(MetaType::RedeemRequest).str("a").str("bc").finish();
        assert_ne!(a, b);
        let c = MetaHasher::new(MetaType::RequestPorting).str("ab").str("c").finish();
        assert_ne!(a, c);
    }
}
