// External chain proofs
//
// SAFETY INVARIANTS:
// 1. Proofs are opaque base64 strings; sanity checks only decode and count headers
// 2. Deep verification (header chain, merkle inclusion) is delegated to a ProofVerifier
// 3. A verifier failure is a validation error, never retried

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use portal_state::{ExternalChain, Hash, PaymentAddress, TokenId};

use crate::errors::MetadataError;

/// Memo a porter attaches to the external payment for porting `id`.
pub fn porting_memo(unique_porting_id: &str) -> String {
    format!("PS1-{}", unique_porting_id)
}

/// Memo a custodian attaches to its external payment for redeem `id`.
///
/// Bound to the paying custodian, so one payment settles one share.
pub fn redeem_memo(unique_redeem_id: &str, custodian: &PaymentAddress) -> String {
    let digest = Hash::compute(format!("{}{}", unique_redeem_id, custodian).as_bytes());
    format!("PS2-{}", digest)
}

/// Status-store id of an external transaction spent on a Portal request.
pub fn external_tx_key(token: &TokenId, chain_tx_id: &str) -> String {
    format!("{}/{}", token, chain_tx_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExternalOutput {
    pub address: String,
    pub amount: u64,
}

/// A verified transfer on the external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExternalTransfer {
    pub chain_tx_id: String,
    pub memo: String,
    pub outputs: Vec<ExternalOutput>,
}

impl ExternalTransfer {
    /// Total paid to `address`.
    pub fn paid_to(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|o| o.address == address)
            .fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }
}

/// Decoded proof payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProofEnvelope {
    pub block_headers: Vec<String>,
    pub tx_proof: String,
    /// Transfer as attested by the relayer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ExternalTransfer>,
}

impl ProofEnvelope {
    pub fn encode(&self) -> Result<String, MetadataError> {
        let json = serde_json::to_vec(self).map_err(|e| MetadataError::Proof(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }
}

/// Structural checks shared by every proof-carrying request.
pub fn decode_proof(proof: &str, max_headers: usize) -> Result<ProofEnvelope, MetadataError> {
    if proof.is_empty() {
        return Err(MetadataError::Proof("empty proof".into()));
    }
    let raw = STANDARD
        .decode(proof)
        .map_err(|e| MetadataError::Proof(format!("not base64: {}", e)))?;
    let envelope: ProofEnvelope = serde_json::from_slice(&raw)
        .map_err(|e| MetadataError::Proof(format!("undecodable proof: {}", e)))?;
    if envelope.block_headers.is_empty() || envelope.block_headers.len() > max_headers {
        return Err(MetadataError::Proof(format!(
            "header count {} outside 1..={}",
            envelope.block_headers.len(),
            max_headers
        )));
    }
    if envelope.block_headers.iter().any(|h| h.is_empty()) || envelope.tx_proof.is_empty() {
        return Err(MetadataError::Proof("empty header or tx proof".into()));
    }
    Ok(envelope)
}

/// Supplied by external relayers.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait ProofVerifier {
    fn verify(&self, chain: ExternalChain, proof: &str) -> Result<ExternalTransfer, MetadataError>;
}

/// Accepts the receipt a relayer attached to the proof once the proof is well formed.
#[derive(Debug, Clone)]
pub struct RelayedReceiptVerifier {
    pub max_headers: usize,
}

impl ProofVerifier for RelayedReceiptVerifier {
    fn verify(&self, chain: ExternalChain, proof: &str) -> Result<ExternalTransfer, MetadataError> {
        let envelope = decode_proof(proof, self.max_headers)?;
        envelope.receipt.ok_or_else(|| {
            MetadataError::Proof(format!("no relayer receipt for {:?} proof", chain))
        })
    }
}
