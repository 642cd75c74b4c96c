// Checks shared by the metadata variants
//
// SAFETY INVARIANTS:
// 1. Burned amounts must equal the declared amounts exactly
// 2. Every helper is pure; state lookups go through the view traits only

use portal_state::{PaymentAddress, PortalParams, PortalState, StatusKey, StatusKind, TokenId};

use crate::chain::BeaconViewRetriever;
use crate::errors::MetadataError;
use crate::proof::{external_tx_key, ExternalTransfer};
use crate::transaction::{Transaction, TxType, TX_VERSION};

pub const MAX_UNIQUE_ID_LEN: usize = 256;

pub fn require_tx(tx: &dyn Transaction, expected: TxType) -> Result<(), MetadataError> {
    if tx.tx_type() != expected {
        return Err(MetadataError::TxShape(format!(
            "expected {:?} transaction, got {:?}",
            expected,
            tx.tx_type()
        )));
    }
    if tx.version() != TX_VERSION {
        return Err(MetadataError::TxShape(format!(
            "unsupported transaction version {}",
            tx.version()
        )));
    }
    Ok(())
}

pub fn require_address(field: &'static str, address: &PaymentAddress) -> Result<[u8; 32], MetadataError> {
    address
        .public_key()
        .map_err(|e| MetadataError::invalid(field, e.to_string()))
}

/// The transaction must be signed by the owner of `address`.
pub fn require_signer(tx: &dyn Transaction, address: &PaymentAddress) -> Result<(), MetadataError> {
    let pk = require_address("address", address)?;
    if tx.sig_pub_key() != pk {
        return Err(MetadataError::Unauthorized(format!(
            "transaction not signed by {}",
            address
        )));
    }
    Ok(())
}

pub fn require_portal_token(params: &PortalParams, token: &TokenId) -> Result<(), MetadataError> {
    if !params.is_portal_token(token) {
        return Err(MetadataError::invalid("token id", format!("{} is not a portal token", token)));
    }
    Ok(())
}

pub fn require_min_amount(params: &PortalParams, token: &TokenId, amount: u64) -> Result<(), MetadataError> {
    let min = params.token_params(token).map_or(1, |t| t.min_amount.max(1));
    if amount < min {
        return Err(MetadataError::invalid("amount", format!("{} below minimum {}", amount, min)));
    }
    Ok(())
}

pub fn require_unique_id(field: &'static str, id: &str) -> Result<(), MetadataError> {
    if id.is_empty() || id.len() > MAX_UNIQUE_ID_LEN {
        return Err(MetadataError::invalid(field, format!("length {} outside 1..={}", id.len(), MAX_UNIQUE_ID_LEN)));
    }
    Ok(())
}

/// Exactly `amount` PRV burned and no token.
pub fn require_prv_burn(tx: &dyn Transaction, amount: u64) -> Result<(), MetadataError> {
    let burn = tx.burn_data();
    if burn.prv_amount != amount || burn.token.is_some() {
        return Err(MetadataError::BurnMismatch(format!(
            "expected {} PRV burned, got {:?}",
            amount, burn
        )));
    }
    Ok(())
}

/// Exactly `amount` of `token` burned, plus `prv_fee` PRV.
pub fn require_token_burn(
    tx: &dyn Transaction,
    token: &TokenId,
    amount: u64,
    prv_fee: u64,
) -> Result<(), MetadataError> {
    let burn = tx.burn_data();
    if burn.token_amount(token) != amount || burn.prv_amount != prv_fee {
        return Err(MetadataError::BurnMismatch(format!(
            "expected {} of {} and {} PRV burned, got {:?}",
            amount, token, prv_fee, burn
        )));
    }
    Ok(())
}

/// No burn at all.
pub fn require_no_burn(tx: &dyn Transaction) -> Result<(), MetadataError> {
    let burn = tx.burn_data();
    if burn.is_burned() {
        return Err(MetadataError::BurnMismatch(format!("unexpected burn {:?}", burn)));
    }
    Ok(())
}

pub fn require_not_processed(
    beacon: &dyn BeaconViewRetriever,
    kind: StatusKind,
    id: &str,
) -> Result<(), MetadataError> {
    if beacon.status_store().contains(&StatusKey::new(kind, id)) {
        return Err(MetadataError::Duplicate(id.to_string()));
    }
    Ok(())
}

/// The verified transfer is the one the request names, and no earlier request spent it.
pub fn require_unspent_external_tx(
    beacon: &dyn BeaconViewRetriever,
    token: &TokenId,
    external_tx_id: &str,
    transfer: &ExternalTransfer,
) -> Result<(), MetadataError> {
    if transfer.chain_tx_id != external_tx_id {
        return Err(MetadataError::Proof(format!(
            "proof is for external tx {}, request names {}",
            transfer.chain_tx_id, external_tx_id
        )));
    }
    require_not_processed(beacon, StatusKind::ExternalTx, &external_tx_key(token, external_tx_id))
}

pub fn require_fee(
    state: &PortalState,
    params: &PortalParams,
    token: &TokenId,
    amount: u64,
    fee_bps: u64,
    paid: u64,
) -> Result<(), MetadataError> {
    let required = state
        .required_fee(token, amount, fee_bps, params)
        .map_err(|e| MetadataError::StateConflict(e.to_string()))?;
    if paid < required {
        return Err(MetadataError::StateConflict(format!(
            "fee {} below required {}",
            paid, required
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{BurnData, BurnedToken, PortalTx};
    use portal_state::Hash;

    fn tx(tx_type: TxType, burn: BurnData) -> PortalTx {
        PortalTx {
            hash: Hash::compute(b"t"),
            tx_type,
            version: TX_VERSION,
            sig_pub_key: [1u8; 32],
            sender_shard_id: 0,
            burn,
            mint: None,
            metadata: None,
        }
    }

    #[test]
    fn test_burn_checks_are_exact() {
        let t = tx(TxType::Normal, BurnData { prv_amount: 10, token: None });
        assert!(require_prv_burn(&t, 10).is_ok());
        assert!(require_prv_burn(&t, 9).is_err());
        assert!(require_no_burn(&t).is_err());

        let btc = TokenId::from("btc");
        let t = tx(
            TxType::CustomToken,
            BurnData { prv_amount: 2, token: Some(BurnedToken { token_id: btc.clone(), amount: 5 }) },
        );
        assert!(require_token_burn(&t, &btc, 5, 2).is_ok());
        assert!(require_token_burn(&t, &btc, 5, 3).is_err());
        assert!(require_token_burn(&t, &TokenId::from("eth"), 5, 2).is_err());
        assert!(require_prv_burn(&t, 2).is_err());
    }

    #[test]
    fn test_signer_and_shape() {
        let t = tx(TxType::Normal, BurnData::default());
        assert!(require_signer(&t, &PaymentAddress::from_public_key(&[1u8; 32])).is_ok());
        assert!(matches!(
            require_signer(&t, &PaymentAddress::from_public_key(&[2u8; 32])),
            Err(MetadataError::Unauthorized(_))
        ));
        assert!(require_tx(&t, TxType::CustomToken).is_err());
        let mut old = t.clone();
        old.version = 1;
        assert!(require_tx(&old, TxType::Normal).is_err());
    }

    #[test]
    fn test_unique_id_bounds() {
        assert!(require_unique_id("id", "").is_err());
        assert!(require_unique_id("id", &"x".repeat(MAX_UNIQUE_ID_LEN + 1)).is_err());
        assert!(require_unique_id("id", "porting-1").is_ok());
    }
}
