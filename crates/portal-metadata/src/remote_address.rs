use std::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use ethers_core::types::Address as EthAddress;

use portal_state::ExternalChain;

use crate::errors::MetadataError;

/// Check that `address` is a well-formed address on `chain`.
pub fn validate_remote_address(chain: ExternalChain, address: &str) -> Result<(), MetadataError> {
    if address.is_empty() {
        return Err(MetadataError::invalid("remote address", "empty"));
    }
    match chain {
        ExternalChain::Bitcoin => bitcoin::Address::<NetworkUnchecked>::from_str(address)
            .map(|_| ())
            .map_err(|e| MetadataError::invalid("remote address", format!("bitcoin: {}", e))),
        ExternalChain::Ethereum => {
            let hex_part = address.strip_prefix("0x").unwrap_or(address);
            if hex_part.len() != 40 {
                return Err(MetadataError::invalid(
                    "remote address",
                    format!("ethereum address must be 20 bytes, got {} hex chars", hex_part.len()),
                ));
            }
            EthAddress::from_str(hex_part)
                .map(|_| ())
                .map_err(|e| MetadataError::invalid("remote address", format!("ethereum: {}", e)))
        }
    }
}
