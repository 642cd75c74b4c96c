// Portal protocol parameters
//
// SAFETY INVARIANTS:
// 1. Every replica must run the same parameter set for a given beacon height
// 2. tp_liquidation_percent < tp_warning_percent <= min_percent_locked_collateral
// 3. Fee rates are expressed in basis points of the request value in PRV

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::StateError;
use crate::types::{PaymentAddress, TokenId};

pub const PRV_TOKEN_ID: &str = "0000000000000000000000000000000000000000000000000000000000000004";
pub const PORTAL_BTC_ID: &str = "b832e5d3b1f01a4f0623f7fe91d6673461e1f5d37d91fe78c5c2e6183ff39696";
pub const PORTAL_ETH_ID: &str = "ffd8d42dc40a8d166ea4848baf8b5f6e9fe0e9c30d60062eb7d44a8df9e00854";

/// External chain backing a portal token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalChain {
    Bitcoin,
    Ethereum,
}

/// Per-token portal settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalTokenParams {
    /// External chain the public token lives on
    pub chain: ExternalChain,
    /// Smallest porting / redeem amount accepted
    pub min_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalParams {
    pub num_shards: u8,
    /// Collateral token (PRV)
    pub prv_token_id: TokenId,
    pub portal_tokens: BTreeMap<TokenId, PortalTokenParams>,
    /// Only address allowed to publish exchange rates
    pub feeder_address: PaymentAddress,
    /// Collateral locked per porting, percent of the ported value
    pub min_percent_locked_collateral: u64,
    /// Ratios strictly below this are liquidated
    pub tp_liquidation_percent: u64,
    /// Ratios below this (and at or above liquidation) are in the warning band
    pub tp_warning_percent: u64,
    pub porting_fee_bps: u64,
    pub redeem_fee_bps: u64,
    /// Floor for both fee kinds, in PRV
    pub min_portal_fee: u64,
    pub timeout_waiting_porting_blocks: u64,
    pub timeout_waiting_redeem_blocks: u64,
    pub timeout_custodian_return_blocks: u64,
    /// Extra collateral paid to a redeemer when the custodian runs away
    pub liquidation_bonus_percent: u64,
    pub max_proof_headers: usize,
}

impl Default for PortalParams {
    fn default() -> Self {
        let mut portal_tokens = BTreeMap::new();
        portal_tokens.insert(
            TokenId::from(PORTAL_BTC_ID),
            PortalTokenParams { chain: ExternalChain::Bitcoin, min_amount: 10 },
        );
        portal_tokens.insert(
            TokenId::from(PORTAL_ETH_ID),
            PortalTokenParams { chain: ExternalChain::Ethereum, min_amount: 10 },
        );
        PortalParams {
            num_shards: 8,
            prv_token_id: TokenId::from(PRV_TOKEN_ID),
            portal_tokens,
            feeder_address: PaymentAddress::new(
                "5a3f6d1b0c8e4f2a9b7d6c5e4f3a2b1c0d9e8f7a6b5c4d3e2f1a0b9c8d7e6f50",
            ),
            min_percent_locked_collateral: 150,
            tp_liquidation_percent: 130,
            tp_warning_percent: 150,
            porting_fee_bps: 1,
            redeem_fee_bps: 1,
            min_portal_fee: 100,
            timeout_waiting_porting_blocks: 1440,
            timeout_waiting_redeem_blocks: 10,
            timeout_custodian_return_blocks: 1440,
            liquidation_bonus_percent: 5,
            max_proof_headers: 10,
        }
    }
}

impl PortalParams {
    /// Defaults, overlaid by an optional YAML/TOML/JSON file, overlaid by
    /// `PORTAL_*` environment variables (nested keys separated by `__`).
    pub fn load(path: Option<&Path>) -> Result<Self, StateError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&PortalParams::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PORTAL")
                .separator("__")
                .try_parsing(true),
        );
        let params: PortalParams = builder.build()?.try_deserialize()?;
        params.validate()?;
        Ok(params)
    }

    /// Defaults overlaid by a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StateError> {
        let params: PortalParams = config::Config::builder()
            .add_source(config::Config::try_from(&PortalParams::default())?)
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), StateError> {
        if self.num_shards == 0 {
            return Err(StateError::Config("num_shards must be positive".into()));
        }
        if self.portal_tokens.is_empty() {
            return Err(StateError::Config("no portal tokens configured".into()));
        }
        if self.portal_tokens.contains_key(&self.prv_token_id) {
            return Err(StateError::Config("collateral token cannot be a portal token".into()));
        }
        if self.tp_liquidation_percent == 0
            || self.tp_liquidation_percent >= self.tp_warning_percent
            || self.tp_warning_percent > self.min_percent_locked_collateral
        {
            return Err(StateError::Config(format!(
                "inconsistent thresholds: liquidation {} warning {} locked {}",
                self.tp_liquidation_percent,
                self.tp_warning_percent,
                self.min_percent_locked_collateral
            )));
        }
        if self.porting_fee_bps > 10_000 || self.redeem_fee_bps > 10_000 {
            return Err(StateError::Config("fee rate above 100%".into()));
        }
        if self.max_proof_headers == 0 {
            return Err(StateError::Config("max_proof_headers must be positive".into()));
        }
        self.feeder_address.public_key()?;
        Ok(())
    }

    pub fn is_portal_token(&self, token: &TokenId) -> bool {
        self.portal_tokens.contains_key(token)
    }

    pub fn token_params(&self, token: &TokenId) -> Option<&PortalTokenParams> {
        self.portal_tokens.get(token)
    }
}
