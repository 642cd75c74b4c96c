use thiserror::Error;

/// Failures raised while reading or mutating beacon-held Portal state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("custodian {0} not found")]
    CustodianNotFound(String),

    #[error("custodian {custodian} has no record for token {token}")]
    TokenNotRegistered { custodian: String, token: String },

    #[error("custodian {custodian} already uses remote address {existing} for {token}")]
    RemoteAddressConflict { custodian: String, token: String, existing: String },

    #[error("insufficient free collateral: need {needed}, have {available}")]
    InsufficientFreeCollateral { needed: u64, available: u64 },

    #[error("insufficient locked collateral: need {needed}, have {available}")]
    InsufficientLockedCollateral { needed: u64, available: u64 },

    #[error("insufficient holding public token: need {needed}, have {available}")]
    InsufficientHolding { needed: u64, available: u64 },

    #[error("insufficient reward: need {needed}, have {available}")]
    InsufficientReward { needed: u64, available: u64 },

    #[error("amount overflow")]
    Overflow,

    #[error("collateral invariant broken for {custodian}/{token}: locked {locked} + free {free} != total {total}")]
    CollateralInvariant {
        custodian: String,
        token: String,
        locked: u64,
        free: u64,
        total: u64,
    },

    #[error("missing exchange rate for token {0}")]
    MissingExchangeRate(String),

    #[error("not enough custodian capacity: requested {requested}, matchable {matchable}")]
    InsufficientCapacity { requested: u64, matchable: u64 },

    #[error("request {0} not found")]
    RequestNotFound(String),

    #[error("liquidation pool for token {0} is empty")]
    EmptyLiquidationPool(String),

    #[error("invalid hash encoding: {0}")]
    InvalidHash(String),

    #[error("invalid payment address: {0}")]
    InvalidAddress(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("state encoding failed: {0}")]
    Encoding(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<config::ConfigError> for StateError {
    fn from(err: config::ConfigError) -> Self {
        StateError::Config(err.to_string())
    }
}
