/// PORTAL STATE
///
/// Beacon-owned state of the collateralized custody protocol:
/// - custodian collateral books (locked + free == total)
/// - waiting porting, waiting and matched redeem requests
/// - the feeder's exchange-rate snapshot and the liquidation pool
/// - the deterministic custodian matcher and the collateral-ratio liquidation engine
/// - status records, buffered per beacon height

pub mod errors;
pub mod types;
pub mod params;
pub mod custodian;
pub mod requests;
pub mod exchange_rates;
pub mod matcher;
pub mod liquidation;
pub mod portal_state;
pub mod status_store;

pub use errors::StateError;
pub use types::{Hash, PaymentAddress, TokenId};
pub use params::{ExternalChain, PortalParams, PortalTokenParams, PORTAL_BTC_ID, PORTAL_ETH_ID, PRV_TOKEN_ID};
pub use custodian::{CustodianRecord, CustodianTokenState};
pub use requests::{
    MatchingPortingCustodianDetail, MatchingRedeemCustodianDetail, PortingRequest, PortingStatus,
    RedeemRequest, RedeemStatus,
};
pub use exchange_rates::ExchangeRateTable;
pub use matcher::{Allocation, CustodianMatcher, MatchCandidate, MatchOutcome, MatchPolicy};
pub use liquidation::{
    CustodianExposure, LiquidationDecision, LiquidationEngine, LiquidationPool, LiquidationPoolEntry,
    LiquidationReport, RatioDetail, RatioOutcome, TpBand, TpThresholds,
};
pub use portal_state::PortalState;
pub use status_store::{
    MemoryStatusStore, StatusBatch, StatusKey, StatusKind, StatusRecord, StatusStore, StoreOverlay,
};
